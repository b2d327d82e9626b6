//! `${{ <expr> }}` substitution in strings and expression-bearing trees
//! (`with` blocks, env maps).

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::{EvalContext, Evaluator, ExprError, ExprErrorKind};

/// Trees nested deeper than this fail rendering before recursion gets
/// pathological.
pub const MAX_NESTING_DEPTH: usize = 10;

/// Scans strings for `${{ <expr> }}` occurrences and substitutes each
/// expression's rendered value. On any evaluation failure the whole render
/// fails; there is no partial substitution.
#[derive(Debug, Clone)]
pub struct Replacer {
    evaluator: Evaluator,
    pattern: Regex,
}

impl Default for Replacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer {
    pub fn new() -> Self {
        Self {
            evaluator: Evaluator::new(),
            pattern: Regex::new(r"\$\{\{(.*?)\}\}").expect("invalid replacement pattern"),
        }
    }

    /// Substitute every `${{ }}` occurrence in a single string.
    pub async fn render_str(
        &self,
        input: &str,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<String, ExprError> {
        let mut result = String::with_capacity(input.len());
        let mut last_end = 0;
        for captures in self.pattern.captures_iter(input) {
            let full = captures.get(0).expect("capture 0 always present");
            let expression = captures
                .get(1)
                .expect("capture 1 always present")
                .as_str()
                .trim();
            result.push_str(&input[last_end..full.start()]);
            let value = self.evaluator.evaluate(expression, ctx, timeout).await?;
            result.push_str(&value.render());
            last_end = full.end();
        }
        result.push_str(&input[last_end..]);
        Ok(result)
    }

    /// Recursively substitute through maps and arrays, enforcing the
    /// nesting-depth ceiling.
    pub async fn render_value(
        &self,
        value: &JsonValue,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<JsonValue, ExprError> {
        self.render_at_depth(value, ctx, timeout, 0).await
    }

    fn render_at_depth<'a>(
        &'a self,
        value: &'a JsonValue,
        ctx: &'a EvalContext,
        timeout: Duration,
        depth: usize,
    ) -> BoxFuture<'a, Result<JsonValue, ExprError>> {
        async move {
            if depth > MAX_NESTING_DEPTH {
                return Err(ExprError {
                    expression: String::new(),
                    message: format!(
                        "nesting too deep: structure exceeds {MAX_NESTING_DEPTH} levels"
                    ),
                    kind: ExprErrorKind::Nesting,
                    position: None,
                    suggestion: Some("flatten the parameter structure".to_string()),
                });
            }
            match value {
                JsonValue::String(s) => {
                    Ok(JsonValue::String(self.render_str(s, ctx, timeout).await?))
                }
                JsonValue::Array(items) => {
                    let mut rendered = Vec::with_capacity(items.len());
                    for item in items {
                        rendered.push(self.render_at_depth(item, ctx, timeout, depth + 1).await?);
                    }
                    Ok(JsonValue::Array(rendered))
                }
                JsonValue::Object(entries) => {
                    let mut rendered = serde_json::Map::with_capacity(entries.len());
                    for (key, item) in entries {
                        rendered.insert(
                            key.clone(),
                            self.render_at_depth(item, ctx, timeout, depth + 1).await?,
                        );
                    }
                    Ok(JsonValue::Object(rendered))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    /// Render a step's `with` parameter map.
    pub async fn render_params(
        &self,
        params: &IndexMap<String, JsonValue>,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<IndexMap<String, JsonValue>, ExprError> {
        let mut rendered = IndexMap::with_capacity(params.len());
        for (key, value) in params {
            rendered.insert(key.clone(), self.render_value(value, ctx, timeout).await?);
        }
        Ok(rendered)
    }

    /// Render an env map's values.
    pub async fn render_env(
        &self,
        env: &IndexMap<String, String>,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<IndexMap<String, String>, ExprError> {
        let mut rendered = IndexMap::with_capacity(env.len());
        for (key, value) in env {
            rendered.insert(key.clone(), self.render_str(value, ctx, timeout).await?);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::default();
        ctx.set_var("version", json!("1.2.3"));
        ctx.set_var("count", json!(3));
        ctx
    }

    #[tokio::test]
    async fn test_render_str() {
        let replacer = Replacer::new();
        let result = replacer
            .render_str("release v${{ vars.version }} (${{ vars.count }})", &ctx(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result, "release v1.2.3 (3)");
    }

    #[tokio::test]
    async fn test_no_partial_substitution_on_failure() {
        let replacer = Replacer::new();
        let err = replacer
            .render_str("ok ${{ vars.version }} bad ${{ 1 + }}", &ctx(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Syntax);
    }

    #[tokio::test]
    async fn test_undefined_renders_empty() {
        let replacer = Replacer::new();
        let result = replacer
            .render_str("[${{ vars.missing }}]", &ctx(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result, "[]");
    }

    #[tokio::test]
    async fn test_render_value_recurses() {
        let replacer = Replacer::new();
        let value = json!({
            "args": ["--version", "${{ vars.version }}"],
            "nested": {"count": "${{ vars.count }}"}
        });
        let rendered = replacer.render_value(&value, &ctx(), TIMEOUT).await.unwrap();
        assert_eq!(rendered["args"][1], json!("1.2.3"));
        assert_eq!(rendered["nested"]["count"], json!("3"));
    }

    #[tokio::test]
    async fn test_nesting_ceiling() {
        let replacer = Replacer::new();
        let mut value = json!("leaf");
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            value = json!({ "inner": value });
        }
        let err = replacer
            .render_value(&value, &ctx(), TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Nesting);
        assert!(err.message.contains("nesting too deep"));
    }

    #[tokio::test]
    async fn test_non_greedy_matching() {
        let replacer = Replacer::new();
        let result = replacer
            .render_str("${{ vars.count }}-${{ vars.count }}", &ctx(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result, "3-3");
    }
}
