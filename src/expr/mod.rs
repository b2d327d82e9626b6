//! Expression compilation and evaluation for workflow conditions, job
//! outputs and `${{ }}` substitution.
//!
//! Evaluation uses allow-undefined semantics: an identifier that resolves to
//! nothing evaluates to null instead of erroring, so conditions can probe
//! scopes that are only populated at runtime. Execution is raced against a
//! caller-supplied timeout on a disposable worker; on timeout the worker is
//! abandoned, never killed.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

mod context;
mod functions;
mod parser;
mod replace;
mod value;

pub use context::{EvalContext, StatusFlags};
pub use parser::{BinaryOp, Expr, UnaryOp};
pub use replace::Replacer;
pub use value::Value;

/// Expressions longer than this fail compilation outright.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Classification of an expression failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprErrorKind {
    Syntax,
    Type,
    Timeout,
    Length,
    Nesting,
    Evaluation,
}

impl ExprErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExprErrorKind::Syntax => "syntax_error",
            ExprErrorKind::Type => "type_error",
            ExprErrorKind::Timeout => "timeout_error",
            ExprErrorKind::Length => "length_error",
            ExprErrorKind::Nesting => "nesting_error",
            ExprErrorKind::Evaluation => "expression_evaluation_error",
        }
    }
}

impl fmt::Display for ExprErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed expression failure carrying the offending expression text.
#[derive(Error, Debug, Clone)]
#[error("{kind} in expression '{expression}': {message}")]
pub struct ExprError {
    pub expression: String,
    pub message: String,
    pub kind: ExprErrorKind,
    pub position: Option<usize>,
    pub suggestion: Option<String>,
}

/// Internal evaluation failure, attached to the expression text at the
/// public boundary.
#[derive(Debug, Clone)]
pub(crate) struct EvalFailure {
    kind: ExprErrorKind,
    message: String,
    suggestion: Option<String>,
}

impl EvalFailure {
    fn into_expr_error(self, expression: &str) -> ExprError {
        ExprError {
            expression: expression.to_string(),
            message: self.message,
            kind: self.kind,
            position: None,
            suggestion: self.suggestion,
        }
    }
}

fn type_failure(message: String) -> EvalFailure {
    EvalFailure {
        kind: ExprErrorKind::Type,
        message,
        suggestion: None,
    }
}

/// Compiles and evaluates expressions against an [`EvalContext`].
#[derive(Debug, Clone, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Compile an expression without evaluating it. Fails fast on the
    /// length ceiling and on syntax errors.
    pub fn compile(&self, expression: &str) -> Result<Expr, ExprError> {
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ExprError {
                expression: truncate(expression),
                message: format!(
                    "expression is {} characters, limit is {MAX_EXPRESSION_LEN}",
                    expression.len()
                ),
                kind: ExprErrorKind::Length,
                position: None,
                suggestion: Some("split the expression or move logic into vars".to_string()),
            });
        }
        parser::parse(expression).map_err(|err| {
            let suggestion = if err.message.contains("'=='") {
                Some("use '==' for comparison, '=' is not an operator".to_string())
            } else if err.message.contains("unterminated string") {
                Some("close the string with a matching quote".to_string())
            } else {
                None
            };
            ExprError {
                expression: expression.to_string(),
                message: err.message,
                kind: ExprErrorKind::Syntax,
                position: Some(err.position),
                suggestion,
            }
        })
    }

    /// Compile and evaluate, racing the evaluation worker against `timeout`.
    pub async fn evaluate(
        &self,
        expression: &str,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<Value, ExprError> {
        let compiled = self.compile(expression)?;
        let ctx = ctx.clone();
        let worker = tokio::task::spawn_blocking(move || eval(&compiled, &ctx));
        match tokio::time::timeout(timeout, worker).await {
            Err(_) => Err(ExprError {
                expression: expression.to_string(),
                message: format!("evaluation did not finish within {timeout:?}"),
                kind: ExprErrorKind::Timeout,
                position: None,
                suggestion: None,
            }),
            Ok(Err(join)) => Err(ExprError {
                expression: expression.to_string(),
                message: format!("evaluation worker failed: {join}"),
                kind: ExprErrorKind::Evaluation,
                position: None,
                suggestion: None,
            }),
            Ok(Ok(result)) => result.map_err(|failure| failure.into_expr_error(expression)),
        }
    }

    /// Condition semantics: an empty condition always runs; a non-empty
    /// condition must evaluate to a boolean.
    pub async fn evaluate_condition(
        &self,
        condition: &str,
        ctx: &EvalContext,
        timeout: Duration,
    ) -> Result<bool, ExprError> {
        if condition.trim().is_empty() {
            return Ok(true);
        }
        match self.evaluate(condition, ctx, timeout).await? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError {
                expression: condition.to_string(),
                message: format!(
                    "condition must evaluate to a boolean, got {}",
                    other.type_name()
                ),
                kind: ExprErrorKind::Type,
                position: None,
                suggestion: Some("compare the value explicitly, e.g. `== 'production'`".into()),
            }),
        }
    }
}

fn truncate(expression: &str) -> String {
    expression.chars().take(64).collect::<String>() + "…"
}

fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, EvalFailure> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(ctx.lookup(name)),
        Expr::Field { object, name } => match eval(object, ctx)? {
            Value::Map(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_failure(format!(
                "cannot access field '{name}' on {}",
                other.type_name()
            ))),
        },
        Expr::Index { object, index } => {
            let object = eval(object, ctx)?;
            let index = eval(index, ctx)?;
            match (&object, &index) {
                (Value::List(items), Value::Number(n)) => {
                    if *n >= 0.0 && n.fract() == 0.0 {
                        Ok(items.get(*n as usize).cloned().unwrap_or(Value::Null))
                    } else {
                        Ok(Value::Null)
                    }
                }
                (Value::Map(entries), key) => {
                    Ok(entries.get(&key.render()).cloned().unwrap_or(Value::Null))
                }
                (Value::Null, _) => Ok(Value::Null),
                (other, _) => Err(type_failure(format!(
                    "cannot index into {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, &args, ctx)
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match as_number(&value) {
                    Some(n) => Ok(Value::Number(-n)),
                    None => Err(type_failure(format!(
                        "cannot negate {}",
                        value.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { left, op, right } => eval_binary(left, *op, right, ctx),
    }
}

fn eval_binary(
    left: &Expr,
    op: BinaryOp,
    right: &Expr,
    ctx: &EvalContext,
) -> Result<Value, EvalFailure> {
    // Short-circuit before evaluating the right-hand side.
    match op {
        BinaryOp::And => {
            if !eval(left, ctx)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(right, ctx)?.is_truthy()));
        }
        BinaryOp::Or => {
            if eval(left, ctx)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(right, ctx)?.is_truthy()));
        }
        _ => {}
    }

    let lhs = eval(left, ctx)?;
    let rhs = eval(right, ctx)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs).ok_or_else(|| {
                type_failure(format!(
                    "cannot compare {} and {} with '{}'",
                    lhs.type_name(),
                    rhs.type_name(),
                    op.symbol()
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(&lhs, op, &rhs, |a, b| a + b),
        },
        BinaryOp::Sub => arithmetic(&lhs, op, &rhs, |a, b| a - b),
        BinaryOp::Mul => arithmetic(&lhs, op, &rhs, |a, b| a * b),
        BinaryOp::Div => arithmetic(&lhs, op, &rhs, |a, b| a / b),
        BinaryOp::Mod => arithmetic(&lhs, op, &rhs, |a, b| a % b),
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

fn arithmetic(
    lhs: &Value,
    op: BinaryOp,
    rhs: &Value,
    apply: fn(f64, f64) -> f64,
) -> Result<Value, EvalFailure> {
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => Ok(Value::Number(apply(a, b))),
        _ => Err(type_failure(format!(
            "'{}' expects numbers, got {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

/// Numeric view of a value: numbers as-is, numeric strings coerced.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with numeric-string coercion, so `env.count == 3` holds when
/// the captured output is the string "3".
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    match (lhs, rhs) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(lhs), as_number(rhs)), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => {
            // Prefer numeric ordering when both sides are numeric strings.
            if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
                x.partial_cmp(&y)
            } else {
                Some(a.cmp(b))
            }
        }
        _ => as_number(lhs)?.partial_cmp(&as_number(rhs)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with_vars(vars: serde_json::Value) -> EvalContext {
        let mut ctx = EvalContext::default();
        if let serde_json::Value::Object(entries) = vars {
            for (key, value) in entries {
                ctx.set_var(&key, value);
            }
        }
        ctx
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_empty_condition_is_true() {
        let evaluator = Evaluator::new();
        let ctx = EvalContext::default();
        assert!(evaluator
            .evaluate_condition("", &ctx, TIMEOUT)
            .await
            .unwrap());
        assert!(evaluator
            .evaluate_condition("   ", &ctx, TIMEOUT)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_always_is_true() {
        let evaluator = Evaluator::new();
        let ctx = EvalContext::default();
        assert!(evaluator
            .evaluate_condition("always()", &ctx, TIMEOUT)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_non_boolean_condition_is_type_error() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"env": "production"}));
        let err = evaluator
            .evaluate_condition("vars.env", &ctx, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Type);

        let err = evaluator
            .evaluate_condition("1 + 1", &ctx, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Type);
    }

    #[tokio::test]
    async fn test_undefined_identifier_is_null() {
        let evaluator = Evaluator::new();
        let ctx = EvalContext::default();
        let value = evaluator
            .evaluate("vars.missing.deeper", &ctx, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_comparison_and_logic() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"score": 85, "env": "prod"}));
        assert!(evaluator
            .evaluate_condition("vars.score >= 80 && vars.env == 'prod'", &ctx, TIMEOUT)
            .await
            .unwrap());
        assert!(!evaluator
            .evaluate_condition("vars.score < 80 || vars.env != 'prod'", &ctx, TIMEOUT)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_numeric_string_coercion() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"count": "3"}));
        assert!(evaluator
            .evaluate_condition("vars.count == 3", &ctx, TIMEOUT)
            .await
            .unwrap());
        assert!(evaluator
            .evaluate_condition("vars.count > 2", &ctx, TIMEOUT)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_arithmetic() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"n": 4}));
        let value = evaluator
            .evaluate("vars.n * 2 + 1", &ctx, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(value, Value::Number(9.0));
    }

    #[tokio::test]
    async fn test_string_concat() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"name": "web"}));
        let value = evaluator
            .evaluate("vars.name + '-1'", &ctx, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(value, Value::String("web-1".into()));
    }

    #[tokio::test]
    async fn test_length_ceiling() {
        let evaluator = Evaluator::new();
        let ctx = EvalContext::default();
        let long = format!("'{}'", "x".repeat(MAX_EXPRESSION_LEN + 1));
        let err = evaluator.evaluate(&long, &ctx, TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Length);
    }

    #[tokio::test]
    async fn test_syntax_error_carries_position() {
        let evaluator = Evaluator::new();
        let err = evaluator.compile("vars.a = 1").unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Syntax);
        assert!(err.position.is_some());
        assert!(err.suggestion.unwrap().contains("=="));
    }

    #[tokio::test]
    async fn test_field_access_on_scalar_is_type_error() {
        let evaluator = Evaluator::new();
        let ctx = ctx_with_vars(json!({"n": 4}));
        let err = evaluator
            .evaluate("vars.n.deeper", &ctx, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::Type);
    }
}
