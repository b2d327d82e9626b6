//! Evaluation scope assembly.
//!
//! An [`EvalContext`] is the structured scope expressions are evaluated
//! against. Scopes are derived by shallow-copying a base context and
//! overlaying job- or instance-specific fields; a context is never mutated
//! from more than one task.

use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};

use super::value::Value;
use crate::config::{Job, Workflow};

/// Outcome flags backing the `success()` / `failure()` / `cancelled()`
/// built-ins for the scope being evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub failed: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    workflow: IndexMap<String, JsonValue>,
    job: IndexMap<String, JsonValue>,
    steps: IndexMap<String, JsonValue>,
    needs: IndexMap<String, JsonValue>,
    vars: IndexMap<String, JsonValue>,
    env: IndexMap<String, JsonValue>,
    matrix: IndexMap<String, JsonValue>,
    runner: IndexMap<String, JsonValue>,
    inputs: IndexMap<String, JsonValue>,
    secrets: IndexMap<String, JsonValue>,
    pub flags: StatusFlags,
}

impl EvalContext {
    /// Base context for a workflow run: workflow metadata, `vars`, `env`,
    /// plus caller-supplied `inputs` and `secrets`.
    pub fn for_workflow(
        workflow: &Workflow,
        inputs: IndexMap<String, JsonValue>,
        secrets: IndexMap<String, JsonValue>,
    ) -> Self {
        let mut ctx = Self::default();
        ctx.workflow
            .insert("name".to_string(), json!(workflow.name));
        ctx.vars = workflow.vars.clone();
        ctx.env = workflow
            .env
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        ctx.inputs = inputs;
        ctx.secrets = secrets;
        ctx
    }

    /// Derive a job scope: job metadata, env overlay, and the `needs` map
    /// populated from completed dependencies' captured outputs.
    pub fn for_job(
        &self,
        name: &str,
        job: &Job,
        needs_outputs: IndexMap<String, IndexMap<String, String>>,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.job = IndexMap::new();
        ctx.job.insert("name".to_string(), json!(name));
        for (key, value) in &job.env {
            ctx.env.insert(key.clone(), json!(value));
        }
        ctx.runner
            .insert("pool".to_string(), json!(job.runs_on));
        ctx.needs = needs_outputs
            .into_iter()
            .map(|(dep, outputs)| (dep, json!({ "outputs": outputs })))
            .collect();
        ctx.steps = IndexMap::new();
        ctx.matrix = IndexMap::new();
        ctx
    }

    /// Derive a matrix-instance scope carrying the instance's assignment.
    pub fn with_matrix(&self, assignment: &IndexMap<String, JsonValue>) -> Self {
        let mut ctx = self.clone();
        ctx.matrix = assignment.clone();
        ctx
    }

    /// Overlay step-level env for the duration of one step.
    pub fn with_env(&self, env: &IndexMap<String, String>) -> Self {
        let mut ctx = self.clone();
        for (key, value) in env {
            ctx.env.insert(key.clone(), json!(value));
        }
        ctx
    }

    /// Record a step's parsed output, making it visible as
    /// `steps.<id>.outputs.<key>` to later expressions in the same job.
    pub fn set_step_output(&mut self, step_id: &str, key: &str, value: &str) {
        let entry = self
            .steps
            .entry(step_id.to_string())
            .or_insert_with(|| json!({ "outputs": {} }));
        if let Some(outputs) = entry
            .as_object_mut()
            .and_then(|obj| obj.get_mut("outputs"))
            .and_then(JsonValue::as_object_mut)
        {
            outputs.insert(key.to_string(), json!(value));
        }
    }

    pub fn set_var(&mut self, key: &str, value: JsonValue) {
        self.vars.insert(key.to_string(), value);
    }

    /// Resolve a root identifier. Unknown names resolve to null rather than
    /// erroring, so conditions can probe optional scopes.
    pub fn lookup(&self, name: &str) -> Value {
        match name {
            "workflow" => map_value(&self.workflow),
            "job" => map_value(&self.job),
            "steps" => map_value(&self.steps),
            "needs" => map_value(&self.needs),
            "vars" => map_value(&self.vars),
            "env" => map_value(&self.env),
            "matrix" => map_value(&self.matrix),
            "runner" => map_value(&self.runner),
            "inputs" => map_value(&self.inputs),
            "secrets" => map_value(&self.secrets),
            _ => Value::Null,
        }
    }
}

fn map_value(entries: &IndexMap<String, JsonValue>) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_root_is_null() {
        let ctx = EvalContext::default();
        assert_eq!(ctx.lookup("nonsense"), Value::Null);
    }

    #[test]
    fn test_step_output_visibility() {
        let mut ctx = EvalContext::default();
        ctx.set_step_output("version", "tag", "v1.2.3");
        ctx.set_step_output("version", "tag", "v2.0.0");
        let Value::Map(steps) = ctx.lookup("steps") else {
            panic!("expected map");
        };
        let Value::Map(step) = &steps["version"] else {
            panic!("expected step map");
        };
        let Value::Map(outputs) = &step["outputs"] else {
            panic!("expected outputs map");
        };
        assert_eq!(outputs["tag"], Value::String("v2.0.0".into()));
    }

    #[test]
    fn test_matrix_overlay_does_not_touch_base() {
        let base = EvalContext::default();
        let mut assignment = IndexMap::new();
        assignment.insert("server".to_string(), serde_json::json!("web1"));
        let derived = base.with_matrix(&assignment);
        assert_eq!(base.lookup("matrix"), Value::Map(IndexMap::new()));
        let Value::Map(matrix) = derived.lookup("matrix") else {
            panic!("expected map");
        };
        assert_eq!(matrix["server"], Value::String("web1".into()));
    }
}
