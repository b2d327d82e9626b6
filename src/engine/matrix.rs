//! Matrix expansion and bounded-concurrency instance execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output::OutputStore;
use super::state::{Conclusion, WorkflowState};
use super::step::{SequenceOutcome, StepRunner};
use crate::config::{Job, Strategy, MAX_MATRIX_COMBINATIONS};
use crate::error::{Error, Result};
use crate::expr::{EvalContext, Replacer, Value};

/// One concrete instance of a matrix job: a stable index and the dimension
/// assignment it carries into its evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixInstance {
    pub index: usize,
    pub values: IndexMap<String, JsonValue>,
}

impl MatrixInstance {
    /// Dimension assignment rendered to strings, for display and state.
    pub fn assignment(&self) -> IndexMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v).render()))
            .collect()
    }
}

/// Expand a strategy into the cartesian product of its dimensions, in
/// declaration order, with contiguous indices 0..N-1. No strategy (or an
/// empty matrix) yields exactly one instance with no matrix variables.
/// The combination ceiling is re-checked here even though validation
/// already enforced it.
pub fn expand(strategy: Option<&Strategy>) -> Result<Vec<MatrixInstance>> {
    let Some(strategy) = strategy.filter(|s| !s.matrix.is_empty()) else {
        return Ok(vec![MatrixInstance {
            index: 0,
            values: IndexMap::new(),
        }]);
    };

    let mut total: usize = 1;
    for (dimension, values) in &strategy.matrix {
        if values.is_empty() {
            return Err(Error::EmptyMatrixDimension(dimension.clone()));
        }
        total = total.saturating_mul(values.len());
    }
    if total > MAX_MATRIX_COMBINATIONS {
        return Err(Error::MatrixLimit {
            count: total,
            limit: MAX_MATRIX_COMBINATIONS,
        });
    }

    let dimensions: Vec<(&String, &Vec<JsonValue>)> = strategy.matrix.iter().collect();
    let mut instances = Vec::with_capacity(total);
    for index in 0..total {
        // Rightmost dimension varies fastest, like nested loops in
        // declaration order.
        let mut values = IndexMap::with_capacity(dimensions.len());
        let mut stride = total;
        for (dimension, dim_values) in &dimensions {
            stride /= dim_values.len();
            let pick = (index / stride) % dim_values.len();
            values.insert((*dimension).clone(), dim_values[pick].clone());
        }
        instances.push(MatrixInstance { index, values });
    }
    Ok(instances)
}

/// Result of executing one job (all of its instances).
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success { outputs: HashMap<String, String> },
    Failure { message: String },
    Cancelled,
}

/// Runs a job's instances under the strategy's concurrency bound with
/// fail-fast cancellation.
pub struct MatrixExecutor {
    runner: StepRunner,
    replacer: Replacer,
    eval_timeout: Duration,
}

impl MatrixExecutor {
    pub fn new(runner: StepRunner, eval_timeout: Duration) -> Self {
        Self {
            runner,
            replacer: Replacer::new(),
            eval_timeout,
        }
    }

    pub async fn execute_job(
        &self,
        workflow_name: &str,
        job_name: &str,
        job: &Job,
        job_ctx: &EvalContext,
        cancel: &CancellationToken,
        state: &WorkflowState,
    ) -> Result<JobOutcome> {
        let instances = expand(job.strategy.as_ref())?;
        state.instances_initialized(
            job_name,
            instances.iter().map(MatrixInstance::assignment).collect(),
        );

        let fail_fast = job.strategy.as_ref().map(Strategy::fail_fast).unwrap_or(true);
        let max_parallel = job.strategy.as_ref().map(|s| s.max_parallel).unwrap_or(0);
        let semaphore = (max_parallel > 0).then(|| Arc::new(Semaphore::new(max_parallel)));
        let token = cancel.child_token();
        let outputs = OutputStore::new();

        debug!(
            job = job_name,
            instances = instances.len(),
            max_parallel,
            fail_fast,
            "executing job instances"
        );

        let futures = instances.iter().map(|instance| {
            let token = token.clone();
            let semaphore = semaphore.clone();
            let outputs = &outputs;
            let instance = instance.clone();
            async move {
                if token.is_cancelled() {
                    state.instance_concluded(job_name, instance.index, Conclusion::Cancelled);
                    return Ok(SequenceOutcome::Cancelled);
                }

                // Waiting for a slot is a cancellation point: instances
                // blocked on the semaphore when fail-fast fires never run.
                let _permit = match &semaphore {
                    Some(semaphore) => {
                        tokio::select! {
                            permit = semaphore.clone().acquire_owned() => {
                                Some(permit.map_err(|_| Error::Cancelled)?)
                            }
                            _ = token.cancelled() => {
                                state.instance_concluded(
                                    job_name,
                                    instance.index,
                                    Conclusion::Cancelled,
                                );
                                return Ok(SequenceOutcome::Cancelled);
                            }
                        }
                    }
                    None => None,
                };
                if token.is_cancelled() {
                    state.instance_concluded(job_name, instance.index, Conclusion::Cancelled);
                    return Ok(SequenceOutcome::Cancelled);
                }

                state.instance_started(job_name, instance.index);
                let mut ctx = job_ctx.with_matrix(&instance.values);
                let outcome = self
                    .runner
                    .run_sequence(
                        workflow_name,
                        job_name,
                        job,
                        instance.index,
                        &mut ctx,
                        outputs,
                        &token,
                        state,
                    )
                    .await;

                match &outcome {
                    Ok(SequenceOutcome::Success) => {
                        state.instance_concluded(job_name, instance.index, Conclusion::Success);
                    }
                    Ok(SequenceOutcome::Failure { step, message }) => {
                        warn!(
                            job = job_name,
                            instance = instance.index,
                            step = %step,
                            message = %message,
                            "instance failed"
                        );
                        state.instance_concluded(job_name, instance.index, Conclusion::Failure);
                        if fail_fast {
                            info!(job = job_name, "fail-fast cancelling sibling instances");
                            token.cancel();
                        }
                    }
                    Ok(SequenceOutcome::Cancelled) => {
                        state.instance_concluded(job_name, instance.index, Conclusion::Cancelled);
                    }
                    Err(_) => {
                        state.instance_concluded(job_name, instance.index, Conclusion::Failure);
                        token.cancel();
                    }
                }
                outcome
            }
        });

        // join_all keeps results in instance-index order regardless of
        // completion order.
        let results = join_all(futures).await;

        let mut failure: Option<(String, String)> = None;
        let mut cancelled = false;
        for result in results {
            match result? {
                SequenceOutcome::Success => {}
                SequenceOutcome::Failure { step, message } => {
                    if failure.is_none() {
                        failure = Some((step, message));
                    }
                }
                SequenceOutcome::Cancelled => cancelled = true,
            }
        }

        if let Some((step, message)) = failure {
            return Ok(JobOutcome::Failure {
                message: format!("step {step} failed: {message}"),
            });
        }
        if cancelled {
            return Ok(JobOutcome::Cancelled);
        }

        let job_outputs = self.evaluate_outputs(job, job_ctx, &outputs).await?;
        Ok(JobOutcome::Success {
            outputs: job_outputs,
        })
    }

    /// Job `outputs` expressions are rendered against the job context plus
    /// every captured step output (instances merged, later writers win).
    async fn evaluate_outputs(
        &self,
        job: &Job,
        job_ctx: &EvalContext,
        outputs: &OutputStore,
    ) -> Result<HashMap<String, String>> {
        if job.outputs.is_empty() {
            return Ok(HashMap::new());
        }
        let mut ctx = job_ctx.clone();
        for (step_id, captured) in outputs.snapshot() {
            for (key, value) in captured {
                ctx.set_step_output(&step_id, &key, &value);
            }
        }
        let mut rendered = HashMap::with_capacity(job.outputs.len());
        for (name, expression) in &job.outputs {
            let value = self
                .replacer
                .render_str(expression, &ctx, self.eval_timeout)
                .await?;
            rendered.insert(name.clone(), value);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy(yaml: &str) -> Strategy {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_no_strategy_yields_single_instance() {
        let instances = expand(None).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].index, 0);
        assert!(instances[0].values.is_empty());
    }

    #[test]
    fn test_cartesian_product_size_and_distinctness() {
        let strategy = strategy(
            r#"
matrix:
  os: [linux, mac]
  arch: [x86, arm, riscv]
"#,
        );
        let instances = expand(Some(&strategy)).unwrap();
        assert_eq!(instances.len(), 6);
        for (expected, instance) in instances.iter().enumerate() {
            assert_eq!(instance.index, expected);
        }
        let mut combos: Vec<String> = instances
            .iter()
            .map(|i| format!("{:?}", i.values))
            .collect();
        combos.sort();
        combos.dedup();
        assert_eq!(combos.len(), 6);
    }

    #[test]
    fn test_declaration_order_with_rightmost_fastest() {
        let strategy = strategy(
            r#"
matrix:
  os: [linux, mac]
  arch: [x86, arm]
"#,
        );
        let instances = expand(Some(&strategy)).unwrap();
        assert_eq!(instances[0].values["os"], json!("linux"));
        assert_eq!(instances[0].values["arch"], json!("x86"));
        assert_eq!(instances[1].values["os"], json!("linux"));
        assert_eq!(instances[1].values["arch"], json!("arm"));
        assert_eq!(instances[2].values["os"], json!("mac"));
        assert_eq!(instances[2].values["arch"], json!("x86"));
    }

    #[test]
    fn test_empty_dimension_is_an_error() {
        let strategy = strategy("matrix:\n  os: []\n");
        let err = expand(Some(&strategy)).unwrap_err();
        assert!(matches!(err, Error::EmptyMatrixDimension(ref d) if d == "os"));
    }

    #[test]
    fn test_expansion_rechecks_limit() {
        let values: Vec<String> = (0..17).map(|i| format!("v{i}")).collect();
        let yaml = format!(
            "matrix:\n  a: [{0}]\n  b: [{0}]\n",
            values.join(", ")
        );
        let strategy = strategy(&yaml);
        let err = expand(Some(&strategy)).unwrap_err();
        let Error::MatrixLimit { count, limit } = err else {
            panic!("expected matrix limit error");
        };
        assert_eq!(count, 289);
        assert_eq!(limit, MAX_MATRIX_COMBINATIONS);
    }

    #[test]
    fn test_assignment_renders_scalars() {
        let strategy = strategy("matrix:\n  port: [8080]\n  tls: [true]\n");
        let instances = expand(Some(&strategy)).unwrap();
        let assignment = instances[0].assignment();
        assert_eq!(assignment["port"], "8080");
        assert_eq!(assignment["tls"], "true");
    }
}
