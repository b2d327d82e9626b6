//! Step sequence execution for one job instance.
//!
//! For each step: poll cancellation, evaluate the `if` condition, render
//! `with` and env through the replacer, resolve the effective timeout and
//! retry policy, dispatch to the backend, and capture protocol outputs
//! under the step id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{StepBackend, StepInvocation, StepStatus};
use super::output::{parse_outputs, OutputStore};
use super::retry::RetryPolicy;
use super::state::{Conclusion, Status, StepState, WorkflowState};
use super::timeout::resolve_step_timeout;
use crate::config::Job;
use crate::error::{Error, ErrorClass, Result};
use crate::expr::{EvalContext, Evaluator, Replacer};

/// Terminal result of one instance's step sequence.
#[derive(Debug, Clone)]
pub enum SequenceOutcome {
    Success,
    Failure { step: String, message: String },
    Cancelled,
}

pub struct StepRunner {
    backend: Arc<dyn StepBackend>,
    evaluator: Evaluator,
    replacer: Replacer,
    eval_timeout: Duration,
}

impl StepRunner {
    pub fn new(backend: Arc<dyn StepBackend>, eval_timeout: Duration) -> Self {
        Self {
            backend,
            evaluator: Evaluator::new(),
            replacer: Replacer::new(),
            eval_timeout,
        }
    }

    /// Run a job instance's steps in order. The context accumulates step
    /// outputs as they are captured; the shared store makes them visible to
    /// the job's `outputs` expressions afterwards.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_sequence(
        &self,
        workflow_name: &str,
        job_name: &str,
        job: &Job,
        instance: usize,
        ctx: &mut EvalContext,
        outputs: &OutputStore,
        cancel: &CancellationToken,
        state: &WorkflowState,
    ) -> Result<SequenceOutcome> {
        for (index, step) in job.steps.iter().enumerate() {
            // Cancellation is polled between steps, never mid-step.
            if cancel.is_cancelled() {
                return Ok(SequenceOutcome::Cancelled);
            }

            let step_id = step.display_id(index);
            let step_ctx = ctx.with_env(&step.env);

            let should_run = self
                .evaluator
                .evaluate_condition(
                    step.condition.as_deref().unwrap_or(""),
                    &step_ctx,
                    self.eval_timeout,
                )
                .await?;
            if !should_run {
                debug!(job = job_name, step = %step_id, "condition false, skipping");
                state.step_recorded(job_name, instance, StepState::skipped(index, step.id.clone()));
                continue;
            }

            let params = self
                .replacer
                .render_params(&step.with, &step_ctx, self.eval_timeout)
                .await?;
            let env = self
                .replacer
                .render_env(&step.env, &step_ctx, self.eval_timeout)
                .await?;

            let timeout = resolve_step_timeout(step.timeout_minutes, job.timeout_minutes);
            let retry = RetryPolicy::resolve(step.retry_strategy.as_ref());
            let invocation = StepInvocation {
                workflow: workflow_name.to_string(),
                job: job_name.to_string(),
                step: step_id.clone(),
                uses: step.uses.clone(),
                params,
                env,
            };

            let started = Instant::now();
            let result = self
                .backend
                .execute(invocation, timeout, retry, cancel)
                .await;
            let duration = started.elapsed();

            match result {
                Ok(execution) => {
                    if let Some(id) = &step.id {
                        let parsed = parse_outputs(&execution.lines);
                        for (key, value) in &parsed {
                            ctx.set_step_output(id, key, value);
                        }
                        outputs.record(id, parsed);
                    }

                    let failed = execution.status == StepStatus::Failure;
                    state.step_recorded(
                        job_name,
                        instance,
                        StepState {
                            index,
                            id: step.id.clone(),
                            status: Status::Completed,
                            conclusion: Some(if failed {
                                Conclusion::Failure
                            } else {
                                Conclusion::Success
                            }),
                            attempts: execution.attempts,
                            duration,
                            timed_out: false,
                            error_class: failed.then(|| ErrorClass::Execution.as_str().to_string()),
                        },
                    );

                    if failed {
                        let message = execution
                            .error
                            .unwrap_or_else(|| "step concluded failure".to_string());
                        if step.continue_on_error {
                            info!(
                                job = job_name,
                                step = %step_id,
                                "step failed but continue-on-error is set"
                            );
                            continue;
                        }
                        ctx.flags.failed = true;
                        return Ok(SequenceOutcome::Failure {
                            step: step_id,
                            message,
                        });
                    }
                }
                Err(Error::Cancelled) => {
                    state.step_recorded(
                        job_name,
                        instance,
                        StepState {
                            index,
                            id: step.id.clone(),
                            status: Status::Completed,
                            conclusion: Some(Conclusion::Cancelled),
                            attempts: 0,
                            duration,
                            timed_out: false,
                            error_class: Some(ErrorClass::Cancelled.as_str().to_string()),
                        },
                    );
                    return Ok(SequenceOutcome::Cancelled);
                }
                Err(err) => {
                    let timed_out = err.class() == ErrorClass::Timeout;
                    state.step_recorded(
                        job_name,
                        instance,
                        StepState {
                            index,
                            id: step.id.clone(),
                            status: Status::Completed,
                            conclusion: Some(Conclusion::Failure),
                            attempts: 0,
                            duration,
                            timed_out,
                            error_class: Some(err.class().as_str().to_string()),
                        },
                    );
                    if step.continue_on_error {
                        info!(
                            job = job_name,
                            step = %step_id,
                            error = %err,
                            "step errored but continue-on-error is set"
                        );
                        continue;
                    }
                    ctx.flags.failed = true;
                    return Ok(SequenceOutcome::Failure {
                        step: step_id,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(SequenceOutcome::Success)
    }
}
