//! Round-based job scheduling over the dependency graph.
//!
//! Each round runs every ready job concurrently and waits for the whole
//! round. A job's context is derived from the workflow base context plus a
//! `needs` map built from completed dependencies' captured outputs. Any job
//! error cancels the round's shared token and becomes the single error
//! surfaced to the caller; no further rounds run after an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::StepBackend;
use super::matrix::{JobOutcome, MatrixExecutor};
use super::state::{Conclusion, WorkflowSnapshot, WorkflowState};
use super::step::StepRunner;
use super::timeout::resolve_job_timeout;
use crate::config::{Job, Workflow};
use crate::error::{Error, Result};
use crate::expr::{EvalContext, Evaluator};
use crate::graph::DependencyGraph;

/// Per-expression evaluation deadline used when the caller does not supply
/// one.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Caller-supplied run inputs: the `inputs`/`secrets` scopes and `vars`
/// overrides layered over the document's own.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub inputs: IndexMap<String, JsonValue>,
    pub secrets: IndexMap<String, JsonValue>,
    pub vars: IndexMap<String, JsonValue>,
    pub eval_timeout: Option<Duration>,
}

/// Executes one job to a terminal outcome. The production implementation
/// is matrix-backed; tests substitute doubles to script outcomes and
/// observe ordering.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        workflow: &str,
        name: &str,
        job: &Job,
        ctx: &EvalContext,
        cancel: &CancellationToken,
        state: &WorkflowState,
    ) -> Result<JobOutcome>;
}

/// Production executor: expands the job's matrix and runs instances
/// through the step runner against the configured backend.
pub struct MatrixJobExecutor {
    matrix: MatrixExecutor,
}

impl MatrixJobExecutor {
    pub fn new(backend: Arc<dyn StepBackend>, eval_timeout: Duration) -> Self {
        Self {
            matrix: MatrixExecutor::new(StepRunner::new(backend, eval_timeout), eval_timeout),
        }
    }
}

#[async_trait]
impl JobExecutor for MatrixJobExecutor {
    async fn execute(
        &self,
        workflow: &str,
        name: &str,
        job: &Job,
        ctx: &EvalContext,
        cancel: &CancellationToken,
        state: &WorkflowState,
    ) -> Result<JobOutcome> {
        self.matrix
            .execute_job(workflow, name, job, ctx, cancel, state)
            .await
    }
}

pub struct Orchestrator {
    executor: Arc<dyn JobExecutor>,
    evaluator: Evaluator,
    options: RunOptions,
    eval_timeout: Duration,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn JobExecutor>, options: RunOptions) -> Self {
        let eval_timeout = options.eval_timeout.unwrap_or(DEFAULT_EVAL_TIMEOUT);
        Self {
            executor,
            evaluator: Evaluator::new(),
            options,
            eval_timeout,
        }
    }

    /// Wire the production executor over a step backend.
    pub fn with_backend(backend: Arc<dyn StepBackend>, options: RunOptions) -> Self {
        let eval_timeout = options.eval_timeout.unwrap_or(DEFAULT_EVAL_TIMEOUT);
        Self::new(
            Arc::new(MatrixJobExecutor::new(backend, eval_timeout)),
            options,
        )
    }

    /// Drive the workflow to completion. Dependency validation runs before
    /// any execution; the returned snapshot is the final state tree.
    pub async fn run(&self, workflow: &Workflow) -> Result<WorkflowSnapshot> {
        let graph = DependencyGraph::new(workflow);
        graph.validate_dependencies()?;

        let state = WorkflowState::new(&workflow.name, workflow.jobs.keys().cloned());
        let mut base_ctx = EvalContext::for_workflow(
            workflow,
            self.options.inputs.clone(),
            self.options.secrets.clone(),
        );
        for (key, value) in &self.options.vars {
            base_ctx.set_var(key, value.clone());
        }

        info!(workflow = %workflow.name, jobs = workflow.jobs.len(), "starting workflow");

        loop {
            let mut ready = graph.ready_jobs();
            if ready.is_empty() {
                break;
            }
            ready.sort();
            debug!(round = ?ready, "scheduling round");

            let token = CancellationToken::new();
            let futures = ready.iter().map(|name| {
                self.run_job(workflow, name, &graph, &base_ctx, &token, &state)
            });
            let results = join_all(futures).await;

            if let Some(err) = results.into_iter().find_map(Result::err) {
                state.finish(Conclusion::Failure);
                return Err(err);
            }
        }

        let starved = graph.pending_jobs();
        if !starved.is_empty() {
            warn!(jobs = ?starved, "jobs never became ready; their dependencies did not complete");
        }

        state.finish(Conclusion::Success);
        Ok(state.snapshot())
    }

    async fn run_job(
        &self,
        workflow: &Workflow,
        name: &str,
        graph: &DependencyGraph,
        base_ctx: &EvalContext,
        token: &CancellationToken,
        state: &WorkflowState,
    ) -> Result<()> {
        let job = &workflow.jobs[name];

        // Dependency outputs are only readable once the dependency is
        // completed; every entry here is, because the job is ready.
        let mut needs_outputs = IndexMap::new();
        for needed in &job.needs {
            let outputs = graph
                .outputs_of(needed)
                .ok_or_else(|| Error::Execution(format!("dependency '{needed}' not completed")))?;
            needs_outputs.insert(needed.clone(), outputs.into_iter().collect());
        }
        let ctx = base_ctx.for_job(name, job, needs_outputs);

        if let Some(condition) = &job.condition {
            match self
                .evaluator
                .evaluate_condition(condition, &ctx, self.eval_timeout)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(job = name, "condition false, skipping job");
                    graph.mark_skipped(name)?;
                    state.job_skipped(name);
                    return Ok(());
                }
                Err(err) => {
                    graph.mark_running(name)?;
                    graph.mark_failed(name)?;
                    state.job_concluded(name, Conclusion::Failure);
                    token.cancel();
                    return Err(err.into());
                }
            }
        }

        graph.mark_running(name)?;
        state.job_started(name);

        let job_timeout = resolve_job_timeout(job.timeout_minutes);
        let execution = tokio::time::timeout(
            job_timeout,
            self.executor
                .execute(&workflow.name, name, job, &ctx, token, state),
        )
        .await;

        let Ok(outcome) = execution else {
            graph.mark_failed(name)?;
            state.job_concluded(name, Conclusion::Failure);
            token.cancel();
            return Err(Error::JobFailed {
                job: name.to_string(),
                message: format!("timed out after {} minutes", job_timeout.as_secs() / 60),
            });
        };

        match outcome {
            Ok(JobOutcome::Success { outputs }) => {
                state.job_succeeded(name, outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
                graph.mark_completed(name, outputs)?;
                info!(job = name, "job completed");
                Ok(())
            }
            Ok(JobOutcome::Failure { message }) => {
                graph.mark_failed(name)?;
                state.job_concluded(name, Conclusion::Failure);
                if job.continue_on_error {
                    warn!(job = name, message = %message, "job failed, continue-on-error set");
                    return Ok(());
                }
                token.cancel();
                Err(Error::JobFailed {
                    job: name.to_string(),
                    message,
                })
            }
            Ok(JobOutcome::Cancelled) => {
                // A sibling's failure is the error that surfaces; this job
                // just records the cancellation.
                graph.mark_failed(name)?;
                state.job_concluded(name, Conclusion::Cancelled);
                Ok(())
            }
            Err(err) => {
                graph.mark_failed(name)?;
                state.job_concluded(name, Conclusion::Failure);
                token.cancel();
                Err(err)
            }
        }
    }
}
