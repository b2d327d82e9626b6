//! Execution engine: orchestration rounds, matrix expansion, step
//! execution, policy resolution, and the run-state tree.

mod backend;
mod matrix;
mod orchestrator;
mod output;
mod retry;
mod state;
mod step;
mod timeout;

pub use backend::{LocalBackend, StepBackend, StepExecution, StepInvocation, StepStatus};
pub use matrix::{expand, JobOutcome, MatrixExecutor, MatrixInstance};
pub use orchestrator::{
    JobExecutor, MatrixJobExecutor, Orchestrator, RunOptions, DEFAULT_EVAL_TIMEOUT,
};
pub use output::{parse_outputs, OutputStore};
pub use retry::{
    RetryPolicy, DEFAULT_BACKOFF_COEFFICIENT, DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_INTERVAL,
};
pub use state::{
    Conclusion, JobState, MatrixInstanceState, Status, StepState, WorkflowSnapshot, WorkflowState,
};
pub use step::{SequenceOutcome, StepRunner};
pub use timeout::{resolve_job_timeout, resolve_step_timeout, DEFAULT_TIMEOUT_MINUTES};
