//! Concurrency-safe observation tree for external reporting.
//!
//! Mirrors graph and matrix execution: workflow, job, matrix-instance and
//! step state with status, conclusion, attempts, duration and error
//! classification. Created at workflow start, updated incrementally as
//! units transition, never deleted during a run. All mutation goes through
//! the container's reader/writer lock.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Conclusion {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepState {
    pub index: usize,
    pub id: Option<String>,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub timed_out: bool,
    pub error_class: Option<String>,
}

impl StepState {
    pub fn skipped(index: usize, id: Option<String>) -> Self {
        Self {
            index,
            id,
            status: Status::Completed,
            conclusion: Some(Conclusion::Skipped),
            attempts: 0,
            duration: Duration::ZERO,
            timed_out: false,
            error_class: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixInstanceState {
    pub index: usize,
    pub assignment: IndexMap<String, String>,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    pub steps: Vec<StepState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outputs: IndexMap<String, String>,
    pub instances: Vec<MatrixInstanceState>,
}

impl JobState {
    fn pending() -> Self {
        Self {
            status: Status::Pending,
            conclusion: None,
            started_at: None,
            completed_at: None,
            outputs: IndexMap::new(),
            instances: Vec::new(),
        }
    }
}

/// Cloneable point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub run_id: Uuid,
    pub name: String,
    pub status: Status,
    pub conclusion: Option<Conclusion>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs: IndexMap<String, JobState>,
}

#[derive(Debug)]
pub struct WorkflowState {
    inner: RwLock<WorkflowSnapshot>,
}

impl WorkflowState {
    pub fn new(name: &str, job_names: impl IntoIterator<Item = String>) -> Self {
        let jobs = job_names
            .into_iter()
            .map(|job| (job, JobState::pending()))
            .collect();
        Self {
            inner: RwLock::new(WorkflowSnapshot {
                run_id: Uuid::new_v4(),
                name: name.to_string(),
                status: Status::Running,
                conclusion: None,
                started_at: Utc::now(),
                completed_at: None,
                jobs,
            }),
        }
    }

    pub fn job_started(&self, name: &str) {
        self.with_job(name, |job| {
            job.status = Status::Running;
            job.started_at = Some(Utc::now());
        });
    }

    pub fn job_skipped(&self, name: &str) {
        self.with_job(name, |job| {
            job.status = Status::Completed;
            job.conclusion = Some(Conclusion::Skipped);
            job.completed_at = Some(Utc::now());
        });
    }

    pub fn job_concluded(&self, name: &str, conclusion: Conclusion) {
        self.with_job(name, |job| {
            job.status = Status::Completed;
            job.conclusion = Some(conclusion);
            job.completed_at = Some(Utc::now());
        });
    }

    pub fn job_succeeded(&self, name: &str, outputs: IndexMap<String, String>) {
        self.with_job(name, |job| {
            job.status = Status::Completed;
            job.conclusion = Some(Conclusion::Success);
            job.completed_at = Some(Utc::now());
            job.outputs = outputs;
        });
    }

    /// Register the expanded instances for a job before any of them start;
    /// the slot vector keeps result order deterministic by index.
    pub fn instances_initialized(
        &self,
        name: &str,
        assignments: Vec<IndexMap<String, String>>,
    ) {
        self.with_job(name, |job| {
            job.instances = assignments
                .into_iter()
                .enumerate()
                .map(|(index, assignment)| MatrixInstanceState {
                    index,
                    assignment,
                    status: Status::Pending,
                    conclusion: None,
                    steps: Vec::new(),
                })
                .collect();
        });
    }

    pub fn instance_started(&self, name: &str, index: usize) {
        self.with_instance(name, index, |instance| {
            instance.status = Status::Running;
        });
    }

    pub fn instance_concluded(&self, name: &str, index: usize, conclusion: Conclusion) {
        self.with_instance(name, index, |instance| {
            instance.status = Status::Completed;
            instance.conclusion = Some(conclusion);
        });
    }

    pub fn step_recorded(&self, name: &str, instance: usize, step: StepState) {
        self.with_instance(name, instance, |state| {
            state.steps.push(step);
        });
    }

    pub fn finish(&self, conclusion: Conclusion) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.status = Status::Completed;
        inner.conclusion = Some(conclusion);
        inner.completed_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.inner.read().expect("state lock poisoned").clone()
    }

    fn with_job(&self, name: &str, update: impl FnOnce(&mut JobState)) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        if let Some(job) = inner.jobs.get_mut(name) {
            update(job);
        }
    }

    fn with_instance(
        &self,
        name: &str,
        index: usize,
        update: impl FnOnce(&mut MatrixInstanceState),
    ) {
        self.with_job(name, |job| {
            if let Some(instance) = job.instances.get_mut(index) {
                update(instance);
            }
        });
    }
}
