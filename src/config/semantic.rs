//! Stage-2 semantic validation: cross-field domain rules a structural
//! schema cannot express. Runs on the typed model, reports through the same
//! line-mapped, aggregated error channel as the schema stage.

use std::collections::HashSet;

use regex::Regex;

use super::parser::ParsedWorkflow;
use super::validation::{snippet_around, FieldError, ValidationReport};
use super::workflow::{Job, Step, MAX_MATRIX_COMBINATIONS};
use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::registry::NodeRegistry;

const MAX_POOL_NAME_LEN: usize = 255;
const MAX_TIMEOUT_MINUTES: u64 = 1440;
const MIN_RETRY_ATTEMPTS: u32 = 1;
const MAX_RETRY_ATTEMPTS: u32 = 10;

pub struct SemanticValidator<'a> {
    registry: &'a dyn NodeRegistry,
    pool_pattern: Regex,
}

impl<'a> SemanticValidator<'a> {
    pub fn new(registry: &'a dyn NodeRegistry) -> Self {
        Self {
            registry,
            // alphanumeric with internal hyphens only
            pool_pattern: Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*[A-Za-z0-9]$")
                .expect("invalid pool pattern"),
        }
    }

    pub fn validate(&self, parsed: &ParsedWorkflow) -> ValidationReport {
        let mut report = ValidationReport::new();

        for (job_name, job) in &parsed.workflow.jobs {
            let path = format!("jobs.{job_name}");
            self.validate_pool(parsed, &mut report, &path, job);
            self.validate_needs(parsed, &mut report, &path, job_name, job);
            self.validate_strategy(parsed, &mut report, &path, job);
            self.validate_timeout(parsed, &mut report, &path, job.timeout_minutes);

            let mut seen_ids: HashSet<&str> = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                let step_path = format!("{path}.steps.{index}");
                self.validate_step(parsed, &mut report, &step_path, step);
                self.validate_timeout(parsed, &mut report, &step_path, step.timeout_minutes);
                if let Some(id) = &step.id {
                    if !seen_ids.insert(id.as_str()) {
                        push(
                            parsed,
                            &mut report,
                            format!("{step_path}.id"),
                            format!("duplicate step id '{id}'"),
                            Some("step ids must be unique within a job".to_string()),
                        );
                    }
                }
            }
        }

        // Cycle detection only makes sense once every edge resolves.
        let graph = DependencyGraph::new(&parsed.workflow);
        if let Err(Error::CircularDependency { path }) = graph.validate_dependencies() {
            push(
                parsed,
                &mut report,
                "jobs".to_string(),
                format!("circular dependency: {path}"),
                Some("break the cycle by removing one of the needs edges".to_string()),
            );
        }

        report
    }

    fn validate_pool(
        &self,
        parsed: &ParsedWorkflow,
        report: &mut ValidationReport,
        path: &str,
        job: &Job,
    ) {
        if job.runs_on.len() > MAX_POOL_NAME_LEN || !self.pool_pattern.is_match(&job.runs_on) {
            push(
                parsed,
                report,
                format!("{path}.runs-on"),
                format!("'{}' is not a valid pool name", job.runs_on),
                Some(
                    "pool names are alphanumeric with internal hyphens, at most 255 characters"
                        .to_string(),
                ),
            );
        }
    }

    fn validate_needs(
        &self,
        parsed: &ParsedWorkflow,
        report: &mut ValidationReport,
        path: &str,
        job_name: &str,
        job: &Job,
    ) {
        for (index, needed) in job.needs.iter().enumerate() {
            if !parsed.workflow.jobs.contains_key(needed) {
                push(
                    parsed,
                    report,
                    format!("{path}.needs.{index}"),
                    format!("job '{job_name}' depends on unknown job '{needed}'"),
                    Some(format!(
                        "declared jobs: {}",
                        parsed
                            .workflow
                            .jobs
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                );
            }
        }
    }

    fn validate_strategy(
        &self,
        parsed: &ParsedWorkflow,
        report: &mut ValidationReport,
        path: &str,
        job: &Job,
    ) {
        let Some(strategy) = &job.strategy else {
            return;
        };
        if strategy.include.is_some() {
            push(
                parsed,
                report,
                format!("{path}.strategy.include"),
                "matrix 'include' is not supported".to_string(),
                Some("enumerate the combinations as explicit dimensions".to_string()),
            );
        }
        if strategy.exclude.is_some() {
            push(
                parsed,
                report,
                format!("{path}.strategy.exclude"),
                "matrix 'exclude' is not supported".to_string(),
                Some("enumerate the combinations as explicit dimensions".to_string()),
            );
        }

        let mut combinations: usize = 1;
        for (dimension, values) in &strategy.matrix {
            if values.is_empty() {
                push(
                    parsed,
                    report,
                    format!("{path}.strategy.matrix.{dimension}"),
                    format!("matrix dimension '{dimension}' has no values"),
                    None,
                );
            }
            combinations = combinations.saturating_mul(values.len());
        }
        if combinations > MAX_MATRIX_COMBINATIONS {
            push(
                parsed,
                report,
                format!("{path}.strategy.matrix"),
                format!(
                    "matrix produces {combinations} combinations, exceeding the limit of {MAX_MATRIX_COMBINATIONS}"
                ),
                Some("reduce dimension sizes or split the job".to_string()),
            );
        }
    }

    fn validate_timeout(
        &self,
        parsed: &ParsedWorkflow,
        report: &mut ValidationReport,
        path: &str,
        timeout: Option<u64>,
    ) {
        if let Some(minutes) = timeout {
            if minutes > MAX_TIMEOUT_MINUTES {
                push(
                    parsed,
                    report,
                    format!("{path}.timeout-minutes"),
                    format!("timeout of {minutes} minutes is outside 0..={MAX_TIMEOUT_MINUTES}"),
                    None,
                );
            }
        }
    }

    fn validate_step(
        &self,
        parsed: &ParsedWorkflow,
        report: &mut ValidationReport,
        path: &str,
        step: &Step,
    ) {
        match self.registry.get(&step.uses) {
            Err(_) => {
                push(
                    parsed,
                    report,
                    format!("{path}.uses"),
                    format!("node '{}' is not registered", step.uses),
                    node_suggestion(self.registry, &step.uses),
                );
            }
            Ok(spec) => {
                for param in spec.required_params() {
                    if !step.with.contains_key(&param.name) {
                        push(
                            parsed,
                            report,
                            format!("{path}.with"),
                            format!(
                                "node '{}' requires parameter '{}'",
                                step.uses, param.name
                            ),
                            Some(format!("add '{}' to the with block", param.name)),
                        );
                    }
                }
                for name in step.with.keys() {
                    if !spec.declares(name) {
                        push(
                            parsed,
                            report,
                            format!("{path}.with.{name}"),
                            format!("node '{}' does not declare parameter '{name}'", step.uses),
                            Some(format!(
                                "declared parameters: {}",
                                spec.params
                                    .iter()
                                    .map(|p| p.name.clone())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            )),
                        );
                    }
                }
            }
        }

        if let Some(retry) = &step.retry_strategy {
            let retry_path = format!("{path}.retry-strategy");
            if let Some(attempts) = retry.max_attempts {
                if !(MIN_RETRY_ATTEMPTS..=MAX_RETRY_ATTEMPTS).contains(&attempts) {
                    push(
                        parsed,
                        report,
                        format!("{retry_path}.max-attempts"),
                        format!(
                            "max-attempts of {attempts} is outside {MIN_RETRY_ATTEMPTS}..={MAX_RETRY_ATTEMPTS}"
                        ),
                        None,
                    );
                }
            }
            if let Some(coefficient) = retry.backoff_coefficient {
                if coefficient < 1.0 {
                    push(
                        parsed,
                        report,
                        format!("{retry_path}.backoff-coefficient"),
                        format!("backoff-coefficient of {coefficient} must be at least 1.0"),
                        None,
                    );
                }
            }
        }
    }
}

fn push(
    parsed: &ParsedWorkflow,
    report: &mut ValidationReport,
    path: String,
    message: String,
    suggestion: Option<String>,
) {
    let line = parsed.lines.line_or_parent(&path);
    report.push(FieldError {
        line,
        path,
        message,
        snippet: line.map(|l| snippet_around(&parsed.source, l)),
        suggestion,
    });
}

fn node_suggestion(registry: &dyn NodeRegistry, uses: &str) -> Option<String> {
    let wanted = uses.split('@').next().unwrap_or(uses);
    let close: Vec<String> = registry
        .list()
        .into_iter()
        .filter(|id| id.split('@').next() == Some(wanted))
        .collect();
    if close.is_empty() {
        Some(format!("registered nodes: {}", registry.list().join(", ")))
    } else {
        Some(format!("did you mean {}?", close.join(" or ")))
    }
}
