//! Stage-1 structural validation.
//!
//! Checks the raw document tree against the fixed document shape: required
//! fields, field types, name patterns, unknown fields. Violations are
//! line-mapped through the parser's side-channel and collected in full;
//! nothing here consults the node registry or crosses field boundaries
//! (that is stage 2, `semantic.rs`).

use regex::Regex;
use serde_yaml::Value as YamlValue;

use super::parser::RawDocument;
use super::validation::{snippet_around, FieldError, ValidationReport};

const ROOT_FIELDS: &[&str] = &["name", "on", "vars", "env", "jobs"];
const JOB_FIELDS: &[&str] = &[
    "runs-on",
    "timeout-minutes",
    "needs",
    "if",
    "strategy",
    "env",
    "steps",
    "continue-on-error",
    "outputs",
];
const STEP_FIELDS: &[&str] = &[
    "id",
    "name",
    "uses",
    "with",
    "timeout-minutes",
    "continue-on-error",
    "if",
    "retry-strategy",
    "env",
];
const STRATEGY_FIELDS: &[&str] = &["matrix", "max-parallel", "fail-fast", "include", "exclude"];
const RETRY_FIELDS: &[&str] = &[
    "max-attempts",
    "initial-interval",
    "backoff-coefficient",
    "max-interval",
];

pub struct SchemaValidator {
    name_pattern: Regex,
    uses_pattern: Regex,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            name_pattern: Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("invalid name pattern"),
            uses_pattern: Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*@[A-Za-z0-9][A-Za-z0-9_.-]*$")
                .expect("invalid uses pattern"),
        }
    }

    pub fn validate(&self, doc: &RawDocument) -> ValidationReport {
        let mut checker = Checker {
            doc,
            report: ValidationReport::new(),
        };

        let Some(root) = doc.value.as_mapping() else {
            checker.wrong_type("", "a mapping", &doc.value);
            return checker.report;
        };

        checker.unknown_fields("", root, ROOT_FIELDS);

        match doc.value.get("name") {
            None => checker.missing("", "name"),
            Some(value) => {
                if value.as_str().is_none_or(str::is_empty) {
                    checker.wrong_type("name", "a non-empty string", value);
                }
            }
        }

        if let Some(vars) = doc.value.get("vars") {
            if !vars.is_mapping() {
                checker.wrong_type("vars", "a mapping", vars);
            }
        }
        if let Some(env) = doc.value.get("env") {
            checker.string_map("env", env);
        }

        match doc.value.get("jobs") {
            None => checker.missing("", "jobs"),
            Some(jobs) => match jobs.as_mapping() {
                None => checker.wrong_type("jobs", "a mapping of job names", jobs),
                Some(mapping) if mapping.is_empty() => {
                    checker.error(
                        "jobs",
                        "workflow declares no jobs".to_string(),
                        Some("add at least one job".to_string()),
                    );
                }
                Some(mapping) => {
                    for (key, job) in mapping {
                        let Some(job_name) = key.as_str() else {
                            checker.wrong_type("jobs", "string job names", key);
                            continue;
                        };
                        let path = format!("jobs.{job_name}");
                        if !self.name_pattern.is_match(job_name) {
                            checker.pattern(
                                &path,
                                &format!("job name '{job_name}' is not a valid identifier"),
                                "letters, digits, '_' and '-', not starting with a digit",
                            );
                        }
                        self.validate_job(&mut checker, &path, job);
                    }
                }
            },
        }

        checker.report
    }

    fn validate_job(&self, checker: &mut Checker, path: &str, job: &YamlValue) {
        let Some(mapping) = job.as_mapping() else {
            checker.wrong_type(path, "a mapping", job);
            return;
        };
        checker.unknown_fields(path, mapping, JOB_FIELDS);

        checker.optional_string(path, "runs-on", job);
        checker.optional_number(path, "timeout-minutes", job);
        checker.optional_string(path, "if", job);
        checker.optional_bool(path, "continue-on-error", job);

        if let Some(needs) = job.get("needs") {
            match needs.as_sequence() {
                None => checker.wrong_type(
                    &format!("{path}.needs"),
                    "a list of job names",
                    needs,
                ),
                Some(entries) => {
                    for (index, entry) in entries.iter().enumerate() {
                        if !entry.is_string() {
                            checker.wrong_type(
                                &format!("{path}.needs.{index}"),
                                "a job name string",
                                entry,
                            );
                        }
                    }
                }
            }
        }

        if let Some(env) = job.get("env") {
            checker.string_map(&format!("{path}.env"), env);
        }
        if let Some(outputs) = job.get("outputs") {
            checker.string_map(&format!("{path}.outputs"), outputs);
        }
        if let Some(strategy) = job.get("strategy") {
            self.validate_strategy(checker, &format!("{path}.strategy"), strategy);
        }

        match job.get("steps") {
            None => checker.missing(path, "steps"),
            Some(steps) => match steps.as_sequence() {
                None => checker.wrong_type(&format!("{path}.steps"), "a list of steps", steps),
                Some(entries) if entries.is_empty() => checker.error(
                    format!("{path}.steps"),
                    "job declares no steps".to_string(),
                    Some("add at least one step".to_string()),
                ),
                Some(entries) => {
                    for (index, step) in entries.iter().enumerate() {
                        self.validate_step(checker, &format!("{path}.steps.{index}"), step);
                    }
                }
            },
        }
    }

    fn validate_strategy(&self, checker: &mut Checker, path: &str, strategy: &YamlValue) {
        let Some(mapping) = strategy.as_mapping() else {
            checker.wrong_type(path, "a mapping", strategy);
            return;
        };
        checker.unknown_fields(path, mapping, STRATEGY_FIELDS);
        checker.optional_number(path, "max-parallel", strategy);
        checker.optional_bool(path, "fail-fast", strategy);

        if let Some(matrix) = strategy.get("matrix") {
            match matrix.as_mapping() {
                None => checker.wrong_type(
                    &format!("{path}.matrix"),
                    "a mapping of dimension lists",
                    matrix,
                ),
                Some(dimensions) => {
                    for (key, values) in dimensions {
                        let dim = key.as_str().unwrap_or_default();
                        if !values.is_sequence() {
                            checker.wrong_type(
                                &format!("{path}.matrix.{dim}"),
                                "a list of values",
                                values,
                            );
                        }
                    }
                }
            }
        }
    }

    fn validate_step(&self, checker: &mut Checker, path: &str, step: &YamlValue) {
        let Some(mapping) = step.as_mapping() else {
            checker.wrong_type(path, "a mapping", step);
            return;
        };
        checker.unknown_fields(path, mapping, STEP_FIELDS);

        match step.get("uses") {
            None => checker.missing(path, "uses"),
            Some(uses) => match uses.as_str() {
                None => checker.wrong_type(&format!("{path}.uses"), "a node identifier", uses),
                Some(identifier) if !self.uses_pattern.is_match(identifier) => {
                    checker.pattern(
                        &format!("{path}.uses"),
                        &format!("'{identifier}' is not a valid node identifier"),
                        "use the form name@version, e.g. shell@v1",
                    );
                }
                Some(_) => {}
            },
        }

        if let Some(id) = step.get("id") {
            match id.as_str() {
                None => checker.wrong_type(&format!("{path}.id"), "a string", id),
                Some(identifier) if !self.name_pattern.is_match(identifier) => checker.pattern(
                    &format!("{path}.id"),
                    &format!("step id '{identifier}' is not a valid identifier"),
                    "letters, digits, '_' and '-', not starting with a digit",
                ),
                Some(_) => {}
            }
        }

        checker.optional_string(path, "name", step);
        checker.optional_string(path, "if", step);
        checker.optional_number(path, "timeout-minutes", step);
        checker.optional_bool(path, "continue-on-error", step);

        if let Some(with) = step.get("with") {
            if !with.is_mapping() {
                checker.wrong_type(&format!("{path}.with"), "a parameter mapping", with);
            }
        }
        if let Some(env) = step.get("env") {
            checker.string_map(&format!("{path}.env"), env);
        }
        if let Some(retry) = step.get("retry-strategy") {
            self.validate_retry(checker, &format!("{path}.retry-strategy"), retry);
        }
    }

    fn validate_retry(&self, checker: &mut Checker, path: &str, retry: &YamlValue) {
        let Some(mapping) = retry.as_mapping() else {
            checker.wrong_type(path, "a mapping", retry);
            return;
        };
        checker.unknown_fields(path, mapping, RETRY_FIELDS);
        checker.optional_number(path, "max-attempts", retry);
        checker.optional_number(path, "backoff-coefficient", retry);
        checker.optional_duration(path, "initial-interval", retry);
        checker.optional_duration(path, "max-interval", retry);
    }
}

struct Checker<'a> {
    doc: &'a RawDocument,
    report: ValidationReport,
}

impl Checker<'_> {
    fn error(&mut self, path: impl Into<String>, message: String, suggestion: Option<String>) {
        let path = path.into();
        let line = self.doc.lines.line_or_parent(&path);
        self.report.push(FieldError {
            line,
            path,
            message,
            snippet: line.map(|l| snippet_around(&self.doc.source, l)),
            suggestion,
        });
    }

    fn missing(&mut self, parent: &str, field: &str) {
        let path = if parent.is_empty() {
            field.to_string()
        } else {
            format!("{parent}.{field}")
        };
        self.error(
            path,
            format!("missing required field '{field}'"),
            Some(format!("add a '{field}' entry")),
        );
    }

    fn wrong_type(&mut self, path: &str, expected: &str, actual: &YamlValue) {
        self.error(
            path,
            format!("expected {expected}, found {}", yaml_type_name(actual)),
            None,
        );
    }

    fn pattern(&mut self, path: &str, message: &str, allowed: &str) {
        self.error(path, message.to_string(), Some(allowed.to_string()));
    }

    fn unknown_fields(&mut self, path: &str, mapping: &serde_yaml::Mapping, known: &[&str]) {
        for key in mapping.keys() {
            let Some(name) = key.as_str() else { continue };
            if !known.contains(&name) {
                let field_path = if path.is_empty() {
                    name.to_string()
                } else {
                    format!("{path}.{name}")
                };
                self.error(
                    field_path,
                    format!("unknown field '{name}'"),
                    Some(format!("supported fields: {}", known.join(", "))),
                );
            }
        }
    }

    fn optional_string(&mut self, parent: &str, field: &str, value: &YamlValue) {
        if let Some(v) = value.get(field) {
            if !v.is_string() {
                self.wrong_type(&format!("{parent}.{field}"), "a string", v);
            }
        }
    }

    fn optional_number(&mut self, parent: &str, field: &str, value: &YamlValue) {
        if let Some(v) = value.get(field) {
            if !v.is_number() {
                self.wrong_type(&format!("{parent}.{field}"), "a number", v);
            }
        }
    }

    fn optional_duration(&mut self, parent: &str, field: &str, value: &YamlValue) {
        let Some(v) = value.get(field) else { return };
        let path = format!("{parent}.{field}");
        match v.as_str() {
            None => self.wrong_type(&path, "a duration string", v),
            Some(text) => {
                if humantime::parse_duration(text).is_err() {
                    self.error(
                        path,
                        format!("'{text}' is not a valid duration"),
                        Some("use a humantime duration, e.g. 500ms, 1s, 2m".to_string()),
                    );
                }
            }
        }
    }

    fn optional_bool(&mut self, parent: &str, field: &str, value: &YamlValue) {
        if let Some(v) = value.get(field) {
            if !v.is_bool() {
                self.wrong_type(&format!("{parent}.{field}"), "a boolean", v);
            }
        }
    }

    fn string_map(&mut self, path: &str, value: &YamlValue) {
        match value.as_mapping() {
            None => self.wrong_type(path, "a mapping", value),
            Some(mapping) => {
                for (key, entry) in mapping {
                    let name = key.as_str().unwrap_or_default();
                    if !entry.is_string() {
                        self.wrong_type(&format!("{path}.{name}"), "a string value", entry);
                    }
                }
            }
        }
    }
}

fn yaml_type_name(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "a boolean",
        YamlValue::Number(_) => "a number",
        YamlValue::String(_) => "a string",
        YamlValue::Sequence(_) => "a list",
        YamlValue::Mapping(_) => "a mapping",
        YamlValue::Tagged(_) => "a tagged value",
    }
}
