//! Aggregated, line-annotated validation errors.
//!
//! Schema and semantic validation both collect every violation they find
//! instead of stopping at the first; the merged report is capped at
//! [`MAX_REPORTED_ERRORS`] entries to bound the payload handed to callers.

use serde::Serialize;
use std::fmt;

/// Reports never carry more than this many field errors.
pub const MAX_REPORTED_ERRORS: usize = 20;

/// A single field-level violation.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// 1-based source line, when the line map can place the field.
    pub line: Option<usize>,
    /// Dotted field path, e.g. `jobs.build.steps.0.uses`.
    pub path: String,
    pub message: String,
    pub snippet: Option<String>,
    pub suggestion: Option<String>,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}: {}", self.path, self.message)?,
            None => write!(f, "{}: {}", self.path, self.message)?,
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    errors: Vec<FieldError>,
    /// Total violations found, including any dropped over the cap.
    total: usize,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.total += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error);
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        // Entries the other report already dropped over its cap still count.
        let dropped = other.total.saturating_sub(other.errors.len());
        for error in other.errors {
            self.push(error);
        }
        self.total += dropped;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn into_result(self) -> crate::Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} validation error(s)", self.total)?;
        for error in &self.errors {
            writeln!(f, "  {error}")?;
        }
        if self.total > self.errors.len() {
            writeln!(
                f,
                "  ... {} further error(s) not shown",
                self.total - self.errors.len()
            )?;
        }
        Ok(())
    }
}

/// ±2-line source excerpt around a 1-based line, with a marker on the
/// offending line.
pub fn snippet_around(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return String::new();
    }
    let start = line.saturating_sub(3);
    let end = (line + 2).min(lines.len());
    let mut snippet = String::new();
    for (offset, text) in lines[start..end].iter().enumerate() {
        let current = start + offset + 1;
        let marker = if current == line { ">" } else { " " };
        snippet.push_str(&format!("{marker} {current:>4} | {text}\n"));
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(path: &str) -> FieldError {
        FieldError {
            line: Some(1),
            path: path.to_string(),
            message: "bad".to_string(),
            snippet: None,
            suggestion: None,
        }
    }

    #[test]
    fn test_cap_at_twenty() {
        let mut report = ValidationReport::new();
        for i in 0..30 {
            report.push(error(&format!("jobs.j{i}")));
        }
        assert_eq!(report.errors().len(), MAX_REPORTED_ERRORS);
        assert_eq!(report.total(), 30);
        let rendered = report.to_string();
        assert!(rendered.contains("30 validation error(s)"));
        assert!(rendered.contains("10 further error(s)"));
    }

    #[test]
    fn test_merge_respects_cap() {
        let mut a = ValidationReport::new();
        let mut b = ValidationReport::new();
        for i in 0..15 {
            a.push(error(&format!("a{i}")));
            b.push(error(&format!("b{i}")));
        }
        a.merge(b);
        assert_eq!(a.errors().len(), MAX_REPORTED_ERRORS);
        assert_eq!(a.total(), 30);
    }

    #[test]
    fn test_snippet_marks_line() {
        let source = "one\ntwo\nthree\nfour\nfive\n";
        let snippet = snippet_around(source, 3);
        assert!(snippet.contains(">    3 | three"));
        assert!(snippet.contains("     1 | one"));
        assert!(snippet.contains("     5 | five"));
    }
}
