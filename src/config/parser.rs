//! Document parsing: raw YAML tree, field-path line map, and typed decode.
//!
//! Parsing is two separate passes merged only through the field-path key:
//! the raw tree (with the line map) feeds schema validation and
//! diagnostics, the serde decode produces the typed model. Syntax errors
//! abort immediately with a line-annotated report; no validation is
//! attempted on a document that did not parse.

use std::fs;
use std::path::Path;

use serde_yaml::Value as YamlValue;

use super::line_map::LineMap;
use super::validation::snippet_around;
use super::workflow::Workflow;
use crate::error::{Error, Result};

/// Raw parse product: the untyped tree plus diagnostics side-channels.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub value: YamlValue,
    pub lines: LineMap,
    pub source: String,
}

/// Fully parsed and decoded workflow, retaining the diagnostics channels
/// for the validators.
#[derive(Debug, Clone)]
pub struct ParsedWorkflow {
    pub workflow: Workflow,
    pub lines: LineMap,
    pub source: String,
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<RawDocument> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_str(&content)
}

pub fn parse_str(content: &str) -> Result<RawDocument> {
    let value: YamlValue =
        serde_yaml::from_str(content).map_err(|err| syntax_error(content, &err))?;
    Ok(RawDocument {
        value,
        lines: LineMap::build(content),
        source: content.to_string(),
    })
}

/// Decode the typed model from an already schema-validated raw tree.
pub fn decode(doc: &RawDocument) -> Result<ParsedWorkflow> {
    let workflow: Workflow = serde_yaml::from_value(doc.value.clone())
        .map_err(|err| Error::YamlSyntax(format!("failed to decode workflow: {err}")))?;
    Ok(ParsedWorkflow {
        workflow,
        lines: doc.lines.clone(),
        source: doc.source.clone(),
    })
}

fn syntax_error(content: &str, err: &serde_yaml::Error) -> Error {
    let mut message = err.to_string();
    let line = err.location().map(|location| location.line());
    if let Some(line) = line {
        let snippet = snippet_around(content, line);
        if !snippet.is_empty() {
            message.push('\n');
            message.push_str(&snippet);
        }
    }
    if let Some(suggestion) = suggest_fix(&message, content, line) {
        if !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str("suggestion: ");
        message.push_str(suggestion);
    }
    Error::YamlSyntax(message)
}

/// Best-effort remediation hints pattern-matched from common mistakes.
fn suggest_fix(message: &str, content: &str, line: Option<usize>) -> Option<&'static str> {
    let offending = line
        .and_then(|l| content.lines().nth(l.saturating_sub(1)))
        .unwrap_or("");
    if message.contains("found character that cannot start any token")
        || offending.starts_with('\t')
    {
        return Some("indent with spaces; tabs are not valid YAML indentation");
    }
    if message.contains("could not find expected ':'") {
        return Some("add a ':' after the key name");
    }
    if message.contains("while scanning a quoted scalar") {
        return Some("close the quote on this value");
    }
    if message.contains("mapping values are not allowed") {
        return Some("check indentation; this line is nested at the wrong level");
    }
    if message.contains("duplicate entry") {
        return Some("remove the duplicate key");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_decode() {
        let doc = parse_str(
            r#"
name: ci
jobs:
  build:
    steps:
      - uses: shell@v1
"#,
        )
        .unwrap();
        let parsed = decode(&doc).unwrap();
        assert_eq!(parsed.workflow.name, "ci");
        assert!(parsed.lines.get("jobs.build").is_some());
    }

    #[test]
    fn test_tab_indentation_suggestion() {
        let err = parse_str("name: ci\njobs:\n\tbuild: {}\n").unwrap_err();
        let Error::YamlSyntax(message) = err else {
            panic!("expected syntax error");
        };
        assert!(message.contains("tabs are not valid"), "{message}");
    }

    #[test]
    fn test_unmatched_quote_suggestion() {
        let err = parse_str("name: \"ci\njobs: {}\n").unwrap_err();
        let Error::YamlSyntax(message) = err else {
            panic!("expected syntax error");
        };
        assert!(message.contains("close the quote"), "{message}");
    }

    #[test]
    fn test_syntax_error_aborts() {
        // no RawDocument to validate at all
        assert!(parse_str(": : :").is_err());
    }
}
