//! Workflow document handling: typed model, parsing with line-number
//! diagnostics, and the two-stage (schema, then semantic) validator.

mod line_map;
mod parser;
mod schema;
mod semantic;
mod validation;
mod workflow;

pub use line_map::LineMap;
pub use parser::{decode, parse_file, parse_str, ParsedWorkflow, RawDocument};
pub use schema::SchemaValidator;
pub use semantic::SemanticValidator;
pub use validation::{snippet_around, FieldError, ValidationReport, MAX_REPORTED_ERRORS};
pub use workflow::{
    Job, RetryStrategy, Step, Strategy, Workflow, DEFAULT_POOL, MAX_MATRIX_COMBINATIONS,
};

use std::path::Path;

use crate::error::{Error, Result};
use crate::registry::NodeRegistry;

/// Parses and fully validates workflow documents.
///
/// Syntax errors abort immediately; schema and semantic violations are each
/// collected in full, merged, and surfaced once as a single
/// [`ValidationReport`].
pub struct WorkflowLoader<'a> {
    registry: &'a dyn NodeRegistry,
}

impl<'a> WorkflowLoader<'a> {
    pub fn new(registry: &'a dyn NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ParsedWorkflow> {
        let doc = parser::parse_file(path)?;
        self.validate(doc)
    }

    pub fn load_str(&self, content: &str) -> Result<ParsedWorkflow> {
        let doc = parser::parse_str(content)?;
        self.validate(doc)
    }

    fn validate(&self, doc: RawDocument) -> Result<ParsedWorkflow> {
        let mut report = SchemaValidator::new().validate(&doc);

        match parser::decode(&doc) {
            Ok(parsed) => {
                report.merge(SemanticValidator::new(self.registry).validate(&parsed));
                report.into_result()?;
                Ok(parsed)
            }
            Err(decode_err) => {
                // Schema violations explain most decode failures; surface
                // them instead of the opaque serde message when available.
                if report.is_empty() {
                    Err(decode_err)
                } else {
                    Err(Error::Validation(report))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn test_load_valid_workflow() {
        let registry = InMemoryRegistry::builtin();
        let loader = WorkflowLoader::new(&registry);
        let parsed = loader
            .load_str(
                r#"
name: ci
jobs:
  build:
    steps:
      - uses: shell@v1
        with:
          run: make
"#,
            )
            .unwrap();
        assert_eq!(parsed.workflow.name, "ci");
    }

    #[test]
    fn test_schema_and_semantic_errors_merge() {
        let registry = InMemoryRegistry::builtin();
        let loader = WorkflowLoader::new(&registry);
        // one schema violation (unknown field) and one semantic violation
        // (unregistered node) must surface together
        let err = loader
            .load_str(
                r#"
name: ci
jobs:
  build:
    color: red
    steps:
      - uses: ghost@v1
"#,
            )
            .unwrap_err();
        let Error::Validation(report) = err else {
            panic!("expected validation error");
        };
        assert!(report
            .errors()
            .iter()
            .any(|e| e.message.contains("unknown field 'color'")));
        assert!(report
            .errors()
            .iter()
            .any(|e| e.message.contains("'ghost@v1' is not registered")));
    }

    #[test]
    fn test_syntax_error_stops_validation() {
        let registry = InMemoryRegistry::builtin();
        let loader = WorkflowLoader::new(&registry);
        let err = loader.load_str("name: [unclosed\n").unwrap_err();
        assert!(matches!(err, Error::YamlSyntax(_)));
    }
}
