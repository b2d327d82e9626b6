//! Crate-level error types and the retryability classification used by
//! execution backends when deciding whether a failed attempt is worth
//! repeating.

use thiserror::Error;

use crate::config::ValidationReport;
use crate::expr::ExprError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("YAML syntax error: {0}")]
    YamlSyntax(String),

    #[error("{0}")]
    Validation(ValidationReport),

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("circular dependency detected: {path}")]
    CircularDependency { path: String },

    #[error("job '{job}' depends on unknown job '{needs}'")]
    JobNotFound { job: String, needs: String },

    #[error("matrix produces {count} combinations, exceeding the limit of {limit}")]
    MatrixLimit { count: usize, limit: usize },

    #[error("matrix dimension '{0}' has no values")]
    EmptyMatrixDimension(String),

    #[error("node '{0}' is not registered")]
    NodeNotRegistered(String),

    #[error("job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("step {step} in job '{job}' failed: {message}")]
    StepFailed {
        job: String,
        step: String,
        message: String,
    },

    #[error("step {step} in job '{job}' timed out after {minutes} minutes")]
    StepTimeout {
        job: String,
        step: String,
        minutes: u64,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid state transition for job '{job}': {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used by backends for retry decisions
/// and by the front door when rendering the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    YamlSyntax,
    Validation,
    Expression,
    CircularDependency,
    JobNotFound,
    MatrixLimit,
    NodeNotRegistered,
    Configuration,
    Cancelled,
    Timeout,
    Execution,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::YamlSyntax => "yaml_syntax_error",
            ErrorClass::Validation => "validation_error",
            ErrorClass::Expression => "expression_error",
            ErrorClass::CircularDependency => "circular_dependency",
            ErrorClass::JobNotFound => "job_not_found",
            ErrorClass::MatrixLimit => "matrix_combinations_exceed_limit",
            ErrorClass::NodeNotRegistered => "node_not_registered",
            ErrorClass::Configuration => "configuration_error",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Execution => "execution_error",
        }
    }

    /// Whether a failure of this class can be resolved by retrying.
    /// Structural and lookup failures cannot; timeouts and generic
    /// execution failures can.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorClass::YamlSyntax
                | ErrorClass::Validation
                | ErrorClass::Expression
                | ErrorClass::CircularDependency
                | ErrorClass::JobNotFound
                | ErrorClass::MatrixLimit
                | ErrorClass::NodeNotRegistered
                | ErrorClass::Configuration
                | ErrorClass::Cancelled
        )
    }
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::YamlSyntax(_) => ErrorClass::YamlSyntax,
            Error::Validation(_) => ErrorClass::Validation,
            Error::Expression(_) => ErrorClass::Expression,
            Error::CircularDependency { .. } => ErrorClass::CircularDependency,
            Error::JobNotFound { .. } => ErrorClass::JobNotFound,
            Error::MatrixLimit { .. } => ErrorClass::MatrixLimit,
            Error::EmptyMatrixDimension(_) => ErrorClass::Validation,
            Error::NodeNotRegistered(_) => ErrorClass::NodeNotRegistered,
            Error::JobFailed { .. } | Error::StepFailed { .. } => ErrorClass::Execution,
            Error::StepTimeout { .. } => ErrorClass::Timeout,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::InvalidTransition { .. } => ErrorClass::Execution,
            Error::Configuration(_) => ErrorClass::Configuration,
            Error::Execution(_) => ErrorClass::Execution,
            Error::Io(_) => ErrorClass::Execution,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_classes() {
        assert!(!Error::NodeNotRegistered("x@v1".into()).is_retryable());
        assert!(!Error::Configuration("bad".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::CircularDependency {
            path: "a -> a".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(Error::Execution("connection refused".into()).is_retryable());
        assert!(Error::StepTimeout {
            job: "build".into(),
            step: "0".into(),
            minutes: 10,
        }
        .is_retryable());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(
            Error::YamlSyntax("bad".into()).class().as_str(),
            "yaml_syntax_error"
        );
        assert_eq!(
            Error::MatrixLimit {
                count: 300,
                limit: 256
            }
            .class()
            .as_str(),
            "matrix_combinations_exceed_limit"
        );
    }
}
