//! Unified error types for Planloop.

use thiserror::Error;

/// Result type alias using PlanError.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Error, Debug)]
pub enum PlanError {
    // Registry errors
    #[error("Plan name already exists: {0}")]
    DuplicatePlan(String),

    // Rule construction errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Rule expression errors
    #[error("Malformed plan expression: {0}")]
    MalformedExpression(String),

    #[error("Bad field in plan expression: {0}")]
    FieldFormat(String),

    // Worker errors
    #[error("Worker error: {0}")]
    Worker(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlanError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedExpression(msg.into())
    }

    pub fn field_format(msg: impl Into<String>) -> Self {
        Self::FieldFormat(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::DuplicatePlan("backup".into());
        assert!(err.to_string().contains("backup"));
    }

    #[test]
    fn test_error_constructors() {
        let e1 = PlanError::invalid_argument("test");
        assert!(matches!(e1, PlanError::InvalidArgument(_)));

        let e2 = PlanError::malformed("test");
        assert!(matches!(e2, PlanError::MalformedExpression(_)));

        let e3 = PlanError::field_format("test");
        assert!(matches!(e3, PlanError::FieldFormat(_)));

        let e4 = PlanError::worker("test");
        assert!(matches!(e4, PlanError::Worker(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlanError = io_err.into();
        assert!(matches!(err, PlanError::Io(_)));
    }

    #[test]
    fn test_expression_errors_are_distinct() {
        // A caller must be able to tell a bad field count from a bad token.
        let malformed = PlanError::malformed("2 2023-01-01");
        let field = PlanError::field_format("2 2023-13-99 02:00:00 x");
        assert!(!matches!(malformed, PlanError::FieldFormat(_)));
        assert!(!matches!(field, PlanError::MalformedExpression(_)));
    }
}
