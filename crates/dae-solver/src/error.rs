//! Error types for dae-solver

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaeError>;

/// Errors raised by the facade, the registry and the backends.
///
/// Numerical failures during integration are not errors: they are reported
/// through [`StatusFlag`](crate::StatusFlag) in the returned result so the
/// trajectory computed so far is not lost.
#[derive(Error, Debug)]
pub enum DaeError {
    #[error("integrator name {0:?} does not exist or is not available")]
    NameNotFound(String),

    #[error("{backend}: step called before init_step")]
    SequenceError { backend: String },

    #[error("{backend}: operation `{operation}` is not implemented")]
    UnimplementedOperation {
        backend: String,
        operation: &'static str,
    },

    #[error("{backend}: invalid option `{key}`: {reason}")]
    InvalidOption {
        backend: String,
        key: String,
        reason: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} has length {found}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("solver has been disposed")]
    Disposed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaeError {
    pub(crate) fn invalid_option(
        backend: &str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DaeError::InvalidOption {
            backend: backend.to_string(),
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_not_found_mentions_requested_name() {
        let err = DaeError::NameNotFound("nonexistent".into());
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_invalid_option_formats_backend_and_key() {
        let err = DaeError::invalid_option("ida", "max_order", "must be between 1 and 5");
        let msg = err.to_string();
        assert!(msg.starts_with("ida:"));
        assert!(msg.contains("max_order"));
    }
}
