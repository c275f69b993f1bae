//! Api-service error type with wire code mapping.

// Layer 1: Standard library
// (none)

// Layer 2: Third-party
use thiserror::Error;

// Layer 3: Internal
use playhouse_comm::error::{CommError, ErrorCode};

/// Errors surfaced by api handlers and the api dispatcher.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Abort carrying an explicit wire code.
    #[error("{message} (code {code})")]
    Coded { code: u16, message: String },

    /// Mesh transport failure underneath an api operation.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// A stage operation came back with a nonzero code.
    #[error("Stage operation failed with code {0}")]
    StageOp(u16),

    /// Handler failure without a typed code.
    #[error("Handler error: {0}")]
    Handler(String),
}

impl ApiError {
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Coded {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// The wire code replied to the caller when this error aborts a
    /// request handler.
    pub fn code(&self) -> u16 {
        match self {
            ApiError::Coded { code, .. } => *code,
            ApiError::Comm(comm) => comm.error_code().as_u16(),
            ApiError::StageOp(code) => *code,
            ApiError::Handler(_) => ErrorCode::UncheckedContentsError.as_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            ApiError::with_code(ErrorCode::AuthenticationFailed, "bad token").code(),
            ErrorCode::AuthenticationFailed.as_u16()
        );
        assert_eq!(
            ApiError::Handler("oops".to_string()).code(),
            ErrorCode::UncheckedContentsError.as_u16()
        );
        assert_eq!(ApiError::StageOp(8).code(), 8);
    }
}
