//! Session gateway error type.

// Layer 1: Standard library
// (none)

// Layer 2: Third-party
use thiserror::Error;
use tokio_tungstenite::tungstenite;

// Layer 3: Internal
use playhouse_comm::error::CommError;

/// Errors raised by the session gateway.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Mesh transport failure.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// WebSocket protocol failure on a client connection.
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Process exit code for fatal startup errors: 1 for configuration,
    /// 2 for bind failures, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Config(_) | SessionError::Tls(_) => 1,
            SessionError::Comm(comm) => comm.exit_code(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SessionError::Config("missing port".to_string()).exit_code(), 1);

        let bind = SessionError::Comm(CommError::Bind {
            endpoint: "0.0.0.0:4000".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        });
        assert_eq!(bind.exit_code(), 2);
    }
}
