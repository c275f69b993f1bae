//! Play service configuration.

// Layer 1: Standard library
// (none)

// Layer 2: Third-party
use serde::{Deserialize, Serialize};

// Layer 3: Internal
use playhouse_comm::config::CommConfig;
use playhouse_comm::error::CommError;

/// Default msg id that triggers actor authentication.
pub const DEFAULT_AUTHENTICATE_MSG_ID: &str = "Authenticate";

/// Configuration for a play server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayConfig {
    /// Mesh configuration (router endpoint, discovery, timeouts).
    pub comm: CommConfig,
    /// Msg id whose first arrival runs `Actor::on_authenticate`.
    pub authenticate_msg_id: String,
    /// Stage type used when a join names none.
    pub default_stage_type: String,
    /// Close a stage when its last actor leaves.
    pub close_stage_on_empty: bool,
}

impl PlayConfig {
    pub fn new(comm: CommConfig) -> Self {
        Self {
            comm,
            authenticate_msg_id: DEFAULT_AUTHENTICATE_MSG_ID.to_string(),
            default_stage_type: String::new(),
            close_stage_on_empty: false,
        }
    }

    pub fn with_close_stage_on_empty(mut self, close: bool) -> Self {
        self.close_stage_on_empty = close;
        self
    }

    pub fn with_authenticate_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.authenticate_msg_id = msg_id.into();
        self
    }

    pub fn with_default_stage_type(mut self, stage_type: impl Into<String>) -> Self {
        self.default_stage_type = stage_type.into();
        self
    }

    pub fn validate(&self) -> Result<(), CommError> {
        self.comm.validate()?;
        if self.authenticate_msg_id.is_empty() {
            return Err(CommError::Config(
                "authenticate_msg_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
