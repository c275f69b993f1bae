//! Api service configuration.

// Layer 1: Standard library
// (none)

// Layer 2: Third-party
use serde::{Deserialize, Serialize};

// Layer 3: Internal
use playhouse_comm::config::CommConfig;
use playhouse_comm::error::CommError;

/// Configuration for an api server. Stateless, so the mesh settings are
/// all there is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub comm: CommConfig,
}

impl ApiConfig {
    pub fn new(comm: CommConfig) -> Self {
        Self { comm }
    }

    pub fn validate(&self) -> Result<(), CommError> {
        self.comm.validate()
    }
}
