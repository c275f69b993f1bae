//! Descriptors for live servers in the mesh.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Role of a server process in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ServiceType {
    /// Holds stages and runs game logic.
    Play = 0,
    /// Stateless request gateway.
    Api = 1,
    /// Client-facing session gateway.
    Session = 2,
}

impl ServiceType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Play),
            1 => Some(Self::Api),
            2 => Some(Self::Session),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Play => "play",
            Self::Api => "api",
            Self::Session => "session",
        };
        write!(f, "{name}")
    }
}

/// Whether a server takes new traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Running,
    /// Alive but drained: skipped by selection, still routable by nid.
    Disabled,
}

/// A live server as seen by discovery.
///
/// `(service_type, server_id)` is unique across the mesh. Entries are
/// created on first heartbeat, refreshed on every update, and evicted once
/// `now - last_heartbeat_at` exceeds the configured TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub service_type: ServiceType,
    pub service_id: u16,
    pub server_id: String,
    pub endpoint: String,
    pub state: ServerState,
    pub weight: u16,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl ServerInfo {
    pub fn new(
        service_type: ServiceType,
        service_id: u16,
        server_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service_type,
            service_id,
            server_id: server_id.into(),
            endpoint: endpoint.into(),
            state: ServerState::Running,
            weight: 1,
            last_heartbeat_at: Utc::now(),
        }
    }

    /// Node identifier: `"{service_id}:{server_id}"`.
    pub fn nid(&self) -> String {
        format!("{}:{}", self.service_id, self.server_id)
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Refresh the heartbeat stamp.
    pub fn touch(&mut self) {
        self.last_heartbeat_at = Utc::now();
    }

    /// Whether the entry outlived `ttl` without a heartbeat.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        let age = now.signed_duration_since(self.last_heartbeat_at);
        age.num_milliseconds() > ttl.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_nid_format() {
        let info = ServerInfo::new(ServiceType::Play, 1, "play-1", "127.0.0.1:7001");
        assert_eq!(info.nid(), "1:play-1");
    }

    #[test]
    fn test_expiry() {
        let mut info = ServerInfo::new(ServiceType::Api, 2, "api-1", "127.0.0.1:7002");
        info.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(30);
        assert!(info.is_expired(Utc::now(), Duration::from_secs(10)));

        info.touch();
        assert!(!info.is_expired(Utc::now(), Duration::from_secs(10)));
    }

    #[test]
    fn test_service_type_round_trip() {
        for ty in [ServiceType::Play, ServiceType::Api, ServiceType::Session] {
            assert_eq!(ServiceType::from_i32(ty.as_i32()), Some(ty));
        }
        assert_eq!(ServiceType::from_i32(9), None);
    }
}
