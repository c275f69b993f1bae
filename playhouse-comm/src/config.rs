//! Mesh configuration with sensible defaults.

// Layer 1: Standard library
use std::time::Duration;

// Layer 2: Third-party
use serde::{Deserialize, Serialize};

// Layer 3: Internal
use crate::discovery::{ServerInfo, ServiceType};
use crate::error::CommError;
use crate::transport::SocketOptions;

/// Default deadline for cross-server requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default discovery refresh cadence (3 seconds).
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(3);

/// Default heartbeat silence budget before eviction (10 seconds).
pub const DEFAULT_SERVER_TTL: Duration = Duration::from_secs(10);

/// Default high-water mark for send and receive queues.
pub const DEFAULT_HWM: usize = 100_000;

/// Default bounded wait on a full send queue.
pub const DEFAULT_HWM_WAIT: Duration = Duration::from_millis(1_000);

/// Environment variable shifting the router bind port, useful when several
/// servers share a host.
pub const ROUTER_PORT_OFFSET_ENV: &str = "ROUTER_PORT_OFFSET";

/// Configuration shared by every server joining the mesh.
///
/// # Examples
///
/// ```rust
/// use playhouse_comm::config::CommConfig;
/// use playhouse_comm::discovery::ServiceType;
///
/// let config = CommConfig::builder(ServiceType::Play, 1, "play-1")
///     .with_bind_endpoint("127.0.0.1:7001")
///     .build()
///     .unwrap();
/// assert_eq!(config.nid(), "1:play-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    /// Unique server id within the service.
    pub server_id: String,
    pub service_id: u16,
    pub service_type: ServiceType,
    /// Router socket bind endpoint (`host:port`; port 0 picks one).
    pub bind_endpoint: String,
    /// Selection weight advertised through discovery.
    pub weight: u16,
    pub request_timeout: Duration,
    pub discovery_interval: Duration,
    pub server_ttl: Duration,
    pub send_hwm: usize,
    pub recv_hwm: usize,
    pub hwm_wait: Duration,
    pub tcp_nodelay: bool,
    /// TCP keepalive probe interval on router links; `None` = off.
    pub tcp_keepalive: Option<Duration>,
    /// SO_LINGER on router links.
    pub linger: Option<Duration>,
}

impl CommConfig {
    pub fn builder(
        service_type: ServiceType,
        service_id: u16,
        server_id: impl Into<String>,
    ) -> CommConfigBuilder {
        CommConfigBuilder {
            config: CommConfig {
                server_id: server_id.into(),
                service_id,
                service_type,
                bind_endpoint: "127.0.0.1:0".to_string(),
                weight: 1,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
                server_ttl: DEFAULT_SERVER_TTL,
                send_hwm: DEFAULT_HWM,
                recv_hwm: DEFAULT_HWM,
                hwm_wait: DEFAULT_HWM_WAIT,
                tcp_nodelay: true,
                tcp_keepalive: None,
                linger: None,
            },
        }
    }

    /// Node identifier: `"{service_id}:{server_id}"`.
    pub fn nid(&self) -> String {
        format!("{}:{}", self.service_id, self.server_id)
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            send_hwm: self.send_hwm,
            recv_hwm: self.recv_hwm,
            hwm_wait: self.hwm_wait,
            tcp_nodelay: self.tcp_nodelay,
            tcp_keepalive: self.tcp_keepalive,
            linger: self.linger,
        }
    }

    /// Discovery record for this server, advertising `endpoint` (the
    /// resolved bind address once the socket is up).
    pub fn to_server_info(&self, endpoint: impl Into<String>) -> ServerInfo {
        let mut info = ServerInfo::new(
            self.service_type,
            self.service_id,
            self.server_id.clone(),
            endpoint,
        );
        info.weight = self.weight;
        info
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), CommError> {
        if self.server_id.is_empty() {
            return Err(CommError::Config("server_id must not be empty".to_string()));
        }
        if self.service_id == 0 {
            return Err(CommError::Config("service_id must be > 0".to_string()));
        }
        if self.bind_endpoint.is_empty() {
            return Err(CommError::Config(
                "bind_endpoint must not be empty".to_string(),
            ));
        }
        if self.send_hwm == 0 || self.recv_hwm == 0 {
            return Err(CommError::Config("hwm must be > 0".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(CommError::Config(
                "request_timeout must be > 0".to_string(),
            ));
        }
        if self.discovery_interval.is_zero() || self.server_ttl.is_zero() {
            return Err(CommError::Config(
                "discovery intervals must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply recognized environment overrides.
    ///
    /// `ROUTER_PORT_OFFSET` shifts the bind port; malformed values are a
    /// configuration error so a typo fails fast at startup.
    pub fn apply_env(mut self) -> Result<Self, CommError> {
        if let Ok(raw) = std::env::var(ROUTER_PORT_OFFSET_ENV) {
            let offset: u16 = raw.parse().map_err(|_| {
                CommError::Config(format!("{ROUTER_PORT_OFFSET_ENV}={raw} is not a port offset"))
            })?;
            let (host, port) = self.bind_endpoint.rsplit_once(':').ok_or_else(|| {
                CommError::Config(format!("bind_endpoint {} has no port", self.bind_endpoint))
            })?;
            let port: u16 = port.parse().map_err(|_| {
                CommError::Config(format!("bind_endpoint {} has no port", self.bind_endpoint))
            })?;
            self.bind_endpoint = format!("{host}:{}", port + offset);
        }
        Ok(self)
    }
}

/// Builder for [`CommConfig`] with a fluent API.
pub struct CommConfigBuilder {
    config: CommConfig,
}

impl CommConfigBuilder {
    pub fn with_bind_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.bind_endpoint = endpoint.into();
        self
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.config.weight = weight;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval = interval;
        self
    }

    pub fn with_server_ttl(mut self, ttl: Duration) -> Self {
        self.config.server_ttl = ttl;
        self
    }

    pub fn with_hwm(mut self, send: usize, recv: usize) -> Self {
        self.config.send_hwm = send;
        self.config.recv_hwm = recv;
        self
    }

    pub fn with_hwm_wait(mut self, wait: Duration) -> Self {
        self.config.hwm_wait = wait;
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    pub fn with_tcp_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.config.tcp_keepalive = interval;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.config.linger = linger;
        self
    }

    pub fn build(self) -> Result<CommConfig, CommError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommConfig::builder(ServiceType::Api, 2, "api-1")
            .build()
            .unwrap();
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.send_hwm, DEFAULT_HWM);
        assert_eq!(config.nid(), "2:api-1");
    }

    #[test]
    fn test_validation_rejects_empty_server_id() {
        let result = CommConfig::builder(ServiceType::Api, 2, "").build();
        assert!(matches!(result, Err(CommError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_service_id() {
        let result = CommConfig::builder(ServiceType::Api, 0, "api-1").build();
        assert!(matches!(result, Err(CommError::Config(_))));
    }

    #[test]
    fn test_to_server_info_carries_weight() {
        let config = CommConfig::builder(ServiceType::Play, 1, "play-1")
            .with_weight(3)
            .build()
            .unwrap();
        let info = config.to_server_info("10.0.0.1:7001");
        assert_eq!(info.weight, 3);
        assert_eq!(info.nid(), "1:play-1");
    }
}
