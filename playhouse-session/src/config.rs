//! Session gateway configuration.

// Layer 1: Standard library
use std::path::PathBuf;
use std::time::Duration;

// Layer 2: Third-party
use serde::{Deserialize, Serialize};

// Layer 3: Internal
use crate::error::SessionError;
use playhouse_comm::config::CommConfig;

/// Default client heartbeat interval (10 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A session is closed after this many silent heartbeat intervals.
pub const DEFAULT_HEARTBEAT_TTL_FACTOR: u32 = 3;

/// Environment overrides recognized at startup.
pub const TCP_PORT_ENV: &str = "TCP_PORT";
pub const HTTP_PORT_ENV: &str = "HTTP_PORT";
pub const ENABLE_TLS_ENV: &str = "ENABLE_TLS";
pub const ENABLE_WEBSOCKET_ENV: &str = "ENABLE_WEBSOCKET";

/// Configuration for a session gateway.
///
/// A listener is enabled by giving it a port (0 picks an ephemeral one);
/// TLS and WSS also need the certificate pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub comm: CommConfig,
    /// Host the client listeners bind to.
    pub bind_host: String,
    pub tcp_port: Option<u16>,
    pub tls_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub wss_port: Option<u16>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl_factor: u32,
    /// Service id of the api fleet that serves unbound sessions.
    pub api_service_id: u16,
}

impl SessionConfig {
    pub fn new(comm: CommConfig, api_service_id: u16) -> Self {
        Self {
            comm,
            bind_host: "0.0.0.0".to_string(),
            tcp_port: None,
            tls_port: None,
            ws_port: None,
            wss_port: None,
            cert_path: None,
            key_path: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_ttl_factor: DEFAULT_HEARTBEAT_TTL_FACTOR,
            api_service_id,
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = Some(port);
        self
    }

    pub fn with_tls_port(mut self, port: u16) -> Self {
        self.tls_port = Some(port);
        self
    }

    pub fn with_ws_port(mut self, port: u16) -> Self {
        self.ws_port = Some(port);
        self
    }

    pub fn with_wss_port(mut self, port: u16) -> Self {
        self.wss_port = Some(port);
        self
    }

    pub fn with_certificate(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert.into());
        self.key_path = Some(key.into());
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, ttl_factor: u32) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_ttl_factor = ttl_factor;
        self
    }

    /// Silence budget before a session is closed with `ConnectionTimeout`.
    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_ttl_factor.max(1)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        self.comm.validate()?;
        if self.tcp_port.is_none()
            && self.tls_port.is_none()
            && self.ws_port.is_none()
            && self.wss_port.is_none()
        {
            return Err(SessionError::Config(
                "at least one client listener must be enabled".to_string(),
            ));
        }
        if (self.tls_port.is_some() || self.wss_port.is_some())
            && (self.cert_path.is_none() || self.key_path.is_none())
        {
            return Err(SessionError::Config(
                "tls/wss listeners need cert_path and key_path".to_string(),
            ));
        }
        if self.api_service_id == 0 {
            return Err(SessionError::Config(
                "api_service_id must be > 0".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_ttl_factor == 0 {
            return Err(SessionError::Config(
                "heartbeat interval and ttl factor must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply recognized environment overrides.
    ///
    /// `TCP_PORT` and `HTTP_PORT` move the tcp/ws listeners;
    /// `ENABLE_TLS=false` and `ENABLE_WEBSOCKET=false` disable the
    /// matching listeners.
    pub fn apply_env(mut self) -> Result<Self, SessionError> {
        if let Ok(raw) = std::env::var(TCP_PORT_ENV) {
            let port: u16 = raw.parse().map_err(|_| {
                SessionError::Config(format!("{TCP_PORT_ENV}={raw} is not a port"))
            })?;
            self.tcp_port = Some(port);
        }
        if let Ok(raw) = std::env::var(HTTP_PORT_ENV) {
            let port: u16 = raw.parse().map_err(|_| {
                SessionError::Config(format!("{HTTP_PORT_ENV}={raw} is not a port"))
            })?;
            self.ws_port = Some(port);
        }
        if let Ok(raw) = std::env::var(ENABLE_TLS_ENV) {
            if !env_truthy(&raw) {
                self.tls_port = None;
                self.wss_port = None;
            }
        }
        if let Ok(raw) = std::env::var(ENABLE_WEBSOCKET_ENV) {
            if !env_truthy(&raw) {
                self.ws_port = None;
                self.wss_port = None;
            }
        }
        Ok(self)
    }
}

fn env_truthy(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use playhouse_comm::discovery::ServiceType;

    fn base() -> SessionConfig {
        SessionConfig::new(
            CommConfig::builder(ServiceType::Session, 3, "session-1")
                .with_bind_endpoint("127.0.0.1:0")
                .build()
                .unwrap(),
            2,
        )
    }

    #[test]
    fn test_requires_a_listener() {
        assert!(base().validate().is_err());
        assert!(base().with_tcp_port(0).validate().is_ok());
    }

    #[test]
    fn test_tls_requires_certificates() {
        let config = base().with_tls_port(0);
        assert!(config.validate().is_err());

        let config = base()
            .with_tls_port(0)
            .with_certificate("cert.pem", "key.pem");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_ttl() {
        let config = base()
            .with_tcp_port(0)
            .with_heartbeat(Duration::from_millis(100), 3);
        assert_eq!(config.heartbeat_ttl(), Duration::from_millis(300));
    }
}
