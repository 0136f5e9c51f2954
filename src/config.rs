//! Client configuration.
//!
//! # Environment
//!
//! [`ClientConfig::from_env`] reads:
//!
//! | Variable      | Meaning                           | Default     |
//! |---------------|-----------------------------------|-------------|
//! | `SERVICE_ID`  | overrides the given service id    | -           |
//! | `INSTANCE_ID` | decimal instance id               | unset       |
//! | `ELKO_HOST`   | coordinator host                  | `127.0.0.1` |
//! | `ELKO_PORT`   | coordinator port                  | `9000`      |

use std::time::Duration;

use crate::error::{ElkoError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::transport::Endpoint;

/// Default coordinator host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default coordinator port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default depth limit of the outgoing queue.
pub const DEFAULT_MAX_OUTGOING: usize = 1024;

/// Settings for one coordinator connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator host.
    pub host: String,
    /// Coordinator port.
    pub port: u16,
    /// Service identity; also the source of the integrity key.
    pub service_id: String,
    /// Optional instance identity sent in `ClientHello`.
    pub instance_id: Option<u64>,
    /// Limit on the TCP connect.
    pub connect_timeout: Duration,
    /// Wait for `ServerHello` before entering `Ready`.
    pub await_server_hello: bool,
    /// Limit on waiting for `ServerHello`.
    pub handshake_timeout: Duration,
    /// Interval between heartbeats; `None` disables them.
    pub heartbeat_interval: Option<Duration>,
    /// Maximum silence from the coordinator; `None` disables the check.
    pub liveness_timeout: Option<Duration>,
    /// Depth limit of the outgoing queue; `None` for unbounded.
    pub max_outgoing: Option<usize>,
    /// How long a blocked send waits for queue space.
    pub backpressure_timeout: Duration,
    /// Handlers allowed to run at once.
    pub max_concurrent_handlers: usize,
    /// Largest payload accepted from the coordinator.
    pub max_payload_size: u32,
}

impl ClientConfig {
    /// Defaults for `service_id`.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            service_id: service_id.into(),
            instance_id: None,
            connect_timeout: Duration::from_secs(10),
            await_server_hello: true,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Some(Duration::from_secs(5)),
            liveness_timeout: None,
            max_outgoing: Some(DEFAULT_MAX_OUTGOING),
            backpressure_timeout: Duration::from_secs(5),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env(service_id: impl Into<String>) -> Result<Self> {
        Self::from_lookup(service_id, |name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(service_id: impl Into<String>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(service_id);

        if let Some(service_id) = lookup("SERVICE_ID").filter(|s| !s.is_empty()) {
            config.service_id = service_id;
        }
        if let Some(raw) = lookup("INSTANCE_ID").filter(|s| !s.is_empty()) {
            config.instance_id = Some(parse_var("INSTANCE_ID", &raw)?);
        }
        if let Some(host) = lookup("ELKO_HOST").filter(|s| !s.is_empty()) {
            config.host = host;
        }
        if let Some(raw) = lookup("ELKO_PORT").filter(|s| !s.is_empty()) {
            config.port = parse_var("ELKO_PORT", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.service_id.is_empty() {
            return Err(ElkoError::Config("service id must not be empty".into()));
        }
        if self.max_concurrent_handlers == 0 {
            return Err(ElkoError::Config(
                "max_concurrent_handlers must be at least 1".into(),
            ));
        }
        if self.max_outgoing == Some(0) {
            return Err(ElkoError::Config("max_outgoing must be at least 1".into()));
        }
        if self.heartbeat_interval == Some(Duration::ZERO) {
            return Err(ElkoError::Config("heartbeat_interval must be non-zero".into()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ElkoError::Config(format!("{}={:?}: {}", name, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("billing");

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.instance_id, None);
        assert!(config.await_server_hello);
        assert_eq!(config.liveness_timeout, None);
        assert_eq!(config.max_outgoing, Some(1024));
        assert_eq!(config.max_concurrent_handlers, 256);
        assert_eq!(config.endpoint().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_environment_overrides() {
        let config = ClientConfig::from_lookup(
            "billing",
            lookup(&[
                ("SERVICE_ID", "invoices"),
                ("INSTANCE_ID", "42"),
                ("ELKO_HOST", "10.0.0.5"),
                ("ELKO_PORT", "9100"),
            ]),
        )
        .unwrap();

        assert_eq!(config.service_id, "invoices");
        assert_eq!(config.instance_id, Some(42));
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 9100);
    }

    #[test]
    fn test_empty_environment_keeps_defaults() {
        let config = ClientConfig::from_lookup("billing", lookup(&[("INSTANCE_ID", "")])).unwrap();
        assert_eq!(config.service_id, "billing");
        assert_eq!(config.instance_id, None);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        let err = ClientConfig::from_lookup("billing", lookup(&[("ELKO_PORT", "ninety")]))
            .unwrap_err();
        assert!(matches!(err, ElkoError::Config(ref msg) if msg.contains("ELKO_PORT")));

        let err = ClientConfig::from_lookup("billing", lookup(&[("INSTANCE_ID", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ElkoError::Config(_)));
    }

    #[test]
    fn test_empty_service_id_rejected() {
        assert!(matches!(
            ClientConfig::from_lookup("", lookup(&[])),
            Err(ElkoError::Config(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = ClientConfig::new("billing");
        config.max_concurrent_handlers = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("billing");
        config.max_outgoing = Some(0);
        assert!(config.validate().is_err());
    }
}
