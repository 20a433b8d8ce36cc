//! Live session configuration and the builder that validates it

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{self, Connector};
use crate::enums::{Dataset, UpgradePolicy};
use crate::error::{BridgeError, Result};
use crate::session::LiveSession;

/// Environment variable read by `LiveBuilder::set_key_from_env`
pub const API_KEY_ENV_VAR: &str = "DATABENTO_API_KEY";

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_GATEWAY_PORT: u16 = 13000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a connector needs to open a live session
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub key: String,
    pub dataset: String,
    pub send_ts_out: bool,
    pub upgrade_policy: UpgradePolicy,
    /// Heartbeat interval override in seconds; gateway default when unset
    pub heartbeat_interval_secs: Option<u32>,
    /// Gateway override; derived from the dataset when unset
    pub gateway: Option<Gateway>,
    pub buffer_size: usize,
    /// Upper bound on draining the delivery loop when a session is released
    pub shutdown_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            key: String::new(),
            dataset: String::new(),
            send_ts_out: false,
            upgrade_policy: UpgradePolicy::default(),
            heartbeat_interval_secs: None,
            gateway: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConfig")
            .field("key", &redact(&self.key))
            .field("dataset", &self.dataset)
            .field("send_ts_out", &self.send_ts_out)
            .field("upgrade_policy", &self.upgrade_policy)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("gateway", &self.gateway)
            .field("buffer_size", &self.buffer_size)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .finish()
    }
}

impl LiveConfig {
    /// Check the fields every connector relies on
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(BridgeError::Config("API key is not set".into()));
        }
        if self.dataset.trim().is_empty() {
            return Err(BridgeError::Config("dataset is not set".into()));
        }
        Ok(())
    }

    /// Gateway to connect to: the override, or the dataset's live gateway
    pub fn gateway(&self) -> Gateway {
        match &self.gateway {
            Some(gateway) => gateway.clone(),
            None => Gateway {
                host: format!("{}.lsg.databento.com", self.dataset.to_lowercase().replace('.', "-")),
                port: DEFAULT_GATEWAY_PORT,
            },
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs.map(|s| Duration::from_secs(u64::from(s)))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn redact(key: &str) -> String {
    let count = key.chars().count();
    if count <= 3 {
        return "***".to_string();
    }
    let tail: String = key.chars().skip(count - 3).collect();
    format!("***{tail}")
}

/// Mutable, single-use configuration that produces a `LiveSession`.
///
/// Setters validate their input and leave the configuration untouched when
/// validation fails.
#[derive(Debug, Clone, Default)]
pub struct LiveBuilder {
    config: LiveConfig,
}

impl LiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: LiveConfig) -> Self {
        LiveBuilder { config }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn set_key(&mut self, key: &str) -> Result<&mut Self> {
        if key.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("API key cannot be empty".into()));
        }
        self.config.key = key.to_string();
        Ok(self)
    }

    pub fn set_key_from_env(&mut self) -> Result<&mut Self> {
        let key = std::env::var(API_KEY_ENV_VAR).map_err(|_| {
            BridgeError::Config(format!("{API_KEY_ENV_VAR} environment variable is not set"))
        })?;
        self.set_key(&key)
    }

    pub fn set_dataset(&mut self, code: &str) -> Result<&mut Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(BridgeError::InvalidArgument("dataset cannot be empty".into()));
        }
        self.config.dataset = code.to_string();
        Ok(self)
    }

    pub fn set_dataset_enum(&mut self, dataset: Dataset) -> &mut Self {
        self.config.dataset = dataset.code().to_string();
        self
    }

    pub fn set_send_ts_out(&mut self, send_ts_out: bool) -> &mut Self {
        self.config.send_ts_out = send_ts_out;
        self
    }

    pub fn set_upgrade_policy(&mut self, policy: UpgradePolicy) -> &mut Self {
        self.config.upgrade_policy = policy;
        self
    }

    pub fn set_heartbeat_interval(&mut self, seconds: u32) -> Result<&mut Self> {
        if seconds == 0 {
            return Err(BridgeError::InvalidArgument(
                "heartbeat interval must be at least one second".into(),
            ));
        }
        self.config.heartbeat_interval_secs = Some(seconds);
        Ok(self)
    }

    pub fn set_address(&mut self, host: &str, port: u16) -> Result<&mut Self> {
        if host.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("gateway host cannot be empty".into()));
        }
        if port == 0 {
            return Err(BridgeError::InvalidArgument("gateway port cannot be zero".into()));
        }
        self.config.gateway = Some(Gateway {
            host: host.trim().to_string(),
            port,
        });
        Ok(self)
    }

    pub fn set_buffer_size(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 {
            return Err(BridgeError::InvalidArgument("buffer size cannot be zero".into()));
        }
        self.config.buffer_size = size;
        Ok(self)
    }

    pub fn set_shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Connect through the process-wide connector
    pub fn build(self) -> Result<LiveSession> {
        let connector = engine::connector();
        self.build_with(connector.as_ref())
    }

    pub fn build_with(self, connector: &dyn Connector) -> Result<LiveSession> {
        LiveSession::connect(self.config, connector)
    }
}
