//! Bridge configuration, loaded from TOML.
//!
//! ```toml
//! message_timeout_ms = 10000
//! session_port = 42
//!
//! [session]
//! traffic = "messages"
//! multipoint = true
//! proximity = "any"
//! transports = ["tcp", "udp"]
//! ```

use crate::{
    BridgeError, MESSAGE_TIMEOUT, Proximity, SessionOpts, SessionPort, TrafficType, TransportMask,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The well-known port a producer binds when nothing else is configured.
pub const DEFAULT_SESSION_PORT: SessionPort = 42;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Request timeout handed to the native layer.
    pub message_timeout_ms: u64,
    /// How long past the request timeout a waiter holds out for a late completion.
    pub wait_grace_ms: u64,
    pub session_port: SessionPort,
    pub session: SessionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: MESSAGE_TIMEOUT.as_millis() as u64,
            wait_grace_ms: 500,
            session_port: DEFAULT_SESSION_PORT,
            session: SessionConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.message_timeout_ms == 0 {
            return Err(BridgeError::Config("message_timeout_ms must be positive".into()));
        }
        if self.session.transports.is_empty() {
            return Err(BridgeError::Config("session.transports must not be empty".into()));
        }
        Ok(())
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn wait_grace(&self) -> Duration {
        Duration::from_millis(self.wait_grace_ms)
    }

    pub fn session_opts(&self) -> SessionOpts {
        self.session.to_opts()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub traffic: TrafficType,
    pub multipoint: bool,
    pub proximity: Proximity,
    pub transports: Vec<Transport>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            traffic: TrafficType::Messages,
            multipoint: true,
            proximity: Proximity::Any,
            transports: vec![Transport::Any],
        }
    }
}

impl SessionConfig {
    pub fn to_opts(&self) -> SessionOpts {
        let transports = self
            .transports
            .iter()
            .fold(TransportMask::NONE, |mask, t| mask | t.mask());
        SessionOpts {
            traffic: self.traffic,
            multipoint: self.multipoint,
            proximity: self.proximity,
            transports,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Local,
    Tcp,
    Udp,
    Any,
}

impl Transport {
    pub fn mask(self) -> TransportMask {
        match self {
            Transport::Local => TransportMask::LOCAL,
            Transport::Tcp => TransportMask::TCP,
            Transport::Udp => TransportMask::UDP,
            Transport::Any => TransportMask::ANY,
        }
    }
}
