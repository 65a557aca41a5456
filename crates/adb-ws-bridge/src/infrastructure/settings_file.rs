//! Optional TOML settings file.
//!
//! Every key is optional; anything left out keeps the value already in the
//! [`BridgeConfig`] it is applied to.  Unknown keys are rejected so a typo
//! does not silently fall back to a default.
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 6555
//! tls_policy = "verify"
//! read_buffer_size = 16384
//!
//! [keepalive]
//! ping_interval_secs = 15
//! ping_timeout_secs = 5
//!
//! [timeouts]
//! connect_ms = 5000
//! accept_poll_ms = 250
//! client_read_ms = 2000
//! client_write_ms = 500
//! upstream_receive_ms = 1000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{BridgeConfig, TlsPolicy};

/// Errors from loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or contains unknown keys.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeSettings {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub tls_policy: Option<TlsPolicy>,
    pub read_buffer_size: Option<usize>,
    #[serde(default)]
    pub keepalive: KeepaliveSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// `[keepalive]` table.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KeepaliveSettings {
    /// `0` disables keepalive.
    pub ping_interval_secs: Option<u64>,
    pub ping_timeout_secs: Option<u64>,
}

/// `[timeouts]` table, all in milliseconds.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    pub connect_ms: Option<u64>,
    pub accept_poll_ms: Option<u64>,
    pub client_read_ms: Option<u64>,
    pub client_write_ms: Option<u64>,
    pub upstream_receive_ms: Option<u64>,
}

impl BridgeSettings {
    /// Reads and parses `path`.
    ///
    /// Unlike the connection file, a missing settings file is an error:
    /// it is only ever loaded when explicitly requested.
    ///
    /// # Errors
    ///
    /// [`SettingsError::Io`] if the file cannot be read, and
    /// [`SettingsError::Parse`] if it is not valid settings TOML.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlays every key that is present onto `config`.
    pub fn apply_to(&self, config: &mut BridgeConfig) {
        if let Some(ip) = self.bind {
            config.listen_addr = SocketAddr::new(ip, config.listen_addr.port());
        }
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        if let Some(policy) = self.tls_policy {
            config.tls_policy = policy;
        }
        if let Some(size) = self.read_buffer_size {
            config.read_buffer_size = size;
        }

        let secs = Duration::from_secs;
        let millis = Duration::from_millis;
        apply(&mut config.ping_interval, self.keepalive.ping_interval_secs.map(secs));
        apply(&mut config.ping_timeout, self.keepalive.ping_timeout_secs.map(secs));
        apply(&mut config.connect_timeout, self.timeouts.connect_ms.map(millis));
        apply(&mut config.accept_poll_interval, self.timeouts.accept_poll_ms.map(millis));
        apply(&mut config.client_read_timeout, self.timeouts.client_read_ms.map(millis));
        apply(&mut config.client_write_timeout, self.timeouts.client_write_ms.map(millis));
        apply(
            &mut config.upstream_receive_timeout,
            self.timeouts.upstream_receive_ms.map(millis),
        );
    }
}

fn apply(slot: &mut Duration, value: Option<Duration>) {
    if let Some(value) = value {
        *slot = value;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
