//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime tunables.
//! It is built once at startup from defaults, an optional TOML settings file
//! and CLI flags (in that order of increasing priority), then wrapped in an
//! `Arc` and shared by every task.
//!
//! The upstream URL is deliberately *not* part of this struct: it is
//! discovered and validated separately (see
//! [`crate::application::discovery`]) so that a config can be built and
//! tested without any notion of where the device lives.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default local port; matches the adb convention so `adb connect
/// localhost:5555` works without extra flags.
pub const DEFAULT_LOCAL_PORT: u16 = 5555;

/// How the upstream TLS handshake treats the server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsPolicy {
    /// Accept any certificate the server presents (cloud device endpoints
    /// commonly use certificates that do not chain to a public root).
    #[default]
    AcceptAny,
    /// Verify the certificate chain against the bundled webpki roots.
    Verify,
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use adb_ws_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.listen_addr.port(), 5555);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Address the local TCP listener binds to.
    ///
    /// Defaults to loopback: the bridge is meant for tools on the same host.
    pub listen_addr: SocketAddr,

    /// Certificate policy for the `wss://` handshake.
    pub tls_policy: TlsPolicy,

    /// How often a WebSocket Ping is sent to the upstream.
    ///
    /// `Duration::ZERO` disables keepalive entirely.
    pub ping_interval: Duration,

    /// How long to wait for any upstream frame after a Ping before the
    /// session is declared dead.
    pub ping_timeout: Duration,

    /// Upper bound on the WebSocket handshake (TCP + TLS + HTTP upgrade).
    pub connect_timeout: Duration,

    /// Poll interval of the accept loop; bounds how long the listener takes
    /// to notice a shutdown request.
    pub accept_poll_interval: Duration,

    /// Per-client socket read timeout.  A timeout is not an error, the read
    /// loop simply checks for shutdown and reads again.
    pub client_read_timeout: Duration,

    /// Per-client write timeout used by the fan-out loop.  A client that
    /// cannot absorb a message within this bound is evicted.
    pub client_write_timeout: Duration,

    /// Poll interval of the upstream receive in the fan-out loop.
    pub upstream_receive_timeout: Duration,

    /// Size of the per-client read buffer (bytes per upstream message, at most).
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    /// | Field                    | Default            |
    /// |--------------------------|--------------------|
    /// | listen_addr              | `127.0.0.1:5555`   |
    /// | tls_policy               | `AcceptAny`        |
    /// | ping_interval            | 30 seconds         |
    /// | ping_timeout             | 10 seconds         |
    /// | connect_timeout          | 10 seconds         |
    /// | accept_poll_interval     | 1 second           |
    /// | client_read_timeout      | 5 seconds          |
    /// | client_write_timeout     | 500 milliseconds   |
    /// | upstream_receive_timeout | 2 seconds          |
    /// | read_buffer_size         | 8192 bytes         |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_LOCAL_PORT)),
            tls_policy: TlsPolicy::AcceptAny,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            accept_poll_interval: Duration::from_secs(1),
            client_read_timeout: Duration::from_secs(5),
            client_write_timeout: Duration::from_millis(500),
            upstream_receive_timeout: Duration::from_secs(2),
            read_buffer_size: 8192,
        }
    }
}

impl BridgeConfig {
    /// Returns `true` when the upstream keepalive task should run.
    pub fn keepalive_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listen_port_is_adb_port() {
        // Arrange / Act
        let cfg = BridgeConfig::default();
        // Assert
        assert_eq!(cfg.listen_addr.port(), 5555);
    }

    #[test]
    fn test_default_listen_ip_is_loopback() {
        let cfg = BridgeConfig::default();
        assert!(cfg.listen_addr.ip().is_loopback());
    }

    #[test]
    fn test_default_tls_policy_accepts_any_certificate() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.tls_policy, TlsPolicy::AcceptAny);
    }

    #[test]
    fn test_default_keepalive_is_30s_interval_10s_timeout() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.ping_interval, Duration::from_secs(30));
        assert_eq!(cfg.ping_timeout, Duration::from_secs(10));
        assert!(cfg.keepalive_enabled());
    }

    #[test]
    fn test_default_poll_timeouts_are_short() {
        // Every suspension point must wake up often enough to notice shutdown.
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.accept_poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.client_write_timeout, Duration::from_millis(500));
        assert_eq!(cfg.upstream_receive_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_default_read_buffer_is_8_kib() {
        assert_eq!(BridgeConfig::default().read_buffer_size, 8192);
    }

    #[test]
    fn test_zero_ping_interval_disables_keepalive() {
        let cfg = BridgeConfig {
            ping_interval: Duration::ZERO,
            ..BridgeConfig::default()
        };
        assert!(!cfg.keepalive_enabled());
    }

    #[test]
    fn test_tls_policy_serializes_kebab_case() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            policy: TlsPolicy,
        }

        let text = toml::to_string(&Wrapper {
            policy: TlsPolicy::AcceptAny,
        })
        .unwrap();
        assert!(text.contains("accept-any"));

        let parsed: Wrapper = toml::from_str("policy = \"verify\"").unwrap();
        assert_eq!(parsed.policy, TlsPolicy::Verify);
    }
}
