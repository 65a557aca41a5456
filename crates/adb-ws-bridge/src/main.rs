//! adb-ws-bridge: entry point.
//!
//! Cloud Android devices often expose ADB only through a secure WebSocket.
//! This binary opens that WebSocket once and serves it on a local TCP port,
//! so any number of `adb` clients can talk to the device as if it were
//! attached locally.
//!
//! # Usage
//!
//! ```text
//! adb-ws-bridge [OPTIONS]
//!
//! Options:
//!   --url <URL>                  Upstream wss:// URL
//!   --connection-file <PATH>     Fallback KEY=value file [default: /tmp/genymotion_connection.env]
//!   --config <PATH>              Optional TOML settings file
//!   --bind <IP>                  Local listen IP [default: 127.0.0.1]
//!   --port <PORT>                Local listen port [default: 5555]
//!   --ping-interval <SECS>       Keepalive ping interval, 0 disables [default: 30]
//!   --ping-timeout <SECS>        Keepalive deadline [default: 10]
//!   --verify-tls                 Verify the upstream certificate chain
//!   -v, --verbose                Debug logging
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                     | Flag                |
//! |------------------------------|---------------------|
//! | `GENYMOTION_WEBSOCKET_URL`   | `--url`             |
//! | `GENYMOTION_CONNECTION_FILE` | `--connection-file` |
//! | `ADB_BRIDGE_CONFIG`          | `--config`          |
//! | `ADB_BRIDGE_BIND`            | `--bind`            |
//! | `ADB_BRIDGE_PORT`            | `--port`            |
//! | `ADB_BRIDGE_PING_INTERVAL`   | `--ping-interval`   |
//! | `ADB_BRIDGE_PING_TIMEOUT`    | `--ping-timeout`    |
//! | `ADB_BRIDGE_VERIFY_TLS`      | `--verify-tls`      |
//!
//! Tunables resolve as: flag or environment, then the settings file, then
//! the built-in default.
//!
//! # Exit status
//!
//! `0` after Ctrl+C or after the upstream closed a running bridge; `1` on
//! any configuration, connection or listener failure.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use adb_ws_bridge::application::resolve_upstream_url;
use adb_ws_bridge::domain::{BridgeConfig, TlsPolicy};
use adb_ws_bridge::infrastructure::{
    read_connection_file, Bridge, BridgeSettings, DEFAULT_CONNECTION_FILE,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-TCP bridge for cloud Android ADB endpoints.
#[derive(Debug, Parser)]
#[command(
    name = "adb-ws-bridge",
    about = "Serves a WebSocket-only ADB endpoint on a local TCP port",
    version
)]
struct Cli {
    /// Upstream secure WebSocket URL (wss://...).
    ///
    /// When absent, the connection file is searched for GENYMOTION_ADB_URL
    /// or publicAdbUrl.
    #[arg(long, env = "GENYMOTION_WEBSOCKET_URL")]
    url: Option<String>,

    /// KEY=value file consulted when no URL is given.
    #[arg(
        long,
        default_value = DEFAULT_CONNECTION_FILE,
        env = "GENYMOTION_CONNECTION_FILE"
    )]
    connection_file: PathBuf,

    /// Optional TOML settings file.
    #[arg(long, env = "ADB_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// IP address for the local listener [default: 127.0.0.1].
    #[arg(long, env = "ADB_BRIDGE_BIND")]
    bind: Option<IpAddr>,

    /// Local TCP port adb connects to [default: 5555].
    #[arg(long, env = "ADB_BRIDGE_PORT")]
    port: Option<u16>,

    /// Seconds between upstream keepalive pings; 0 disables [default: 30].
    #[arg(long, env = "ADB_BRIDGE_PING_INTERVAL")]
    ping_interval: Option<u64>,

    /// Seconds to wait for any upstream frame after a ping [default: 10].
    #[arg(long, env = "ADB_BRIDGE_PING_TIMEOUT")]
    ping_timeout: Option<u64>,

    /// Verify the upstream certificate chain instead of accepting any.
    #[arg(long, env = "ADB_BRIDGE_VERIFY_TLS")]
    verify_tls: bool,

    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Builds the runtime configuration: defaults, then `settings`, then
    /// any flag that was given.
    fn into_bridge_config(&self, settings: Option<&BridgeSettings>) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        if let Some(settings) = settings {
            settings.apply_to(&mut config);
        }

        if let Some(ip) = self.bind {
            config.listen_addr = SocketAddr::new(ip, config.listen_addr.port());
        }
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        if let Some(secs) = self.ping_interval {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ping_timeout {
            config.ping_timeout = Duration::from_secs(secs);
        }
        if self.verify_tls {
            config.tls_policy = TlsPolicy::Verify;
        }
        config
    }

    /// The explicit URL, if one was given and is not blank.
    fn explicit_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose.
    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    ExitCode::from(exit_status(run(cli).await))
}

/// Maps the run outcome to the process exit status, logging a failure once.
fn exit_status(outcome: anyhow::Result<()>) -> u8 {
    match outcome {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let settings = match &cli.config {
        Some(path) => Some(
            BridgeSettings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
        ),
        None => None,
    };
    let config = cli.into_bridge_config(settings.as_ref());

    let file_contents = match cli.explicit_url() {
        Some(_) => None,
        None => read_connection_file(&cli.connection_file)?,
    };
    let url = resolve_upstream_url(
        cli.explicit_url(),
        file_contents.as_deref(),
        &cli.connection_file,
    )?;

    info!(
        "adb-ws-bridge starting: upstream={url}, local={}",
        config.listen_addr
    );
    if config.keepalive_enabled() {
        info!(
            "keepalive: ping every {:?}, timeout {:?}",
            config.ping_interval, config.ping_timeout
        );
    } else {
        info!("keepalive disabled");
    }
    if config.tls_policy == TlsPolicy::AcceptAny {
        warn!("upstream certificate verification is disabled (use --verify-tls to enable)");
    }
    info!(
        "connect with: adb connect localhost:{}",
        config.listen_addr.port()
    );

    // ── Bridge ────────────────────────────────────────────────────────────────
    let bridge = Bridge::new(config);
    let handle = bridge.handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                handle.stop();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let reason = bridge.run(&url).await.context("bridge failed")?;
    info!("adb-ws-bridge stopped ({reason:?})");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("adb-ws-bridge").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults_produce_default_config() {
        // Arrange: no arguments
        let cli = cli(&[]);

        // Act
        let config = cli.into_bridge_config(None);

        // Assert
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:5555");
    }

    #[test]
    fn test_cli_default_connection_file() {
        let cli = cli(&[]);
        assert_eq!(cli.connection_file, PathBuf::from("/tmp/genymotion_connection.env"));
    }

    #[test]
    fn test_cli_port_override() {
        let config = cli(&["--port", "6555"]).into_bridge_config(None);
        assert_eq!(config.listen_addr.port(), 6555);
    }

    #[test]
    fn test_cli_bind_override() {
        let config = cli(&["--bind", "0.0.0.0"]).into_bridge_config(None);
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:5555");
    }

    #[test]
    fn test_cli_invalid_bind_is_rejected() {
        assert!(Cli::try_parse_from(["adb-ws-bridge", "--bind", "not.an.ip"]).is_err());
    }

    #[test]
    fn test_cli_ping_overrides() {
        let config = cli(&["--ping-interval", "0", "--ping-timeout", "3"]).into_bridge_config(None);
        assert!(!config.keepalive_enabled());
        assert_eq!(config.ping_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_cli_verify_tls_flag() {
        let config = cli(&["--verify-tls"]).into_bridge_config(None);
        assert_eq!(config.tls_policy, TlsPolicy::Verify);
    }

    #[test]
    fn test_settings_apply_when_flag_absent() {
        // Arrange
        let settings = BridgeSettings::parse("port = 7000\n[keepalive]\nping_interval_secs = 15").unwrap();

        // Act
        let config = cli(&[]).into_bridge_config(Some(&settings));

        // Assert
        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.ping_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_flag_beats_settings() {
        let settings = BridgeSettings::parse("port = 7000").unwrap();
        let config = cli(&["--port", "7100"]).into_bridge_config(Some(&settings));
        assert_eq!(config.listen_addr.port(), 7100);
    }

    #[test]
    fn test_exit_status_success() {
        assert_eq!(exit_status(Ok(())), 0);
    }

    #[test]
    fn test_exit_status_failure_is_one() {
        // Arrange
        let failure = Err::<(), _>(anyhow::anyhow!("connection refused")).context("bridge failed");

        // Act
        let status = exit_status(failure);

        // Assert
        assert_eq!(status, 1);
    }

    #[test]
    fn test_blank_url_counts_as_absent() {
        assert_eq!(cli(&["--url", "  "]).explicit_url(), None);
        assert_eq!(
            cli(&["--url", "wss://a.example"]).explicit_url(),
            Some("wss://a.example")
        );
    }
}
