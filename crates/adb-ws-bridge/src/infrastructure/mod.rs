//! Infrastructure layer for adb-ws-bridge.
//!
//! Everything that touches a socket, a file or a TLS stack:
//!
//! - `upstream_session`: the tokio-tungstenite client with keepalive
//! - `tls`: rustls client configuration for the `wss://` handshake
//! - `listener`: the polled local TCP accept loop
//! - `bridge`: the orchestrator (lifecycle, shutdown, [`BridgeHandle`])
//! - `connection_file` / `settings_file`: startup configuration readers
//!
//! # What does NOT belong here?
//!
//! - Forwarding decisions (that is the application layer)
//! - CLI parsing (that is `main.rs`)

pub mod bridge;
pub mod connection_file;
pub mod listener;
pub mod settings_file;
pub mod tls;
pub mod upstream_session;

pub use bridge::{Bridge, BridgeHandle, StopReason};
pub use connection_file::{read_connection_file, DEFAULT_CONNECTION_FILE};
pub use listener::ClientListener;
pub use settings_file::{BridgeSettings, SettingsError};
pub use upstream_session::UpstreamSession;
