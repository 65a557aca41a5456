//! Domain layer for adb-ws-bridge.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or async runtimes.  They describe *what* the bridge is
//! (its configuration, its lifecycle states, and the ways it can fail)
//! without saying anything about *how* bytes move.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures and their defaults
//! - Lifecycle state machines (bridge and upstream session)
//! - Error types shared by the application and infrastructure layers
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

pub mod config;
pub mod error;
pub mod state;

pub use config::{BridgeConfig, TlsPolicy};
pub use error::{BridgeError, ClientIoError, ConfigError, UpstreamError};
pub use state::{BridgeState, SessionState, StateError};

/// Identifies one accepted local TCP client for the lifetime of its connection.
pub type ClientId = uuid::Uuid;
