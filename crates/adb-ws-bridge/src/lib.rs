//! adb-ws-bridge library crate.
//!
//! Exposes a cloud Android device's WebSocket-only ADB endpoint as a plain
//! local TCP port, so standard tooling (`adb connect localhost:5555`) works
//! unchanged.  One upstream `wss://` session is shared by every local
//! client.
//!
//! # Architecture
//!
//! ```text
//! adb client ─┐
//! adb client ─┼─ TCP ─▶ [adb-ws-bridge] ─ wss:// ─▶ device ADB endpoint
//! adb client ─┘
//!   ├── domain/           Pure types: BridgeConfig, lifecycle states, errors
//!   ├── application/      URL discovery, the transport seam, client set,
//!   │                     forwarding engine
//!   └── infrastructure/
//!         ├── upstream_session/  WebSocket client + keepalive (tokio-tungstenite)
//!         ├── tls/               Certificate policy (rustls)
//!         ├── listener/          Local TCP accept loop
//!         └── bridge/            Orchestration and shutdown
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and works on generic async readers,
//!   writers and the [`application::UpstreamTransport`] trait.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-tungstenite` and `rustls`.
//!
//! Bytes are never interpreted: what a client writes reaches the upstream
//! unchanged, and every upstream message reaches every client unchanged.

/// Domain layer: configuration, lifecycle states and error types.
pub mod domain;

/// Application layer: discovery and forwarding logic.
pub mod application;

/// Infrastructure layer: WebSocket session, TLS, listener and orchestrator.
pub mod infrastructure;
