//! Error taxonomy.
//!
//! | Error            | Scope      | Handling                                   |
//! |------------------|------------|--------------------------------------------|
//! | [`ConfigError`]  | startup    | fatal, reported, exit code 1               |
//! | [`UpstreamError`]| upstream   | `Connect` is fatal; `Closed` stops bridge  |
//! | [`ClientIoError`]| one client | contained: that client is evicted          |
//! | [`BridgeError`]  | bridge     | returned from `Bridge::run`, exit code 1   |

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// The upstream URL could not be found or is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither the environment nor the connection file yielded a URL.
    #[error(
        "upstream WebSocket URL not found; set GENYMOTION_WEBSOCKET_URL or provide \
         GENYMOTION_ADB_URL / publicAdbUrl in {connection_file}"
    )]
    MissingUrl { connection_file: PathBuf },

    /// The URL text is not a URL at all.
    #[error("invalid upstream URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL parsed but is not a secure WebSocket URL.
    #[error("invalid upstream URL '{url}': expected wss:// scheme, got '{scheme}://'")]
    InvalidScheme { url: String, scheme: String },

    /// The URL has no host component.
    #[error("invalid upstream URL '{url}': missing host")]
    MissingHost { url: String },

    /// The connection file exists but could not be read.
    #[error("failed to read connection file {path}: {source}")]
    ConnectionFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of the upstream WebSocket session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Handshake, DNS or TCP failure while opening the session.
    #[error("upstream connect failed: {0}")]
    Connect(String),

    /// TLS configuration could not be built.
    #[error("upstream TLS setup failed: {0}")]
    Tls(String),

    /// `send` was called while the session is not open.
    #[error("upstream session is not open")]
    NotOpen,

    /// The session is closed (peer close, transport error or keepalive expiry).
    #[error("upstream connection closed: {0}")]
    Closed(String),

    /// A frame could not be written.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Per-client I/O failures.  Never escapes the client's own loop.
#[derive(Debug, Error)]
pub enum ClientIoError {
    #[error("client read failed: {0}")]
    Read(#[source] io::Error),

    #[error("client write failed: {0}")]
    Write(#[source] io::Error),

    #[error("client write timed out")]
    WriteTimeout,

    #[error("client connection already closed")]
    Closed,
}

/// Fatal bridge failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The upstream session could not be opened.
    #[error(transparent)]
    Connect(UpstreamError),

    /// The local port could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The accept loop hit an unrecoverable error while running.
    #[error("client listener failed: {0}")]
    Accept(#[source] io::Error),

    /// A bridge task panicked or was cancelled unexpectedly.
    #[error("bridge task failed: {0}")]
    Task(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
