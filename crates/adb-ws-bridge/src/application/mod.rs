//! Application layer for adb-ws-bridge.
//!
//! Everything that decides *what happens to bytes* lives here, independent
//! of real sockets:
//!
//! - [`discovery`]: finding and validating the upstream URL
//! - [`upstream`]: the [`UpstreamTransport`] seam the engine talks to
//! - [`clients`]: the shared set of active local clients
//! - [`forwarding`]: the per-client pumps and the upstream fan-out loop
//!
//! The engine is generic over `AsyncRead`/`AsyncWrite` and the transport
//! trait, so all of it is unit-tested with in-memory pipes and doubles.

pub mod clients;
pub mod discovery;
pub mod forwarding;
pub mod upstream;

pub use clients::{ActiveClients, ClientConnection};
pub use discovery::{parse_connection_file, resolve_upstream_url, UpstreamUrl};
pub use forwarding::{ClientExit, FanOutExit, ForwardingEngine};
pub use upstream::UpstreamTransport;
