//! The upstream transport seam.
//!
//! The forwarding engine only needs four operations from the upstream
//! session.  Putting them behind a trait lets the engine be exercised with
//! in-memory doubles; the real WebSocket implementation lives in
//! [`crate::infrastructure::upstream_session`].

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::UpstreamError;

/// One full-duplex channel of opaque byte messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Transmits one message verbatim.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::NotOpen`] if the session is not open, or
    /// [`UpstreamError::Transport`] if the frame could not be written.
    async fn send(&self, payload: Vec<u8>) -> Result<(), UpstreamError>;

    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when the timeout elapses; this is the polling
    /// contract, not a failure.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::Closed`] once the session is gone.
    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, UpstreamError>;

    /// Closes the session.  Idempotent: closing a closed session is `Ok`.
    async fn close(&self) -> Result<(), UpstreamError>;

    /// `true` while the session is open.
    fn is_open(&self) -> bool;
}
