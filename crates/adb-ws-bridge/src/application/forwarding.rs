//! The forwarding engine: both directions of the bridge.
//!
//! ```text
//!   client A ──pump──┐                      ┌──▶ client A
//!   client B ──pump──┼──▶ UpstreamTransport ─┤fan-out▶ client B
//!   client C ──pump──┘                      └──▶ client C
//! ```
//!
//! - **Client → upstream**: one [`ForwardingEngine::pump_client`] task per
//!   client.  Each chunk read from the socket is sent upstream verbatim as
//!   one message.
//! - **Upstream → clients**: a single [`ForwardingEngine::fan_out`] loop.
//!   Each upstream message is written to a snapshot of the active-client
//!   set; clients whose write fails are evicted without affecting the rest.
//!
//! Payloads are opaque: nothing here looks inside the bytes.
//!
//! # Shutdown
//!
//! Every loop checks the shared `running` flag at each suspension point
//! (read timeout, receive timeout), and a client pump also wakes as soon as
//! its connection is closed by someone else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::clients::{ActiveClients, ClientConnection};
use crate::application::upstream::UpstreamTransport;
use crate::domain::{BridgeConfig, ClientIoError, UpstreamError};

/// Why a client pump returned.
#[derive(Debug)]
pub enum ClientExit {
    /// The peer closed its side (zero-length read).
    PeerDisconnected,
    /// Reading from the socket failed.
    ReadFailed(ClientIoError),
    /// The upstream refused the chunk; the client cannot be served.
    UpstreamUnavailable(UpstreamError),
    /// The connection was closed elsewhere (eviction or bridge shutdown).
    Closed,
}

/// Why the fan-out loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOutExit {
    /// The upstream session closed; the bridge must shut down.
    UpstreamClosed(UpstreamError),
    /// The running flag was cleared.
    Stopped,
}

/// Shared handles for both forwarding directions.  Cheap to clone; every
/// spawned task gets its own copy.
#[derive(Clone)]
pub struct ForwardingEngine {
    upstream: Arc<dyn UpstreamTransport>,
    clients: Arc<ActiveClients>,
    running: Arc<AtomicBool>,
    config: Arc<BridgeConfig>,
}

impl ForwardingEngine {
    pub fn new(
        upstream: Arc<dyn UpstreamTransport>,
        clients: Arc<ActiveClients>,
        running: Arc<AtomicBool>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            upstream,
            clients,
            running,
            config,
        }
    }

    pub fn clients(&self) -> &Arc<ActiveClients> {
        &self.clients
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // ── Admission ────────────────────────────────────────────────────────────

    /// Registers `client` and spawns its pump.
    ///
    /// The client is in the active set *before* the pump starts, so it is
    /// eligible for every upstream message fanned out from that point on.
    /// Returns `None` (after closing the socket) if the set refused the
    /// client because the bridge is shutting down.
    pub async fn admit<R>(
        &self,
        client: Arc<ClientConnection>,
        reader: R,
    ) -> Option<JoinHandle<ClientExit>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if !self.is_running() || !self.clients.register(Arc::clone(&client)).await {
            debug!("client {} refused: bridge is shutting down", client.peer());
            if let Err(e) = client.close().await {
                debug!("closing refused client {} failed: {e}", client.peer());
            }
            return None;
        }

        let engine = self.clone();
        Some(tokio::spawn(async move {
            engine.pump_client(client, reader).await
        }))
    }

    // ── Client → upstream ────────────────────────────────────────────────────

    /// Reads chunks from one client and forwards each verbatim upstream.
    ///
    /// Runs until the peer disconnects, a read fails, the upstream rejects a
    /// send, the connection is closed elsewhere, or the bridge stops.  On
    /// exit the client is removed from the active set and closed; both steps
    /// are idempotent, so racing with the fan-out loop's eviction is fine.
    pub async fn pump_client<R>(&self, client: Arc<ClientConnection>, mut reader: R) -> ClientExit
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let read_timeout = self.config.client_read_timeout;

        let exit = loop {
            if !self.is_running() || !client.is_alive() {
                break ClientExit::Closed;
            }

            let read = tokio::select! {
                r = timeout(read_timeout, reader.read(&mut buf)) => r,
                _ = client.closed() => break ClientExit::Closed,
            };

            let n = match read {
                // Read timeout: the loop's suspension point, not an error.
                Err(_) => continue,
                Ok(Ok(0)) => break ClientExit::PeerDisconnected,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => break ClientExit::ReadFailed(ClientIoError::Read(e)),
            };

            debug!("client {} -> upstream: {n} bytes", client.peer());
            if let Err(e) = self.upstream.send(buf[..n].to_vec()).await {
                break ClientExit::UpstreamUnavailable(e);
            }
        };

        match &exit {
            ClientExit::PeerDisconnected => info!("client {} disconnected", client.peer()),
            ClientExit::Closed => debug!("client {} closed", client.peer()),
            ClientExit::ReadFailed(e) => debug!("client {}: {e}", client.peer()),
            ClientExit::UpstreamUnavailable(e) => {
                debug!("client {}: dropping, {e}", client.peer())
            }
        }

        self.release(&client).await;
        exit
    }

    // ── Upstream → clients ───────────────────────────────────────────────────

    /// Pulls messages from the upstream and fans each one out.
    ///
    /// Returns [`FanOutExit::UpstreamClosed`] as soon as the upstream
    /// reports the session gone, and [`FanOutExit::Stopped`] when the
    /// running flag is cleared.
    pub async fn fan_out(&self) -> FanOutExit {
        let receive_timeout = self.config.upstream_receive_timeout;

        while self.is_running() {
            match self.upstream.receive(receive_timeout).await {
                Ok(None) => continue,
                Ok(Some(message)) => {
                    self.broadcast(&message).await;
                }
                Err(e) => {
                    warn!("upstream receive ended: {e}");
                    return FanOutExit::UpstreamClosed(e);
                }
            }
        }

        FanOutExit::Stopped
    }

    /// Writes `message` to every client in a snapshot of the active set.
    ///
    /// Writes are issued concurrently, each bounded by the client write
    /// timeout.  The next message is not started until this one has been
    /// attempted on every client, so each client sees upstream messages in
    /// receive order.  Returns the number of clients that accepted the
    /// message.
    pub async fn broadcast(&self, message: &[u8]) -> usize {
        let snapshot = self.clients.snapshot().await;
        if snapshot.is_empty() {
            return 0;
        }

        debug!(
            "upstream -> clients: {} bytes to {} client(s)",
            message.len(),
            snapshot.len()
        );

        let write_timeout = self.config.client_write_timeout;
        let results = join_all(
            snapshot
                .iter()
                .map(|client| client.write_message(message, write_timeout)),
        )
        .await;

        let mut delivered = 0;
        for (client, result) in snapshot.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("evicting client {}: {e}", client.peer());
                    self.release(client).await;
                }
            }
        }
        delivered
    }

    /// Removes a client from the set and closes it; close failures are
    /// logged and otherwise ignored.
    async fn release(&self, client: &ClientConnection) {
        self.clients.remove(client.id()).await;
        if let Err(e) = client.close().await {
            debug!("closing client {} failed: {e}", client.peer());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
