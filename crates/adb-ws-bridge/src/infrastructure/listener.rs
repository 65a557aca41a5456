//! Local TCP listener: the accept loop.
//!
//! `accept()` is polled with a short timeout so the loop notices a cleared
//! `running` flag within one `accept_poll_interval`, even when no adb
//! client is connecting.  Each accepted socket is split; the write half
//! becomes a [`ClientConnection`] and the read half is handed to the
//! engine, which registers the client and spawns its pump.
//!
//! Dropping the listener (when the loop returns or its task is aborted)
//! closes the port, so connections after shutdown are refused.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{ClientConnection, ForwardingEngine};
use crate::domain::BridgeError;

/// A bound local listener.
pub struct ClientListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ClientListener {
    /// Binds `addr`.  Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Listen`] if the address is in use or not bindable.
    pub async fn bind(addr: SocketAddr) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::Listen { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::Listen { addr, source })?;

        info!("listening for adb clients on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts clients until `running` is cleared.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Accept`] on an accept error that is not transient.
    pub async fn run(
        self,
        engine: ForwardingEngine,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Result<(), BridgeError> {
        loop {
            if !running.load(Ordering::Relaxed) {
                debug!("accept loop: shutdown flag set");
                return Ok(());
            }

            let (stream, peer) = match timeout(poll_interval, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) if is_transient(&e) => {
                    warn!("transient accept error: {e}");
                    continue;
                }
                Ok(Err(e)) => {
                    error!("accept failed: {e}");
                    return Err(BridgeError::Accept(e));
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("client {peer}: set_nodelay failed: {e}");
            }

            let (reader, writer) = stream.into_split();
            let client = ClientConnection::new(peer, writer);
            let id = client.id();

            // The pump task runs detached; it removes itself on exit.
            if engine.admit(client, reader).await.is_some() {
                info!(
                    "client connected: {peer} (id {id}, {} active)",
                    engine.clients().len().await
                );
            }
        }
    }
}

/// Accept errors caused by a single peer rather than the listener.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
