//! The active-client set.
//!
//! [`ClientConnection`] wraps the *write* side of one accepted local socket;
//! the read side is owned by that client's pump task.  [`ActiveClients`] is
//! the only shared mutable structure in the bridge: the accept loop adds to
//! it, client pumps remove themselves from it, and the fan-out loop takes
//! snapshots of it and prunes clients whose writes fail.
//!
//! # Concurrency rules
//!
//! - All mutation goes through a `tokio::sync::RwLock`; no lock is held
//!   across socket I/O.
//! - The fan-out loop iterates a *snapshot* (`Vec<Arc<ClientConnection>>`),
//!   never the live map, so concurrent removal is harmless.
//! - Removal and close are both idempotent.
//! - Once [`ActiveClients::close_all`] has run, registration is refused so a
//!   client accepted during shutdown cannot slip in after the drain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

use crate::domain::{ClientId, ClientIoError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One locally-accepted TCP peer.
pub struct ClientConnection {
    id: ClientId,
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
    alive: AtomicBool,
    closed: Notify,
}

impl ClientConnection {
    /// Wraps the write half of an accepted socket.
    pub fn new<W>(peer: SocketAddr, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            writer: Mutex::new(Box::new(writer)),
            alive: AtomicBool::new(true),
            closed: Notify::new(),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Liveness flag; cleared exactly once by [`close`](Self::close).
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Writes one complete message, bounded by `limit`.
    ///
    /// The whole payload is written (`write_all`) and flushed, so a message
    /// is never truncated on the client side.
    ///
    /// # Errors
    ///
    /// - [`ClientIoError::Closed`] if the connection was already closed.
    /// - [`ClientIoError::WriteTimeout`] if `limit` elapsed first.
    /// - [`ClientIoError::Write`] on a socket error.
    pub async fn write_message(&self, payload: &[u8], limit: Duration) -> Result<(), ClientIoError> {
        if !self.is_alive() {
            return Err(ClientIoError::Closed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(payload).await?;
            writer.flush().await
        };

        match timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ClientIoError::Write(e)),
            Err(_) => Err(ClientIoError::WriteTimeout),
        }
    }

    /// Marks the connection dead, wakes its pump, and shuts the socket's
    /// write side down.
    ///
    /// Closing an already-closed connection returns `Ok(())` without
    /// touching the socket again.
    ///
    /// # Errors
    ///
    /// Returns the socket error from `shutdown`, which shutdown paths log
    /// and otherwise ignore.
    pub async fn close(&self) -> std::io::Result<()> {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        // notify_one stores a permit if the pump is not waiting right now.
        self.closed.notify_one();

        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        if !self.is_alive() {
            return;
        }
        self.closed.notified().await;
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, Arc<ClientConnection>>,
    closed: bool,
}

/// The shared set of currently connected, not-yet-failed clients.
#[derive(Default)]
pub struct ActiveClients {
    inner: RwLock<Registry>,
}

impl ActiveClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `client`.
    ///
    /// Returns `false` (and leaves the set unchanged) if the client is
    /// already registered or the set has been closed for shutdown.
    pub async fn register(&self, client: Arc<ClientConnection>) -> bool {
        let mut registry = self.inner.write().await;
        if registry.closed || registry.clients.contains_key(&client.id()) {
            return false;
        }
        registry.clients.insert(client.id(), client);
        true
    }

    /// Removes the client with `id`.  Idempotent: returns `None` if it is
    /// not (or no longer) present.
    pub async fn remove(&self, id: ClientId) -> Option<Arc<ClientConnection>> {
        self.inner.write().await.clients.remove(&id)
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.inner.read().await.clients.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.clients.is_empty()
    }

    /// Point-in-time copy of the members, safe to iterate while others
    /// register or remove.
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().await.clients.values().cloned().collect()
    }

    /// Refuses further registrations and hands back every member.
    ///
    /// The caller is responsible for closing the returned connections.
    pub async fn close_all(&self) -> Vec<Arc<ClientConnection>> {
        let mut registry = self.inner.write().await;
        registry.closed = true;
        registry.clients.drain().map(|(_, client)| client).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_then_remove() {
        // Arrange
        let clients = ActiveClients::new();
        let (_remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);

        // Act
        assert!(clients.register(Arc::clone(&client)).await);

        // Assert
        assert!(clients.contains(client.id()).await);
        assert_eq!(clients.len().await, 1);
        assert!(clients.remove(client.id()).await.is_some());
        assert!(clients.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_client_never_registered_twice() {
        let clients = ActiveClients::new();
        let (_remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);

        assert!(clients.register(Arc::clone(&client)).await);
        assert!(!clients.register(Arc::clone(&client)).await);
        assert_eq!(clients.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let clients = ActiveClients::new();
        let (_remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);
        clients.register(Arc::clone(&client)).await;

        assert!(clients.remove(client.id()).await.is_some());
        assert!(clients.remove(client.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_unaffected_by_later_removal() {
        // Arrange: two clients
        let clients = ActiveClients::new();
        let (_r1, l1) = duplex(64);
        let (_r2, l2) = duplex(64);
        let c1 = ClientConnection::new(peer(), l1);
        let c2 = ClientConnection::new(peer(), l2);
        clients.register(Arc::clone(&c1)).await;
        clients.register(Arc::clone(&c2)).await;

        // Act: snapshot, then remove one from the live set
        let snapshot = clients.snapshot().await;
        clients.remove(c1.id()).await;

        // Assert: the snapshot still holds both, the live set only one
        assert_eq!(snapshot.len(), 2);
        assert_eq!(clients.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_drains_and_refuses_new_clients() {
        let clients = ActiveClients::new();
        let (_r1, l1) = duplex(64);
        clients.register(ClientConnection::new(peer(), l1)).await;

        let drained = clients.close_all().await;
        assert_eq!(drained.len(), 1);
        assert!(clients.is_empty().await);

        let (_r2, l2) = duplex(64);
        assert!(!clients.register(ClientConnection::new(peer(), l2)).await);
        assert!(clients.is_empty().await);
    }

    #[tokio::test]
    async fn test_write_message_delivers_bytes() {
        let (mut remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);

        client
            .write_message(b"CNXN\x00\x00\x00\x01", Duration::from_secs(1))
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"CNXN\x00\x00\x00\x01");
    }

    #[tokio::test]
    async fn test_write_to_vanished_peer_fails() {
        // Dropping the remote end makes every write fail with BrokenPipe.
        let (remote, local) = duplex(64);
        drop(remote);
        let client = ClientConnection::new(peer(), local);

        let result = client.write_message(b"data", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientIoError::Write(_))));
    }

    #[tokio::test]
    async fn test_write_to_stalled_peer_times_out() {
        // A 4-byte pipe nobody reads from cannot absorb a 64-byte message.
        let (_remote, local) = duplex(4);
        let client = ClientConnection::new(peer(), local);

        let result = client
            .write_message(&[0u8; 64], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ClientIoError::WriteTimeout)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_signals_eof() {
        let (mut remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);

        client.close().await.unwrap();
        client.close().await.unwrap();

        assert!(!client.is_alive());
        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let (_remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);
        client.close().await.unwrap();

        let result = client.write_message(b"late", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientIoError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let (_remote, local) = duplex(64);
        let client = ClientConnection::new(peer(), local);

        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.closed().await })
        };
        client.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() must resolve")
            .unwrap();
    }
}
