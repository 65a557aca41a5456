//! The upstream WebSocket session.
//!
//! One [`UpstreamSession`] wraps one `wss://` connection.  The stream is
//! split so a send never waits behind a pending receive:
//!
//! - the **sink** is shared by every client pump and the keepalive task;
//! - the **stream** is read only by the fan-out loop through
//!   [`UpstreamTransport::receive`].
//!
//! Session state lives in a `tokio::sync::watch` channel so that every
//! waiter (receive, keepalive) wakes the moment the session is closed,
//! whoever closes it.
//!
//! # Keepalive
//!
//! Every `ping_interval` a WebSocket Ping is sent.  Any frame received
//! afterwards (Pong or data) counts as a sign of life.  If nothing arrives
//! within `ping_timeout` the session is marked closed, which the fan-out
//! loop reports as [`UpstreamError::Closed`].  Frames are only observed
//! while someone is calling `receive`; the bridge's fan-out loop always is.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::application::upstream::UpstreamTransport;
use crate::domain::{BridgeConfig, SessionState, UpstreamError};
use crate::infrastructure::tls::build_connector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live upstream WebSocket session.
pub struct UpstreamSession {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    state: watch::Sender<SessionState>,
    close_reason: StdMutex<String>,
    /// Guards the one-time close handshake on the sink.
    sink_closed: AtomicBool,
    started: Instant,
    /// Milliseconds since `started` at which the last frame arrived.
    last_seen_ms: AtomicU64,
    close_timeout: Duration,
    keepalive: StdMutex<Option<JoinHandle<()>>>,
}

impl UpstreamSession {
    /// Performs the WebSocket handshake and starts keepalive.
    ///
    /// `url` may be `ws://` or `wss://`; validation of the scheme happens
    /// earlier, at discovery.  The whole handshake is bounded by
    /// `config.connect_timeout`.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::Tls`] if the TLS configuration cannot be built, or
    /// [`UpstreamError::Connect`] on DNS, TCP, TLS or HTTP-upgrade failure
    /// and on timeout.
    pub async fn connect(url: &str, config: &BridgeConfig) -> Result<Arc<Self>, UpstreamError> {
        let (state, _) = watch::channel(SessionState::Connecting);
        let connector = build_connector(config.tls_policy)?;

        debug!("upstream session {}: {url}", *state.borrow());
        let handshake = connect_async_tls_with_config(url, None, true, Some(connector));
        let (ws, response) = match timeout(config.connect_timeout, handshake).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(UpstreamError::Connect(e.to_string())),
            Err(_) => {
                return Err(UpstreamError::Connect(format!(
                    "handshake timed out after {:?}",
                    config.connect_timeout
                )))
            }
        };
        debug!("upstream handshake complete: HTTP {}", response.status());

        let (sink, stream) = ws.split();
        state.send_replace(SessionState::Open);

        let session = Arc::new(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            state,
            close_reason: StdMutex::new(String::new()),
            sink_closed: AtomicBool::new(false),
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            close_timeout: config.connect_timeout,
            keepalive: StdMutex::new(None),
        });

        if config.keepalive_enabled() {
            let task = tokio::spawn(keepalive(
                Arc::downgrade(&session),
                session.state.subscribe(),
                config.ping_interval,
                config.ping_timeout,
            ));
            if let Ok(mut slot) = session.keepalive.lock() {
                *slot = Some(task);
            }
        }

        Ok(session)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self) {
        self.last_seen_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Moves the session to `Closed`, recording the first reason given.
    fn mark_closed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state.send_replace(SessionState::Closed) != SessionState::Closed {
            info!("upstream session closed: {reason}");
            if let Ok(mut slot) = self.close_reason.lock() {
                *slot = reason;
            }
        }
    }

    fn closed_error(&self) -> UpstreamError {
        let reason = self
            .close_reason
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();
        if reason.is_empty() {
            UpstreamError::Closed("session closed".to_string())
        } else {
            UpstreamError::Closed(reason)
        }
    }

    async fn ping(&self, limit: Duration) -> Result<(), UpstreamError> {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Ping(Vec::new())).await
        };
        match timeout(limit, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UpstreamError::Transport(e.to_string())),
            Err(_) => Err(UpstreamError::Transport("ping write timed out".to_string())),
        }
    }

    fn stop_keepalive(&self) {
        if let Ok(mut slot) = self.keepalive.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl UpstreamTransport for UpstreamSession {
    async fn send(&self, payload: Vec<u8>) -> Result<(), UpstreamError> {
        if !self.is_open() {
            return Err(UpstreamError::NotOpen);
        }

        // A write stalled on an undrained peer ends when the session closes.
        let mut closed_rx = self.state.subscribe();
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Binary(payload)).await
        };
        tokio::select! {
            result = write => result.map_err(|e| {
                self.mark_closed(format!("send failed: {e}"));
                UpstreamError::Transport(e.to_string())
            }),
            _ = closed(&mut closed_rx) => Err(self.closed_error()),
        }
    }

    async fn receive(&self, limit: Duration) -> Result<Option<Vec<u8>>, UpstreamError> {
        let mut closed_rx = self.state.subscribe();
        if *closed_rx.borrow_and_update() == SessionState::Closed {
            return Err(self.closed_error());
        }

        let deadline = Instant::now() + limit;
        let mut stream = self.stream.lock().await;

        loop {
            let next = tokio::select! {
                next = timeout_at(deadline, stream.next()) => next,
                _ = closed(&mut closed_rx) => return Err(self.closed_error()),
            };

            match next {
                Err(_) => return Ok(None),
                Ok(Some(Ok(Message::Binary(data)))) => {
                    self.touch();
                    return Ok(Some(data));
                }
                // Text frames are forwarded as their UTF-8 bytes.
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.touch();
                    return Ok(Some(text.into_bytes()));
                }
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => self.touch(),
                Ok(Some(Ok(Message::Frame(_)))) => {}
                Ok(Some(Ok(Message::Close(frame)))) => {
                    let reason = match frame {
                        Some(f) => format!("peer sent close ({}: {})", f.code, f.reason),
                        None => "peer sent close".to_string(),
                    };
                    self.mark_closed(reason);
                    return Err(self.closed_error());
                }
                Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) | Ok(None) => {
                    self.mark_closed("connection closed");
                    return Err(self.closed_error());
                }
                Ok(Some(Err(e))) => {
                    self.mark_closed(format!("transport error: {e}"));
                    return Err(self.closed_error());
                }
            }
        }
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        self.mark_closed("closed locally");
        self.stop_keepalive();

        if self.sink_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match timeout(self.close_timeout, close).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(e)) => Err(UpstreamError::Transport(e.to_string())),
            Err(_) => Err(UpstreamError::Transport(
                "close handshake timed out".to_string(),
            )),
        }
    }

    fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}

/// Resolves once the session state is `Closed` (or the sender is gone).
async fn closed(rx: &mut watch::Receiver<SessionState>) {
    let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
}

/// Ping/deadline loop; see the module docs.
async fn keepalive(
    session: Weak<UpstreamSession>,
    mut state: watch::Receiver<SessionState>,
    interval: Duration,
    limit: Duration,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = closed(&mut state) => return,
        }

        let sent_at = {
            let Some(session) = session.upgrade() else { return };
            let sent_at = session.elapsed_ms();
            if let Err(e) = session.ping(limit).await {
                session.mark_closed(format!("keepalive ping failed: {e}"));
                return;
            }
            debug!("upstream keepalive: ping sent");
            sent_at
        };

        tokio::select! {
            _ = sleep(limit) => {}
            _ = closed(&mut state) => return,
        }

        let Some(session) = session.upgrade() else { return };
        if session.last_seen_ms.load(Ordering::Relaxed) < sent_at {
            warn!("upstream keepalive: no response within {limit:?}");
            session.mark_closed(format!("no response to keepalive ping within {limit:?}"));
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            ping_interval: Duration::ZERO,
            connect_timeout: Duration::from_secs(2),
            ..BridgeConfig::default()
        }
    }

    /// Spawns a WebSocket server that echoes binary frames back.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_connect_send_and_receive_round_trip() {
        // Arrange
        let url = echo_server().await;
        let session = UpstreamSession::connect(&url, &fast_config()).await.unwrap();
        assert!(session.is_open());

        // Act
        session.send(b"\x00\x01binary\xff".to_vec()).await.unwrap();
        let echoed = session.receive(Duration::from_secs(2)).await.unwrap();

        // Assert
        assert_eq!(echoed.as_deref(), Some(&b"\x00\x01binary\xff"[..]));
    }

    #[tokio::test]
    async fn test_receive_times_out_with_none() {
        let url = echo_server().await;
        let session = UpstreamSession::connect(&url, &fast_config()).await.unwrap();

        let result = session.receive(Duration::from_millis(50)).await;
        assert_eq!(result, Ok(None));
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_send() {
        let url = echo_server().await;
        let session = UpstreamSession::connect(&url, &fast_config()).await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.send(b"late".to_vec()).await,
            Err(UpstreamError::NotOpen)
        );
        assert!(matches!(
            session.receive(Duration::from_millis(10)).await,
            Err(UpstreamError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_blocked_send_returns_when_session_closes() {
        // Arrange: a send stuck waiting for the sink
        let url = echo_server().await;
        let session = UpstreamSession::connect(&url, &fast_config()).await.unwrap();
        let held = session.sink.lock().await;
        let sender = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.send(b"stalled".to_vec()).await }
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        // Act: close while the write is still pending
        let closer = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.close().await }
        });
        let result = timeout(Duration::from_secs(1), sender)
            .await
            .expect("send gives up once the session closes")
            .unwrap();

        // Assert
        assert!(matches!(result, Err(UpstreamError::Closed(_))));
        drop(held);
        timeout(Duration::from_secs(2), closer)
            .await
            .expect("close proceeds once the sink is free")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_as_closed() {
        // Arrange: a server that closes right after the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = ws.close(None).await;
        });
        let session = UpstreamSession::connect(&format!("ws://{addr}"), &fast_config())
            .await
            .unwrap();

        // Act
        let result = session.receive(Duration::from_secs(2)).await;

        // Assert
        assert!(matches!(result, Err(UpstreamError::Closed(_))));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let result = UpstreamSession::connect(&format!("ws://127.0.0.1:{port}"), &fast_config()).await;
        assert!(matches!(result, Err(UpstreamError::Connect(_))));
    }

    #[tokio::test]
    async fn test_keepalive_closes_silent_session() {
        // Arrange: a server that completes the handshake, then never reads,
        // so Pings are never answered
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ws = accept_async(tcp).await.unwrap();
            let _ = hold_rx.await;
        });
        let config = BridgeConfig {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(100),
            ..fast_config()
        };
        let session = UpstreamSession::connect(&format!("ws://{addr}"), &config)
            .await
            .unwrap();

        // Act: poll like the fan-out loop does
        let outcome = timeout(Duration::from_secs(2), async {
            loop {
                match session.receive(Duration::from_millis(20)).await {
                    Ok(_) => continue,
                    Err(e) => break e,
                }
            }
        })
        .await
        .expect("keepalive must close the session");

        // Assert
        assert!(matches!(outcome, UpstreamError::Closed(ref r) if r.contains("keepalive")));
        drop(hold_tx);
    }

    #[tokio::test]
    async fn test_keepalive_keeps_responsive_session_open() {
        let url = echo_server().await;
        let config = BridgeConfig {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(200),
            ..fast_config()
        };
        let session = UpstreamSession::connect(&url, &config).await.unwrap();

        // Several ping cycles; the echo server answers Pings while reading.
        let deadline = Instant::now() + Duration::from_millis(600);
        while Instant::now() < deadline {
            assert!(session.receive(Duration::from_millis(20)).await.is_ok());
        }
        assert!(session.is_open());
    }
}
