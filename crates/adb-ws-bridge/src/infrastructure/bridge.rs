//! The bridge orchestrator.
//!
//! [`Bridge::run`] drives the whole lifecycle:
//!
//! 1. `Idle -> Connecting`: open the upstream session.
//! 2. Bind the local listener.
//! 3. `-> Running`: spawn the accept loop and the fan-out loop.
//! 4. Wait for the first of: upstream closed, accept loop failed, stop
//!    requested through a [`BridgeHandle`].
//! 5. `-> Stopping`: clear the running flag, close every client, close the
//!    upstream, reap both tasks.
//! 6. `-> Stopped`.
//!
//! The shutdown sequence runs exactly once per bridge; every close it
//! performs is idempotent and failures are logged at `debug` and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::{ActiveClients, FanOutExit, ForwardingEngine, UpstreamTransport, UpstreamUrl};
use crate::domain::{BridgeConfig, BridgeError, BridgeState};
use crate::infrastructure::listener::ClientListener;
use crate::infrastructure::upstream_session::UpstreamSession;

/// Why a bridge that ran stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`BridgeHandle::stop`] was called (e.g. on Ctrl+C).
    Requested,
    /// The upstream session ended; clients were disconnected.
    UpstreamClosed,
}

/// State shared between the bridge and its handles.
struct Shared {
    state: watch::Sender<BridgeState>,
    running: Arc<AtomicBool>,
    clients: Arc<ActiveClients>,
    stop: Notify,
}

impl Shared {
    fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Applies `next` if the state machine allows it.
    fn advance(&self, next: BridgeState) -> bool {
        let moved = self.state.send_if_modified(|current| match current.transition(next) {
            Ok(state) => {
                *current = state;
                true
            }
            Err(e) => {
                debug!("{e}");
                false
            }
        });
        if moved {
            debug!("bridge state -> {next}");
        }
        moved
    }
}

/// Cloneable control handle for a running [`Bridge`].
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
}

impl BridgeHandle {
    /// Requests shutdown.  Safe to call any number of times, before or
    /// during [`Bridge::run`].
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.stop.notify_one();
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    /// Waits until the bridge reaches `target` (or `Stopped`, which ends
    /// every run) and returns the state reached.
    pub async fn wait_for_state(&self, target: BridgeState) -> BridgeState {
        let mut rx = self.shared.state.subscribe();
        let reached = match rx
            .wait_for(|s| *s == target || *s == BridgeState::Stopped)
            .await
        {
            Ok(state) => *state,
            Err(_) => self.shared.state(),
        };
        reached
    }

    /// Number of clients currently being served.
    pub async fn active_clients(&self) -> usize {
        self.shared.clients.len().await
    }
}

/// One upstream session shared by any number of local adb clients.
pub struct Bridge {
    config: Arc<BridgeConfig>,
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                state,
                running: Arc::new(AtomicBool::new(true)),
                clients: Arc::new(ActiveClients::new()),
                stop: Notify::new(),
            }),
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Connects to `url`, binds the listener and serves until stopped.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Connect`] if the upstream session cannot be opened;
    ///   the listener is never bound in that case.
    /// - [`BridgeError::Listen`] if the local port cannot be bound; the
    ///   upstream session is closed first.
    /// - Anything [`serve`](Self::serve) returns.
    pub async fn run(self, url: &UpstreamUrl) -> Result<StopReason, BridgeError> {
        self.shared.advance(BridgeState::Connecting);
        info!("connecting to upstream {url}");

        let connected = tokio::select! {
            r = UpstreamSession::connect(url.as_str(), &self.config) => r,
            _ = self.shared.stop.notified() => {
                info!("stop requested while connecting");
                self.abandon().await;
                return Ok(StopReason::Requested);
            }
        };

        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                error!("upstream connection failed: {e}");
                self.abandon().await;
                return Err(BridgeError::Connect(e));
            }
        };
        info!("upstream connected: {}", url.host());

        let listener = match ClientListener::bind(self.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{e}");
                if let Err(close_err) = session.close().await {
                    debug!("closing upstream after bind failure: {close_err}");
                }
                self.abandon().await;
                return Err(e);
            }
        };

        self.serve(session, listener).await
    }

    /// Serves clients on `listener` over an already-open `upstream`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Accept`] if the accept loop fails unrecoverably, or
    /// [`BridgeError::Task`] if a bridge task panics.
    pub async fn serve(
        self,
        upstream: Arc<dyn UpstreamTransport>,
        listener: ClientListener,
    ) -> Result<StopReason, BridgeError> {
        if self.shared.state() == BridgeState::Idle {
            self.shared.advance(BridgeState::Connecting);
        }

        let engine = ForwardingEngine::new(
            Arc::clone(&upstream),
            Arc::clone(&self.shared.clients),
            Arc::clone(&self.shared.running),
            Arc::clone(&self.config),
        );

        let local_addr = listener.local_addr();
        let mut accept_task = tokio::spawn(listener.run(
            engine.clone(),
            Arc::clone(&self.shared.running),
            self.config.accept_poll_interval,
        ));
        let mut fan_out_task = tokio::spawn(async move { engine.fan_out().await });

        self.shared.advance(BridgeState::Running);
        info!("bridge running on {local_addr}");

        let (outcome, finished) = tokio::select! {
            r = &mut fan_out_task => (match r {
                Ok(FanOutExit::UpstreamClosed(e)) => {
                    info!("upstream closed ({e}); disconnecting clients");
                    Ok(StopReason::UpstreamClosed)
                }
                Ok(FanOutExit::Stopped) => Ok(StopReason::Requested),
                Err(e) => Err(BridgeError::Task(format!("fan-out task: {e}"))),
            }, Finished::FanOut),
            r = &mut accept_task => (match r {
                Ok(Ok(())) => Ok(StopReason::Requested),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(BridgeError::Task(format!("accept task: {e}"))),
            }, Finished::Accept),
            _ = self.shared.stop.notified() => {
                info!("stop requested");
                (Ok(StopReason::Requested), Finished::StopRequest)
            }
        };

        self.shutdown(upstream.as_ref()).await;
        if finished != Finished::Accept {
            if let Some(Err(e)) = reap(accept_task).await {
                debug!("accept loop also ended: {e}");
            }
        }
        if finished != Finished::FanOut {
            if let Some(exit) = reap(fan_out_task).await {
                debug!("fan-out loop also ended: {exit:?}");
            }
        }

        self.shared.advance(BridgeState::Stopped);
        info!("bridge stopped");
        outcome
    }

    /// Stop sequence: flag, clients, upstream.
    async fn shutdown(&self, upstream: &dyn UpstreamTransport) {
        if self.shared.state().is_shutting_down() {
            return;
        }
        info!("shutting down bridge");
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.advance(BridgeState::Stopping);

        let clients = self.shared.clients.close_all().await;
        for client in &clients {
            if let Err(e) = client.close().await {
                debug!("closing client {} failed: {e}", client.peer());
            }
        }
        if !clients.is_empty() {
            info!("disconnected {} client(s)", clients.len());
        }

        if let Err(e) = upstream.close().await {
            debug!("closing upstream failed: {e}");
        }
    }

    /// Stop path for a run that never reached `Running`.
    async fn abandon(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.advance(BridgeState::Stopping);
        self.shared.clients.close_all().await;
        self.shared.advance(BridgeState::Stopped);
    }
}

/// Which branch of the run loop fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    FanOut,
    Accept,
    StopRequest,
}

/// Cancels `task` if still running and waits for it to unwind, so
/// everything it owns (the listener socket in particular) is dropped.
///
/// Returns the task's output when it finished on its own.
async fn reap<T>(task: JoinHandle<T>) -> Option<T> {
    task.abort();
    match task.await {
        Ok(output) => Some(output),
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            debug!("bridge task panicked: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
