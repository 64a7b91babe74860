//! The per-server poll client.
//!
//! An [`InfoClient`] owns one [`ConnectionSession`] and drives it on a fixed
//! timer: every tick connects if needed, sends `INFO`, frames the reply and
//! replaces the current snapshot. Lifecycle and data changes are surfaced as
//! [`ClientEvent`]s on a broadcast channel; per-poll failures become events,
//! never panics, so one faulted server cannot take down its siblings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use crate::server::MonitoredServer;
use crate::session::{ConnectionSession, SessionError};
use crate::snapshot::InfoSnapshot;

/// Timeout for establishing a TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Events emitted by a client, in per-client order:
/// `Start` → (`Auth`, when configured) → repeated `Info` | `Error` → `Stop`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Start,
    Stop,
    /// Outcome of the `AUTH` handshake. `false` stops the client; polling
    /// resumes only on an explicit restart.
    Auth(bool),
    /// A completed poll with its new snapshot.
    Info(Arc<InfoSnapshot>),
    /// A failed poll cycle; the message mirrors the degenerate snapshot for
    /// transport errors, while protocol errors leave the snapshot untouched.
    Error(String),
}

/// Polls one monitored server on its configured interval.
#[derive(Debug)]
pub struct InfoClient {
    pub server: Arc<MonitoredServer>,
    sections: Vec<String>,
    session: Mutex<ConnectionSession>,
    status: RwLock<Arc<InfoSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
    running: AtomicBool,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl InfoClient {
    pub fn new(server: Arc<MonitoredServer>) -> Arc<Self> {
        Self::with_sections(server, Vec::new())
    }

    /// A client that requests specific `INFO` sections. Multiple sections at
    /// once are only supported by Redis 7+; names are not validated here.
    pub fn with_sections(server: Arc<MonitoredServer>, sections: Vec<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);

        Arc::new(InfoClient {
            session: Mutex::new(ConnectionSession::new(Arc::clone(&server))),
            server,
            sections,
            status: RwLock::new(Arc::new(InfoSnapshot::default())),
            events,
            running: AtomicBool::new(false),
            task: std::sync::Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recently completed snapshot; the initial empty snapshot
    /// before the first successful poll. Never a half-built value.
    pub async fn status(&self) -> Arc<InfoSnapshot> {
        Arc::clone(&*self.status.read().await)
    }

    /// Starts polling. Idempotent: a second call while running is a no-op.
    ///
    /// Emits [`ClientEvent::Start`], polls once immediately, then repeats at
    /// the server's interval. Ticks that fire while a poll is still in flight
    /// are skipped, so at most one reply is pending per session at any time.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.events.send(ClientEvent::Start);

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // a zero interval would panic the timer
            let period = client.server.interval.max(Duration::from_millis(100));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !client.running.load(Ordering::SeqCst) {
                    break;
                }

                client.poll().await;
            }
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Stops the timer and emits [`ClientEvent::Stop`]. No-op when not
    /// running. An idle connection is kept and reused if `start` is called
    /// again before it goes stale; one abandoned mid-reply still carries the
    /// leftover bytes and is rebuilt on the next poll instead. A reply that
    /// completes after this call is discarded without touching the current
    /// snapshot.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }

        let _ = self.events.send(ClientEvent::Stop);
    }

    /// One poll cycle. All failures are converted to events; nothing escapes
    /// to the timer task.
    async fn poll(self: &Arc<Self>) {
        let deadline = self.server.interval.max(CONNECT_TIMEOUT);

        if timeout(deadline, self.poll_inner()).await.is_err() {
            // the reply never completed; the late bytes would poison the next
            // cycle, so the connection is discarded along with them
            self.session.lock().await.reset();
            self.fail(format!("poll of {} timed out", self.server.address()))
                .await;
        }
    }

    async fn poll_inner(self: &Arc<Self>) {
        let mut session = self.session.lock().await;

        match session.ensure_ready(CONNECT_TIMEOUT).await {
            Ok(None) => {}
            Ok(Some(accepted)) => {
                let _ = self.events.send(ClientEvent::Auth(accepted));
            }
            Err(err) if err.is_auth() => {
                warn!(server = %self.server.label, %err, "authentication denied, stopping client");
                let _ = self.events.send(ClientEvent::Auth(false));
                drop(session);
                self.stop();
                return;
            }
            Err(err) => {
                drop(session);
                self.fail(err.to_string()).await;
                return;
            }
        }

        match session.fetch_info(&self.sections).await {
            Ok(fields) => {
                drop(session);
                debug!(server = %self.server.label, fields = fields.len(), "poll complete");
                self.commit(InfoSnapshot::new(fields)).await;
            }
            Err(err) if err.is_protocol() => {
                // current cycle dropped, previous snapshot stays in place
                drop(session);
                warn!(server = %self.server.label, %err, "protocol error");
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
            }
            Err(err) => {
                drop(session);
                self.fail(err.to_string()).await;
            }
        }
    }

    /// Replaces the current snapshot and emits [`ClientEvent::Info`]. Gated
    /// on the running flag so a reply arriving after `stop` changes nothing.
    async fn commit(&self, snapshot: InfoSnapshot) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let snapshot = Arc::new(snapshot);
        *self.status.write().await = Arc::clone(&snapshot);
        let _ = self.events.send(ClientEvent::Info(snapshot));
    }

    /// Replaces the current snapshot with the degenerate error snapshot and
    /// emits [`ClientEvent::Error`].
    async fn fail(&self, message: String) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        warn!(server = %self.server.label, "poll failed: {message}");
        *self.status.write().await = Arc::new(InfoSnapshot::error_snapshot(message.clone()));
        let _ = self.events.send(ClientEvent::Error(message));
    }
}

impl Drop for InfoClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
