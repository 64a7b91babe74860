//! The multi-server client pool.
//!
//! Owns the whole set of monitored servers as one unit and rebroadcasts every
//! per-client event tagged with its originating client. The pool never
//! touches a client's internal state; it only forwards.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::client::{ClientEvent, InfoClient};
use crate::server::MonitoredServer;
use crate::snapshot::InfoSnapshot;

/// A client event annotated with the client it came from.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub client: Arc<InfoClient>,
    pub event: ClientEvent,
}

pub struct ClientPool {
    clients: Mutex<Vec<Arc<InfoClient>>>,
    events: broadcast::Sender<PoolEvent>,
}

impl ClientPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);

        ClientPool {
            clients: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Builds a client for the server and wires its events into the pool
    /// stream. Returns the client so a caller may interact with it directly.
    ///
    /// Clients keep insertion order, which is configuration order. Duplicate
    /// server identities are a caller error and are not checked here.
    pub fn add_server(&self, server: Arc<MonitoredServer>) -> Arc<InfoClient> {
        let client = InfoClient::new(server);

        let mut receiver = client.subscribe();
        let origin = Arc::clone(&client);
        let forward = self.events.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let _ = forward.send(PoolEvent {
                            client: Arc::clone(&origin),
                            event,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(server = %origin.server.label, skipped, "client event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.clients.lock().unwrap().push(Arc::clone(&client));

        client
    }

    /// Starts every client, in pool order. No ordering is guaranteed between
    /// clients beyond "all are started"; each runs on its own timer.
    pub fn start(&self) {
        for client in self.clients() {
            client.start();
        }
    }

    pub fn stop(&self) {
        for client in self.clients() {
            client.stop();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn clients(&self) -> Vec<Arc<InfoClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().unwrap().is_empty()
    }

    /// The current snapshot of every client, pool order preserved. The
    /// returned view is owned; later polls do not mutate it.
    pub async fn statuses(&self) -> Vec<(Arc<MonitoredServer>, Arc<InfoSnapshot>)> {
        let clients = self.clients();
        let mut statuses = Vec::with_capacity(clients.len());

        for client in clients {
            let status = client.status().await;
            statuses.push((Arc::clone(&client.server), status));
        }

        statuses
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        ClientPool::new()
    }
}
