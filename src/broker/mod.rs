//! Broker core: registry, store and connection table behind one owner.
//!
//! All state lives in [`BrokerState`], guarded by a single mutex. Each handler
//! takes the lock, runs a synchronous transformation and releases it; nothing
//! awaits while the lock is held. Outbound frames are queued on per-socket
//! channels, so pushes never block.

pub mod connections;
mod delivery;
mod dispatch;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::BrokerConfig;
use crate::error::ProtocolError;
use crate::protocol::{ClientRequest, Instance, Message, ServerFrame};
use crate::registry::InstanceRegistry;
use crate::store::{MessageStore, StoreStats};

pub use connections::{ConnectionManager, FrameSender};

/// Everything the broker owns.
#[derive(Debug)]
pub struct BrokerState {
    pub(crate) registry: InstanceRegistry,
    pub(crate) store: MessageStore,
    pub(crate) connections: ConnectionManager,
    pub(crate) config: BrokerConfig,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            registry: InstanceRegistry::new(config.grace_period()),
            store: MessageStore::new(),
            connections: ConnectionManager::new(),
            config,
        }
    }
}

/// Snapshot served on `/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub instances: usize,
    pub connections: usize,
    pub messages: StoreStats,
}

/// A message broker instance. Construct one per server; tests may run many.
#[derive(Debug)]
pub struct Broker {
    state: Mutex<BrokerState>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BrokerConfig, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(BrokerState::new(config)),
            clock,
            shutdown,
        }
    }

    /// Accept a socket. Assigns a temporary id and sends `connected`.
    pub async fn connect(&self, sender: FrameSender) -> String {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.connections.open(&connection_id, sender);
        state.connections.send(
            &connection_id,
            ServerFrame::Connected {
                connection_id: connection_id.clone(),
            },
        );
        tracing::info!("New connection established: {}", connection_id);
        connection_id
    }

    /// Decode and dispatch one text frame from the socket bound to `conn`.
    ///
    /// Returns the id the socket is bound to afterwards.
    pub async fn handle_text(&self, conn: &str, text: &str) -> String {
        match ClientRequest::parse(text) {
            Ok(request) => self.handle_request(conn, request).await,
            Err(error) => {
                self.reject(conn, error).await;
                conn.to_string()
            }
        }
    }

    pub async fn handle_request(&self, conn: &str, request: ClientRequest) -> String {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.dispatch(conn, request, now)
    }

    /// Report a protocol error to the offending socket.
    pub async fn reject(&self, conn: &str, error: ProtocolError) {
        tracing::warn!("Protocol error from {}: {}", conn, error);
        let state = self.state.lock().await;
        state.connections.send(conn, error.into());
    }

    /// Forget a closed socket and its live instance. History is kept.
    pub async fn disconnect(&self, conn: &str) {
        let mut state = self.state.lock().await;
        state.connections.close(conn);
        match state.registry.unregister(conn) {
            Some(instance) => {
                tracing::info!("Connection closed for instance: {} ({})", instance.name, conn)
            }
            None => tracing::info!("Connection closed: {}", conn),
        }
    }

    /// Physically remove expired messages.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.store.expiry_sweep(now)
    }

    pub async fn stats(&self) -> BrokerStats {
        let now = self.clock.now();
        let state = self.state.lock().await;
        BrokerStats {
            instances: state.registry.len(),
            connections: state.connections.len(),
            messages: state.store.stats(now),
        }
    }

    pub async fn instances(&self) -> Vec<Instance> {
        self.state.lock().await.registry.list()
    }

    /// Inspect the store without side effects.
    pub async fn messages_for(&self, instance_id: &str, undelivered_only: bool) -> Vec<Message> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state.store.messages_for(instance_id, undelivered_only, now)
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.store.len()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop all sockets. Their tasks observe the signal and close.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let closed = self.state.lock().await.connections.close_all();
        tracing::info!("Broker shut down, closed {} connections", closed);
    }
}
