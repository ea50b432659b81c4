use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::types::OutboundMessage;

/// Monotonic connection counter; distinguishes a replaced connection from
/// its replacement when both were registered under the same agent id.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A live outbound channel to one connected agent. Cloning is cheap; the
/// underlying sender is shared.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub agent_id: String,
    pub conn_id: u64,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConnectionHandle {
    pub fn new(agent_id: impl Into<String>, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            agent_id: agent_id.into(),
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            connected_at: Utc::now(),
            tx,
        }
    }

    /// Queue a message for delivery. Returns false when the peer's writer
    /// task has gone away; callers treat that as a silent skip.
    pub fn send(&self, message: OutboundMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Tracks at most one live bidirectional channel per connected agent id.
///
/// This is the only in-process shared mutable structure in the engine.
/// DashMap keeps register/unregister/iterate safe under concurrency;
/// iteration works on a membership snapshot so removal of one entry never
/// affects delivery to the others.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, superseding any existing entry for the same
    /// agent id (last writer wins). The superseded handle is returned so
    /// the caller can let its channel close.
    pub fn register(
        &self,
        agent_id: &str,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> (ConnectionHandle, Option<ConnectionHandle>) {
        let handle = ConnectionHandle::new(agent_id, tx);
        let superseded = self.connections.insert(agent_id.to_string(), handle.clone());
        if superseded.is_some() {
            debug!(agent_id, "superseding existing connection");
        }
        (handle, superseded)
    }

    /// Remove an agent's connection. No-op when absent.
    pub fn unregister(&self, agent_id: &str) {
        self.connections.remove(agent_id);
    }

    /// Remove the entry for `agent_id` only if it is still the connection
    /// identified by `conn_id`. A disconnect racing with a re-handshake
    /// must not evict the newer connection.
    pub fn unregister_exact(&self, agent_id: &str, conn_id: u64) -> bool {
        self.connections
            .remove_if(agent_id, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    pub fn get(&self, agent_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(agent_id).map(|entry| entry.clone())
    }

    /// Best-effort delivery to one agent. False when the agent is offline
    /// or its channel is closed.
    pub fn send_to(&self, agent_id: &str, message: OutboundMessage) -> bool {
        match self.get(agent_id) {
            Some(handle) => handle.send(message),
            None => false,
        }
    }

    /// Snapshot of currently connected agent ids, in unspecified order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
