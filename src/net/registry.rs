//! Process-wide registry of live connections and their tasks.
//!
//! # Responsibilities
//! - Track every open client connection for introspection and shutdown
//! - Keep one task handle per connection so shutdown can cancel and await it
//! - Count requests across the process
//!
//! # Design Decisions
//! - All membership state sits behind one mutex, so register/deregister are
//!   atomic with respect to the shutdown sweep
//! - Membership is tied to a `Registration` guard owned by the connection's
//!   handler; dropping it (normal exit, error, or task abort) deregisters
//!   exactly once
//! - Once shutdown starts, new registrations are refused

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::net::connection::{ConnectionId, ConnectionInfo, ConnectionState};
use crate::observability::metrics;

/// A header injected into proxied requests. Reserved; the core never writes these.
pub type DefaultHeader = (Vec<u8>, Vec<u8>);

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is shutting down")]
    ShuttingDown,
    #[error("{0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("{0} already has a task in flight")]
    DuplicateTask(ConnectionId),
    #[error("{0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    tasks: HashMap<ConnectionId, JoinHandle<()>>,
    closing: bool,
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<RegistryInner>,
    total_requests: AtomicU64,
    default_headers: Vec<DefaultHeader>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared registry handle. Cloning is cheap; all clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_headers(default_headers: Vec<DefaultHeader>) -> Self {
        Self {
            shared: Arc::new(Shared {
                default_headers,
                ..Shared::default()
            }),
        }
    }

    /// Add a freshly accepted connection.
    ///
    /// The returned guard removes the entry (and its task slot) when dropped.
    pub fn register(&self, info: ConnectionInfo) -> Result<Registration, RegistryError> {
        let id = info.id;
        {
            let mut inner = self.shared.lock();
            if inner.closing {
                return Err(RegistryError::ShuttingDown);
            }
            if inner.connections.contains_key(&id) {
                return Err(RegistryError::DuplicateConnection(id));
            }
            inner.connections.insert(id, info);
            metrics::set_active_connections(inner.connections.len());
        }
        metrics::record_connection_opened();
        tracing::trace!(connection_id = %id, "Connection registered");

        Ok(Registration {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    /// Attach the task driving a registered connection.
    ///
    /// Refused while shutting down (the task is aborted), for unknown
    /// connections (the task already finished and deregistered, so the handle
    /// is dropped), and when the connection already has a task.
    pub fn track_task(&self, id: ConnectionId, handle: JoinHandle<()>) -> Result<(), RegistryError> {
        let mut inner = self.shared.lock();
        if inner.closing {
            handle.abort();
            return Err(RegistryError::ShuttingDown);
        }
        if !inner.connections.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }
        if inner.tasks.contains_key(&id) {
            return Err(RegistryError::DuplicateTask(id));
        }
        inner.tasks.insert(id, handle);
        Ok(())
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.shared.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.shared.lock().connections.contains_key(&id)
    }

    /// Number of tracked, not yet finished tasks.
    pub fn task_count(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Copy of one connection's metadata.
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.shared.lock().connections.get(&id).cloned()
    }

    /// Copy of every live connection's metadata, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<_> = self.shared.lock().connections.values().cloned().collect();
        connections.sort_by_key(|info| info.id);
        connections
    }

    pub fn total_requests(&self) -> u64 {
        self.shared.total_requests.load(Ordering::Relaxed)
    }

    pub fn default_headers(&self) -> &[DefaultHeader] {
        &self.shared.default_headers
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.lock().closing
    }

    /// Cancel every tracked task and wait for each to exit.
    ///
    /// Aborting a task drops its client and upstream streams, which closes
    /// them, and drops its `Registration`, which deregisters it. Returns the
    /// number of tasks that were cancelled.
    pub async fn shutdown(&self) -> usize {
        let tasks: Vec<(ConnectionId, JoinHandle<()>)> = {
            let mut inner = self.shared.lock();
            inner.closing = true;
            inner.tasks.drain().collect()
        };

        tracing::info!(tasks = tasks.len(), "Cancelling connection tasks");
        for (_, handle) in &tasks {
            handle.abort();
        }

        let count = tasks.len();
        for (id, handle) in tasks {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    tracing::trace!(connection_id = %id, "Connection task cancelled");
                }
                Err(e) => {
                    tracing::error!(connection_id = %id, error = %e, "Connection task panicked");
                }
            }
        }

        let leftover = self.len();
        if leftover > 0 {
            tracing::warn!(connections = leftover, "Connections still registered after shutdown");
        }
        count
    }
}

/// Membership of one connection in the registry.
///
/// Owned by the connection's handler. Dropping it deregisters the connection.
#[derive(Debug)]
pub struct Registration {
    shared: Arc<Shared>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Record a state transition in the registry entry.
    pub fn set_state(&self, state: ConnectionState) {
        if let Some(info) = self.shared.lock().connections.get_mut(&self.id) {
            info.state = state;
            info.last_activity = Instant::now();
        }
    }

    /// Bump the last-activity timestamp.
    pub fn touch(&self) {
        if let Some(info) = self.shared.lock().connections.get_mut(&self.id) {
            info.last_activity = Instant::now();
        }
    }

    /// Count a parsed request on this connection. Returns the process-wide total.
    pub fn record_request(&self) -> u64 {
        metrics::record_request();
        self.shared.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.connections.remove(&self.id);
        // The handle may be the one currently running this drop; removing it
        // only detaches it.
        inner.tasks.remove(&self.id);
        metrics::set_active_connections(inner.connections.len());
        drop(inner);
        tracing::trace!(connection_id = %self.id, "Connection deregistered");
    }
}
