//! Accept loop for the forward proxy.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Build a `ConnectionHandler` per connection with the current config snapshot
//! - Spawn the handler and hand its task to the registry
//! - On shutdown: stop accepting, cancel and await every connection task

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::http::handler::ConnectionHandler;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::registry::ConnectionRegistry;
use crate::net::ClientStream;

/// Pause after a failed accept (e.g. out of file descriptors) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The forward proxy server.
pub struct ProxyServer {
    config: Arc<ArcSwap<ProxyConfig>>,
    registry: ConnectionRegistry,
}

impl ProxyServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_shared_config(Arc::new(ArcSwap::from_pointee(config)))
    }

    /// Create a server reading its config from a slot that may be swapped at runtime.
    pub fn with_shared_config(config: Arc<ArcSwap<ProxyConfig>>) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Handle to the live connection registry.
    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Handle to the shared config slot.
    pub fn config(&self) -> Arc<ArcSwap<ProxyConfig>> {
        Arc::clone(&self.config)
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "Proxy server starting");

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer, permit)) => self.spawn_connection(stream, permit),
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                    Err(e) => break Err(e),
                },
            }
        };
        drop(listener);

        self.drain().await;
        tracing::info!(
            total_requests = self.registry.total_requests(),
            "Proxy server stopped"
        );
        result
    }

    fn spawn_connection<S: ClientStream>(&self, stream: S, permit: ConnectionPermit) {
        let config = self.config.load_full();
        let handler = match ConnectionHandler::accept(stream, &self.registry, config) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!(error = %e, "Connection refused by registry");
                return;
            }
        };

        let id = handler.id();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _ = handler.run().await;
        });

        if let Err(e) = self.registry.track_task(id, handle) {
            // Unknown connection means the task already ran to completion.
            tracing::trace!(connection_id = %id, error = %e, "Connection task not tracked");
        }
    }

    /// Cancel and await all connection tasks, bounded by the shutdown grace period.
    async fn drain(&self) {
        let grace = self.config.load().timeouts.shutdown_grace();
        let live = self.registry.len();
        tracing::info!(connections = live, grace = ?grace, "Draining connections");

        match tokio::time::timeout(grace, self.registry.shutdown()).await {
            Ok(cancelled) => tracing::info!(cancelled, "All connection tasks finished"),
            Err(_) => tracing::warn!(
                remaining = self.registry.len(),
                "Shutdown grace period elapsed with tasks still running"
            ),
        }
    }
}
