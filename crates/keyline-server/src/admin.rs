//! Operator actions on a running server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::info;

use keyline_common::{Error, Result};
use keyline_core::{write_frame, SecurePayload, WireMessage};
use keyline_crypto::{SessionState, TerminateOutcome};

use crate::registry::LOCK_WAIT;
use crate::server::Shared;

/// One row of [`Admin::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub id: u64,
    pub peer: SocketAddr,
    /// `None` while the handler holds the connection past [`LOCK_WAIT`].
    pub state: Option<SessionState>,
}

/// Cloneable handle for listing, ending and kicking connections.
#[derive(Clone)]
pub struct Admin {
    shared: Arc<Shared>,
}

impl Admin {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Current connections and their session state, ordered by id.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let mut rows = Vec::new();
        for conn in self.shared.registry.enumerate() {
            let state = timeout(LOCK_WAIT, conn.io().lock())
                .await
                .ok()
                .map(|io| io.session.state());
            rows.push(ConnectionSummary {
                id: conn.id(),
                peer: conn.peer(),
                state,
            });
        }
        rows
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Send a sealed `END_SESSION` to connection `id` and reset its session.
    ///
    /// The transport stays open so the client can handshake again.
    pub async fn terminate(&self, id: u64) -> Result<TerminateOutcome> {
        let conn = self
            .shared
            .registry
            .lookup(id)
            .ok_or_else(|| Error::not_found(format!("connection {id}")))?;

        let mut io = conn.io().lock().await;
        if !io.session.is_established() {
            return Ok(TerminateOutcome::NoActiveSession);
        }

        let frame = io.session.seal(&SecurePayload::EndSession)?;
        let outcome = io.session.on_terminate();
        write_frame(&mut io.writer, &WireMessage::Secure(frame)).await?;

        info!(id, "session ended by operator");
        Ok(outcome)
    }

    /// Drop connection `id` outright.
    pub async fn kick(&self, id: u64) -> Result<()> {
        let conn = self
            .shared
            .registry
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("connection {id}")))?;
        conn.close().await;
        info!(id, peer = %conn.peer(), "connection kicked");
        Ok(())
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        for conn in self.shared.registry.drain() {
            conn.close().await;
        }
        info!("server shut down");
    }
}

impl std::fmt::Debug for Admin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admin")
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    fn admin(capacity: usize) -> Admin {
        let (shutdown, _) = watch::channel(false);
        Admin::new(Arc::new(Shared {
            registry: crate::registry::Registry::new(capacity),
            auth_enabled: true,
            keylog: None,
            shutdown,
        }))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_kick_skip_busy_connection() {
        let admin = admin(4);
        let busy = admin
            .shared
            .registry
            .insert(peer(), Box::new(tokio::io::sink()))
            .unwrap();
        admin
            .shared
            .registry
            .insert(peer(), Box::new(tokio::io::sink()))
            .unwrap();
        let _held = busy.io().lock().await;

        let rows = timeout(LOCK_WAIT * 4, admin.list()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state, None);
        assert_eq!(rows[1].state, Some(SessionState::Unauthenticated));

        timeout(LOCK_WAIT * 4, admin.kick(busy.id()))
            .await
            .unwrap()
            .unwrap();
        assert!(busy.is_closed());
        assert_eq!(admin.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let admin = admin(1);
        assert!(matches!(admin.kick(7).await, Err(Error::NotFound(_))));
        assert!(matches!(admin.terminate(7).await, Err(Error::NotFound(_))));
    }
}
