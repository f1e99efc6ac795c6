//! Connection registry.
//!
//! Maps connection ids to live connections under one lock. Ids start at 1,
//! grow monotonically and are never handed out twice, even after removal.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use keyline_common::{Error, Result};
use keyline_crypto::Session;

/// Longest wait for a connection's io lock from outside its handler.
pub const LOCK_WAIT: Duration = Duration::from_millis(500);

/// Outbound half of a connection's transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State that must change together: the writer and the session whose keys
/// seal what it writes.
pub struct ConnectionIo {
    pub writer: BoxedWriter,
    pub session: Session,
}

/// One registered connection.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    io: AsyncMutex<ConnectionIo>,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    fn new(id: u64, peer: SocketAddr, writer: BoxedWriter) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            peer,
            io: AsyncMutex::new(ConnectionIo {
                writer,
                session: Session::new(),
            }),
            close_tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn io(&self) -> &AsyncMutex<ConnectionIo> {
        &self.io
    }

    /// Receiver that flips to `true` once [`close`](Self::close) is called.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Flag the connection closed and shut the outbound stream down.
    ///
    /// Safe to call more than once. A handler blocked in a write drops the
    /// lock once it sees the flag; if it has not within [`LOCK_WAIT`] the
    /// shutdown is left to the handler's own exit path.
    pub async fn close(&self) {
        self.close_tx.send_replace(true);
        let mut io = match tokio::time::timeout(LOCK_WAIT, self.io.lock()).await {
            Ok(io) => io,
            Err(_) => {
                warn!(id = self.id, "connection busy; deferring writer shutdown");
                return;
            }
        };
        match tokio::time::timeout(LOCK_WAIT, io.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(id = self.id, error = %e, "writer shutdown failed"),
            Err(_) => debug!(id = self.id, "writer shutdown timed out"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct RegistryInner {
    entries: HashMap<u64, Arc<Connection>>,
    next_id: u64,
}

/// Capacity-bounded connection table.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: HashMap::new(),
                next_id: 1,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new connection.
    ///
    /// When the table is full the writer is dropped, which closes the
    /// outbound stream, and `CapacityExceeded` is returned.
    pub fn insert(&self, peer: SocketAddr, writer: BoxedWriter) -> Result<Arc<Connection>> {
        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            return Err(Error::CapacityExceeded(self.capacity));
        }
        let id = inner.next_id;
        inner.next_id += 1;

        let conn = Arc::new(Connection::new(id, peer, writer));
        inner.entries.insert(id, conn.clone());
        Ok(conn)
    }

    pub fn lookup(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().entries.remove(&id)
    }

    /// Snapshot of all connections, ordered by id.
    pub fn enumerate(&self) -> Vec<Arc<Connection>> {
        let mut conns: Vec<_> = self.lock().entries.values().cloned().collect();
        conns.sort_by_key(|c| c.id());
        conns
    }

    /// Remove and return every connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut conns: Vec<_> = self.lock().entries.drain().map(|(_, c)| c).collect();
        conns.sort_by_key(|c| c.id());
        conns
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
