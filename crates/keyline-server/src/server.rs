//! Accept loop and per-connection handlers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use keyline_common::{Error, Result, DEFAULT_PORT};
use keyline_core::{read_frame, write_frame, FrameError, SecurePayload, WireMessage};
use keyline_crypto::{respond, Admission, KeyLog, SessionState, TerminateOutcome};

use crate::admin::Admin;
use crate::registry::{Connection, Registry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_clients: usize,
    /// Attach and require HMAC tags on sealed frames.
    pub auth_enabled: bool,
    /// Write a key log entry per handshake into this directory.
    pub keylog_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr, max_clients: usize) -> Self {
        Self {
            listen,
            max_clients,
            auth_enabled: true,
            keylog_dir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(Error::config("max_clients must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)), 16)
    }
}

/// State shared by the accept loop, every handler and the admin handle.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) auth_enabled: bool,
    pub(crate) keylog: Option<KeyLog>,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// A bound server, ready to [`run`](Server::run).
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen).await?;
        let (shutdown, _) = watch::channel(false);

        info!(
            addr = %listener.local_addr()?,
            max_clients = config.max_clients,
            mac = config.auth_enabled,
            "server listening"
        );

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                registry: Registry::new(config.max_clients),
                auth_enabled: config.auth_enabled,
                keylog: config.keylog_dir.map(KeyLog::new),
                shutdown,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for operator actions; usable while [`run`](Self::run) is active.
    pub fn admin(&self) -> Admin {
        Admin::new(self.shared.clone())
    }

    /// Accept connections until [`Admin::shutdown`] is called.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = raised(&mut shutdown_rx) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        info!("accept loop stopped");
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();

        match self.shared.registry.insert(peer, Box::new(writer)) {
            Ok(conn) => {
                info!(id = conn.id(), %peer, "client connected");
                tokio::spawn(handle_connection(self.shared.clone(), conn, reader));
            }
            Err(e) => {
                warn!(%peer, error = %e, "refusing connection");
            }
        }
    }
}

/// Resolve once the flag behind `rx` is `true`; never if the sender is gone.
pub(crate) async fn raised(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Flow {
    Continue,
    Close(&'static str),
}

async fn handle_connection(shared: Arc<Shared>, conn: Arc<Connection>, mut reader: OwnedReadHalf) {
    let id = conn.id();
    let mut close_rx = conn.close_signal();
    let mut shutdown_rx = shared.shutdown.subscribe();

    let reason = loop {
        let frame = tokio::select! {
            _ = raised(&mut close_rx) => break "kicked",
            _ = raised(&mut shutdown_rx) => break "server shutting down",
            frame = read_frame::<_, WireMessage>(&mut reader) => frame,
        };

        match frame {
            Ok(message) => {
                let flow = tokio::select! {
                    _ = raised(&mut close_rx) => break "kicked",
                    _ = raised(&mut shutdown_rx) => break "server shutting down",
                    flow = process_frame(&shared, &conn, message) => flow,
                };
                if let Flow::Close(reason) = flow {
                    break reason;
                }
            }
            Err(FrameError::ConnectionClosed) => break "peer closed",
            Err(e) if e.is_recoverable() => {
                let state = conn.io().lock().await.session.state();
                if state == SessionState::Unauthenticated {
                    warn!(id, error = %e, "malformed frame before handshake");
                    break "protocol violation";
                }
                warn!(id, error = %e, "ignoring malformed frame");
            }
            Err(e) => {
                warn!(id, error = %e, "framing error");
                break "framing error";
            }
        }
    };

    shared.registry.remove(id);
    conn.close().await;
    info!(id, reason, "client disconnected");
}

async fn process_frame(shared: &Shared, conn: &Connection, message: WireMessage) -> Flow {
    let id = conn.id();
    let mut io = conn.io().lock().await;

    match io.session.admit(&message) {
        Admission::Accept => {}
        Admission::Ignore => {
            debug!(id, kind = message.kind(), "ignoring frame on established session");
            return Flow::Continue;
        }
        Admission::Violation => {
            warn!(
                id,
                kind = message.kind(),
                state = %io.session.state(),
                "protocol violation"
            );
            return Flow::Close("protocol violation");
        }
    }

    match message {
        WireMessage::ClientHello(hello) => {
            let (reply, derivation) = match respond(&hello) {
                Ok(result) => result,
                Err(e) => {
                    warn!(id, error = %e, "handshake rejected");
                    return Flow::Close("handshake rejected");
                }
            };
            if let Err(e) = write_frame(&mut io.writer, &WireMessage::ServerHello(reply)).await {
                warn!(id, error = %e, "failed to send SERVER_HELLO");
                return Flow::Close("write failed");
            }

            let derivation = derivation.with_connection_id(id);
            if let Err(e) = io
                .session
                .on_handshake_complete(&derivation.keys, shared.auth_enabled)
            {
                warn!(id, error = %e, "session transition failed");
                return Flow::Close("session error");
            }
            if let Some(keylog) = &shared.keylog {
                if let Err(e) = keylog.record(&derivation) {
                    warn!(id, error = %e, "failed to write key log");
                }
            }
            info!(id, params = %derivation.params, "session established");
        }
        WireMessage::Secure(frame) => match io.session.open(&frame) {
            Ok(SecurePayload::Data { text }) => {
                info!(id, %text, "message received");
            }
            Ok(SecurePayload::EndSession) => {
                if let TerminateOutcome::Terminated(_) = io.session.on_terminate() {
                    info!(id, "client ended session");
                }
            }
            Err(e) => {
                warn!(id, error = %e, "dropping sealed frame");
            }
        },
        WireMessage::ServerHello(_) => {
            debug!(id, "ignoring SERVER_HELLO from client");
        }
    }

    Flow::Continue
}
