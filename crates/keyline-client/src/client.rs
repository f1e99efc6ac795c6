//! Client driver.
//!
//! A background task reads frames off the socket and forwards them over a
//! channel. The driver drains that channel before every command, so a
//! server-initiated `END_SESSION` is applied before the next send.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use keyline_common::{Error, Result, DEFAULT_PORT};
use keyline_core::{read_frame, write_frame, FrameError, SecurePayload, ServerHello, WireMessage};
use keyline_crypto::{
    ClientHandshake, DhParams, KeyDerivation, KeyLog, Session, SessionState, TerminateOutcome,
};

const INBOUND_QUEUE: usize = 64;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    pub auth_enabled: bool,
    pub keylog_dir: Option<PathBuf>,
    /// How long to wait for `SERVER_HELLO`.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            auth_enabled: true,
            keylog_dir: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{DEFAULT_PORT}"))
    }
}

/// Something the server did on its own initiative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Sealed text from the server.
    Message(String),
    /// The server ended the session; keys were dropped.
    SessionEnded,
    /// The transport closed.
    Disconnected(Option<String>),
}

enum Inbound {
    Frame(WireMessage),
    Closed(Option<String>),
}

struct Link {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
}

/// Initiator side of the protocol.
pub struct Client {
    config: ClientConfig,
    keylog: Option<KeyLog>,
    link: Option<Link>,
    session: Session,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let keylog = config.keylog_dir.clone().map(KeyLog::new);
        Self {
            config,
            keylog,
            link: None,
            session: Session::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Open the transport. Returns `false` if already connected.
    pub async fn connect(&mut self) -> Result<bool> {
        self.drain_inbound();
        if self.link.is_some() {
            return Ok(false);
        }

        let stream = TcpStream::connect(&self.config.server_addr).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_QUEUE);

        self.link = Some(Link {
            peer,
            writer,
            inbound,
            reader: tokio::spawn(read_loop(reader, tx)),
        });
        self.session = Session::new();
        info!(%peer, "connected");
        Ok(true)
    }

    /// Run the handshake, generating whichever of `p` and `g` are missing.
    ///
    /// An established session is ended with `END_SESSION` first, since the
    /// server ignores hellos while it holds keys.
    pub async fn handshake(&mut self, p: Option<u64>, g: Option<u64>) -> Result<KeyDerivation> {
        self.drain_inbound();
        if self.link.is_none() {
            return Err(Error::NotConnected);
        }
        let params = DhParams::resolve(p, g)?;
        if self.session.is_established() {
            info!("ending current session for a new handshake");
            self.terminate().await?;
        }

        let (pending, hello) = ClientHandshake::start(params)?;
        self.send_frame(&WireMessage::ClientHello(hello)).await?;

        let reply = self.await_server_hello().await?;
        let derivation = pending.finish(&reply)?;
        self.session
            .on_handshake_complete(&derivation.keys, self.config.auth_enabled)?;

        if let Some(keylog) = &self.keylog {
            if let Err(e) = keylog.record(&derivation) {
                warn!(error = %e, "failed to write key log");
            }
        }
        info!(params = %derivation.params, "session established");
        Ok(derivation)
    }

    /// Seal and send `text`.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.drain_inbound();
        if self.link.is_none() {
            return Err(Error::NotConnected);
        }
        let frame = self.session.seal(&SecurePayload::data(text))?;
        self.send_frame(&WireMessage::Secure(frame)).await
    }

    /// Ask the server to end the session and drop the keys.
    pub async fn terminate(&mut self) -> Result<TerminateOutcome> {
        self.drain_inbound();
        if !self.session.is_established() {
            return Ok(TerminateOutcome::NoActiveSession);
        }
        let frame = self.session.seal(&SecurePayload::EndSession)?;
        let outcome = self.session.on_terminate();
        self.send_frame(&WireMessage::Secure(frame)).await?;
        info!("session ended");
        Ok(outcome)
    }

    /// Close the transport and forget the session.
    pub async fn close(&mut self) {
        self.session.on_terminate();
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.writer.shutdown().await {
                debug!(error = %e, "writer shutdown failed");
            }
            link.reader.abort();
            info!(peer = %link.peer, "disconnected");
        }
    }

    /// Apply every frame that has already arrived.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(inbound) = self.try_next_inbound() {
            events.extend(self.apply(inbound));
        }
        events
    }

    /// Wait for the next server-initiated event.
    ///
    /// Cancel safe. Pends forever while disconnected.
    pub async fn next_event(&mut self) -> ClientEvent {
        loop {
            let inbound = match self.link.as_mut() {
                Some(link) => link
                    .inbound
                    .recv()
                    .await
                    .unwrap_or(Inbound::Closed(None)),
                None => std::future::pending().await,
            };
            if let Some(event) = self.apply(inbound) {
                return event;
            }
        }
    }

    fn drain_inbound(&mut self) {
        for event in self.poll_events() {
            debug!(?event, "applied pending event");
        }
    }

    fn try_next_inbound(&mut self) -> Option<Inbound> {
        let link = self.link.as_mut()?;
        match link.inbound.try_recv() {
            Ok(inbound) => Some(inbound),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(Inbound::Closed(None)),
        }
    }

    fn apply(&mut self, inbound: Inbound) -> Option<ClientEvent> {
        match inbound {
            Inbound::Frame(WireMessage::Secure(frame)) => {
                if !self.session.is_established() {
                    debug!("ignoring SECURE frame without a session");
                    return None;
                }
                match self.session.open(&frame) {
                    Ok(SecurePayload::Data { text }) => Some(ClientEvent::Message(text)),
                    Ok(SecurePayload::EndSession) => {
                        self.session.on_terminate();
                        info!("server ended the session");
                        Some(ClientEvent::SessionEnded)
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping sealed frame");
                        None
                    }
                }
            }
            Inbound::Frame(other) => {
                debug!(kind = other.kind(), "ignoring unexpected frame");
                None
            }
            Inbound::Closed(reason) => {
                self.session.on_terminate();
                if let Some(link) = self.link.take() {
                    link.reader.abort();
                    info!(peer = %link.peer, "server closed the connection");
                }
                Some(ClientEvent::Disconnected(reason))
            }
        }
    }

    async fn await_server_hello(&mut self) -> Result<ServerHello> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            let link = self.link.as_mut().ok_or(Error::NotConnected)?;
            let inbound = match tokio::time::timeout_at(deadline, link.inbound.recv()).await {
                Ok(Some(inbound)) => inbound,
                Ok(None) => Inbound::Closed(None),
                Err(_) => return Err(Error::timeout("no SERVER_HELLO from server")),
            };
            match inbound {
                Inbound::Frame(WireMessage::ServerHello(reply)) => return Ok(reply),
                Inbound::Closed(reason) => {
                    self.apply(Inbound::Closed(reason));
                    return Err(Error::NotConnected);
                }
                other => {
                    self.apply(other);
                }
            }
        }
    }

    async fn send_frame(&mut self, message: &WireMessage) -> Result<()> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        if let Err(e) = write_frame(&mut link.writer, message).await {
            warn!(error = %e, "send failed; dropping connection");
            self.close().await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_addr", &self.config.server_addr)
            .field("connected", &self.is_connected())
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::Sender<Inbound>) {
    loop {
        match read_frame::<_, WireMessage>(&mut reader).await {
            Ok(message) => {
                if tx.send(Inbound::Frame(message)).await.is_err() {
                    return;
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "ignoring malformed frame");
            }
            Err(FrameError::ConnectionClosed) => {
                let _ = tx.send(Inbound::Closed(None)).await;
                return;
            }
            Err(e) => {
                let _ = tx.send(Inbound::Closed(Some(e.to_string()))).await;
                return;
            }
        }
    }
}
