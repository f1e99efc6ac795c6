//! Per-connection session state.
//!
//! ```text
//!                 HandshakeComplete
//!  UNAUTHENTICATED ----------------> ESTABLISHED
//!        ^                                |
//!        +------------ Terminate ---------+
//! ```
//!
//! The channel exists exactly when the session is established; terminating
//! drops it, which zeroizes the keys.

use std::fmt;

use thiserror::Error;

use keyline_core::{SecureFrame, SecurePayload, WireMessage};

use crate::channel::{ChannelError, SecureChannel};
use crate::kdf::DerivedKeys;

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No keys; only a handshake may run.
    Unauthenticated,
    /// Keys installed; sealed traffic flows.
    Established,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Established => "ESTABLISHED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    HandshakeComplete,
    Terminate,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeComplete => f.write_str("handshake complete"),
            Self::Terminate => f.write_str("terminate"),
        }
    }
}

/// A completed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{1} is not valid in state {0}")]
    InvalidTransition(SessionState, SessionEvent),

    #[error("no active session")]
    NotEstablished,
}

impl From<SessionError> for keyline_common::Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotEstablished => Self::NoActiveSession,
            other => Self::protocol(other),
        }
    }
}

/// Result of a terminate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated(SessionTransition),
    /// The session was not established; nothing changed.
    NoActiveSession,
}

/// What the receiver should do with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Process the frame.
    Accept,
    /// Log and drop the frame; the connection stays up.
    Ignore,
    /// Close the connection.
    Violation,
}

/// Session of one connection, as seen by the responder.
#[derive(Debug, Default)]
pub struct Session {
    channel: Option<SecureChannel>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        if self.channel.is_some() {
            SessionState::Established
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn is_established(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel(&self) -> Option<&SecureChannel> {
        self.channel.as_ref()
    }

    /// Install keys from a completed handshake.
    pub fn on_handshake_complete(
        &mut self,
        keys: &DerivedKeys,
        auth_enabled: bool,
    ) -> Result<SessionTransition, SessionError> {
        if self.is_established() {
            return Err(SessionError::InvalidTransition(
                SessionState::Established,
                SessionEvent::HandshakeComplete,
            ));
        }
        self.channel = Some(SecureChannel::from_keys(keys, auth_enabled));
        Ok(SessionTransition {
            from: SessionState::Unauthenticated,
            to: SessionState::Established,
            event: SessionEvent::HandshakeComplete,
        })
    }

    /// Drop the keys and return to the unauthenticated state.
    pub fn on_terminate(&mut self) -> TerminateOutcome {
        match self.channel.take() {
            Some(_) => TerminateOutcome::Terminated(SessionTransition {
                from: SessionState::Established,
                to: SessionState::Unauthenticated,
                event: SessionEvent::Terminate,
            }),
            None => TerminateOutcome::NoActiveSession,
        }
    }

    /// Decide how a responder treats `message` in the current state.
    ///
    /// Before a handshake only `CLIENT_HELLO` is allowed. Afterwards only
    /// `SECURE` frames are processed and anything else is dropped.
    pub fn admit(&self, message: &WireMessage) -> Admission {
        match (self.state(), message) {
            (SessionState::Unauthenticated, WireMessage::ClientHello(_)) => Admission::Accept,
            (SessionState::Unauthenticated, _) => Admission::Violation,
            (SessionState::Established, WireMessage::Secure(_)) => Admission::Accept,
            (SessionState::Established, _) => Admission::Ignore,
        }
    }

    pub fn seal(&self, message: &SecurePayload) -> Result<SecureFrame, SessionFrameError> {
        let channel = self.channel.as_ref().ok_or(SessionError::NotEstablished)?;
        Ok(channel.seal(message)?)
    }

    pub fn open(&self, frame: &SecureFrame) -> Result<SecurePayload, SessionFrameError> {
        let channel = self.channel.as_ref().ok_or(SessionError::NotEstablished)?;
        Ok(channel.open(frame)?)
    }
}

/// Failure to seal or open through a session.
#[derive(Debug, Error)]
pub enum SessionFrameError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<SessionFrameError> for keyline_common::Error {
    fn from(err: SessionFrameError) -> Self {
        match err {
            SessionFrameError::Session(e) => e.into(),
            SessionFrameError::Channel(e) => e.into(),
        }
    }
}
