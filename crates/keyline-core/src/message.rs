//! Wire messages.
//!
//! Every payload is a JSON object whose `type` field selects the variant.
//! Unknown `type` values and missing or mis-typed fields fail to parse.

use serde::{Deserialize, Serialize};

/// Outer message carried in one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// Handshake initiation (client → server), sent in the clear.
    ClientHello(ClientHello),
    /// Handshake response (server → client), sent in the clear.
    ServerHello(ServerHello),
    /// Sealed payload, only valid once a session is established.
    Secure(SecureFrame),
}

impl WireMessage {
    /// Value of the `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientHello(_) => "CLIENT_HELLO",
            Self::ServerHello(_) => "SERVER_HELLO",
            Self::Secure(_) => "SECURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub p: u64,
    pub g: u64,
    #[serde(rename = "A")]
    pub client_public: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(rename = "B")]
    pub server_public: u64,
}

/// Ciphertext and optional tag, both base64 text.
///
/// `mac` is present iff authentication is enabled on the sending channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureFrame {
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Inner message carried inside a [`SecureFrame`] once opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurePayload {
    /// Application text.
    Data { text: String },
    /// Ask the peer to drop the session keys and return to the handshake.
    EndSession,
}

impl SecurePayload {
    pub fn data(text: impl Into<String>) -> Self {
        Self::Data { text: text.into() }
    }
}
