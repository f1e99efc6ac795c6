//! Initiator and responder sides of the key agreement.
//!
//! The client picks the group, sends `CLIENT_HELLO {p, g, A}` and waits for
//! `SERVER_HELLO {B}`; the server answers a hello in one step. Both sides
//! produce a [`KeyDerivation`] record holding everything needed to install
//! the session and to write a key log entry.

use tracing::debug;

use keyline_core::{ClientHello, ServerHello};

use crate::dh::{DhParams, KeyAgreementError, KeyPair, SharedSecret};
use crate::kdf::{derive_keys, DerivedKeys};

/// Which end of the handshake produced a derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// Outcome of one completed handshake.
#[derive(Debug)]
pub struct KeyDerivation {
    pub role: Role,
    /// Server-assigned connection id, when known.
    pub connection_id: Option<u64>,
    pub params: DhParams,
    pub client_public: u64,
    pub server_public: u64,
    pub shared: SharedSecret,
    pub keys: DerivedKeys,
}

impl KeyDerivation {
    pub fn with_connection_id(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }
}

/// Client side of a handshake in flight.
#[derive(Debug)]
pub struct ClientHandshake {
    params: DhParams,
    keypair: KeyPair,
}

impl ClientHandshake {
    /// Generate a key pair for `params` and the hello announcing it.
    pub fn start(params: DhParams) -> Result<(Self, ClientHello), KeyAgreementError> {
        let keypair = KeyPair::generate(&params)?;
        let hello = ClientHello {
            p: params.p(),
            g: params.g(),
            client_public: keypair.public(),
        };
        debug!(%params, a_pub = hello.client_public, "client handshake started");
        Ok((Self { params, keypair }, hello))
    }

    pub fn params(&self) -> &DhParams {
        &self.params
    }

    /// Complete the handshake with the server's reply.
    pub fn finish(self, reply: &ServerHello) -> Result<KeyDerivation, KeyAgreementError> {
        self.params.check_public(reply.server_public)?;
        let shared = self.keypair.agree(reply.server_public, &self.params);
        let keys = derive_keys(&shared);
        Ok(KeyDerivation {
            role: Role::Client,
            connection_id: None,
            params: self.params,
            client_public: self.keypair.public(),
            server_public: reply.server_public,
            shared,
            keys,
        })
    }
}

/// Answer a client hello: validate it, generate our key pair and derive keys.
pub fn respond(hello: &ClientHello) -> Result<(ServerHello, KeyDerivation), KeyAgreementError> {
    let params = DhParams::new(hello.p, hello.g)?;
    params.check_public(hello.client_public)?;

    let keypair = KeyPair::generate(&params)?;
    let shared = keypair.agree(hello.client_public, &params);
    let keys = derive_keys(&shared);
    let reply = ServerHello {
        server_public: keypair.public(),
    };

    debug!(%params, a_pub = hello.client_public, b_pub = reply.server_public, "server handshake answered");
    Ok((
        reply,
        KeyDerivation {
            role: Role::Server,
            connection_id: None,
            params,
            client_public: hello.client_public,
            server_public: reply.server_public,
            shared,
            keys,
        },
    ))
}
