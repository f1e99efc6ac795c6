//! Cryptographic primitives for Keyline.
//!
//! This crate provides:
//! - Finite-field Diffie-Hellman over demo-scale primes
//! - SHA-256 derivation of independent encryption and MAC keys
//! - A sealed channel: repeating-key XOR stream plus optional HMAC-SHA256
//! - The per-connection session state machine
//! - Initiator/responder handshake helpers and a key log sink
//!
//! # Design
//!
//! The primitives are intentionally weak and exist for studying the
//! protocol on the wire: the modulus is four decimal digits and the
//! keystream is the 32-byte key repeated. Peer identity is never
//! authenticated.
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |--- CLIENT_HELLO {p, g, A} ------------>|
//!   |<-- SERVER_HELLO {B} -------------------|
//!   |                                        |
//!   |  [Both derive enc_key, mac_key]        |
//!   |                                        |
//!   |--- SECURE {ciphertext, mac?} --------->|
//! ```

#![forbid(unsafe_code)]

pub mod channel;
pub mod dh;
pub mod handshake;
pub mod kdf;
pub mod keylog;
pub mod session;

pub use channel::{xor_stream, ChannelError, SecureChannel};
pub use dh::{DhParams, KeyAgreementError, KeyPair, PrivateExponent, SharedSecret};
pub use handshake::{respond, ClientHandshake, KeyDerivation, Role};
pub use kdf::{derive_keys, DerivedKeys, KEY_SIZE};
pub use keylog::{format_entry, KeyLog};
pub use session::{
    Admission, Session, SessionError, SessionEvent, SessionFrameError, SessionState,
    SessionTransition, TerminateOutcome,
};
