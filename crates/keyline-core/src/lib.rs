//! Core Keyline protocol types, framing, and constants.
//!
//! This crate provides:
//! - Wire message types for the handshake and the secure channel
//! - Length-prefixed JSON framing over any async byte stream
//!
//! # Wire Format
//!
//! ```text
//! +-------------------+---------------------------+
//! | Length (u32, BE)  | UTF-8 JSON payload        |
//! | 4 bytes           | Length bytes              |
//! +-------------------+---------------------------+
//! ```

#![forbid(unsafe_code)]

pub mod frame;
pub mod message;

pub use frame::{decode_frame, encode_frame, read_frame, write_frame, FrameError};
pub use message::{ClientHello, SecureFrame, SecurePayload, ServerHello, WireMessage};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload length accepted from a peer (10 MB).
/// Prevents unbounded allocation from a corrupt or malicious length prefix.
pub const MAX_FRAME_LEN: u32 = 10_000_000;
