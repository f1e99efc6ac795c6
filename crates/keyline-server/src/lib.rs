//! Keyline server.
//!
//! Accepts TCP clients up to a fixed capacity, runs the responder side of
//! the handshake for each, and exposes an [`Admin`] handle for listing,
//! ending and kicking sessions.

#![forbid(unsafe_code)]

pub mod admin;
pub mod console;
pub mod registry;
pub mod server;

pub use admin::{Admin, ConnectionSummary};
pub use registry::{Connection, Registry, LOCK_WAIT};
pub use server::{Server, ServerConfig};
