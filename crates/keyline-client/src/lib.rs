//! Keyline client: connects, runs the initiator handshake and exchanges
//! sealed messages with a Keyline server.

#![forbid(unsafe_code)]

pub mod client;
pub mod console;

pub use client::{Client, ClientConfig, ClientEvent};
