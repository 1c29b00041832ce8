//! LAN chat relay: a TCP server that fans text and images out to every
//! named client, plus the client half of its protocol.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`wire`] is the newline-delimited JSON codec for the two value kinds
//!   (text and binary) and the client-side event decoder.
//! - [`message`] maps join/leave/text/image events onto wire values.
//! - [`registry`] holds the write halves of named peers behind one lock.
//! - [`relay`] broadcasts a message to every registered peer, isolating
//!   per-peer failures.
//! - [`session`] runs the name handshake and message loop for one client.
//! - [`server`] accepts TCP connections and spawns a session task for each.
//! - [`client`] exposes an outbound API plus an inbound event stream, and a
//!   terminal front end.
//! - [`cli`] and [`config`] parse the command line into runtime settings.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod wire;

pub use error::RelayError;
