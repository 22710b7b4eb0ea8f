//! Network I/O and session engine for the EchoMesh voice/chat relay.
//!
//! This crate is the reactor, framing, and registry layer described by the
//! engine's design: business handlers, audio codecs, and persistent
//! identity storage live above it, in `echomesh-server`.

pub mod acceptor;
pub mod buffer;
pub mod channel;
pub mod connection;
pub mod datagram;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod poller;
pub mod reactor;
pub mod reactor_pool;
pub mod registry;
pub mod server;
pub mod voice;
pub mod wire;

pub use error::{Error, Result};
pub use server::{ConnectionCallback, StreamServer, StreamServerConfig};
