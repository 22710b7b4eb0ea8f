//! Errors surfaced by the engine.

use std::io;

use thiserror::Error;

/// An error occurring in the network I/O and session engine.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A length prefix fell outside `[0, MAX_FRAME_LEN]`.
    #[error("protocol violation: frame length {0} out of bounds")]
    FrameTooLarge(u32),

    /// A datagram exceeded the relay's accepted size.
    #[error("datagram of {0} bytes exceeds the {1}-byte relay limit")]
    DatagramTooLarge(usize, usize),

    /// A channel send or receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
