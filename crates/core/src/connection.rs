//! A single framed stream connection: owned socket, input/output buffers,
//! and the length-prefix framing contract.
//!
//! Grounded in the original `TcpConnection`/`Buffer` pair and the teacher's
//! non-blocking dial/accept plumbing in `net::reactor`. Callback dispatch
//! (what happens when a frame completes, or a connection closes) is *not*
//! owned by `Connection` itself — see `channel.rs`'s module doc for why —
//! it lives in the worker reactor state in `server.rs`, which is the only
//! thing that can see both a connection and the registries it feeds.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::ids::ConnId;
use crate::poller::{Poller, Token};

/// Frames are length-prefixed with a big-endian `u32` bounded to this many
/// bytes, matching the wire contract in `wire.rs`.
pub const MAX_FRAME_LEN: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connected,
    Disconnecting,
    Disconnected,
}

/// What a successful read produced.
pub enum ReadOutcome {
    /// Zero or more complete frames were parsed out of the input buffer.
    Frames(Vec<Vec<u8>>),
    /// The peer closed its write half (a zero-length read).
    Closed,
}

pub struct Connection {
    id: ConnId,
    socket: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    channel: Channel,
    input: Buffer,
    output: Buffer,
    state: ConnState,
}

impl Connection {
    pub fn new(id: ConnId, socket: TcpStream, poller: &mut Poller) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;
        let channel = Channel::register(poller, Token::Connection(id), &socket);
        Ok(Self {
            id,
            socket,
            local_addr,
            peer_addr,
            channel,
            input: Buffer::new(),
            output: Buffer::new(),
            state: ConnState::Connected,
        })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// Send one frame. Drops silently once the connection is disconnecting
    /// or closed, mirroring the original's "sends after shutdown are
    /// no-ops" behavior rather than surfacing a late error to the caller.
    pub fn send(&mut self, payload: &[u8], poller: &mut Poller) -> Result<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(payload.len() as u32));
        }
        if self.state != ConnState::Connected {
            return Ok(());
        }

        if self.output.is_empty() && !self.channel.is_writing() {
            self.output.append(payload);
            self.output.prepend(&(payload.len() as u32).to_be_bytes());

            match self.socket.write(self.output.peek()) {
                Ok(n) => self.output.retrieve(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            let mut framed = Vec::with_capacity(4 + payload.len());
            framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            framed.extend_from_slice(payload);
            self.output.append(&framed);
        }

        if !self.output.is_empty() {
            self.channel.enable_writing(poller);
        }
        Ok(())
    }

    /// Half-close the write side once pending output drains. Idempotent.
    pub fn shutdown(&mut self, poller: &mut Poller) {
        if self.state != ConnState::Connected {
            return;
        }
        self.state = ConnState::Disconnecting;
        if !self.channel.is_writing() {
            let _ = self.socket.shutdown(Shutdown::Write);
        }
        let _ = poller;
    }

    pub fn handle_read(&mut self) -> Result<ReadOutcome> {
        let n = self.input.read_fd(&mut (&self.socket))?;
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }

        let mut frames = Vec::new();
        loop {
            if self.input.readable_bytes() < 4 {
                break;
            }
            let len = self.input.peek_u32_be();
            if len as usize > MAX_FRAME_LEN {
                return Err(Error::FrameTooLarge(len));
            }
            if self.input.readable_bytes() < 4 + len as usize {
                break;
            }
            self.input.retrieve(4);
            frames.push(self.input.retrieve_as_vec(len as usize));
        }
        Ok(ReadOutcome::Frames(frames))
    }

    pub fn handle_write(&mut self, poller: &mut Poller) -> io::Result<()> {
        if !self.channel.is_writing() {
            return Ok(());
        }
        match self.socket.write(self.output.peek()) {
            Ok(n) => self.output.retrieve(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        }
        if self.output.is_empty() {
            self.channel.disable_writing(poller);
            if self.state == ConnState::Disconnecting {
                let _ = self.socket.shutdown(Shutdown::Write);
            }
        }
        Ok(())
    }

    /// Unregister from the poller and mark fully closed. The socket itself
    /// is closed by `Drop` once the owning table removes this connection.
    pub fn close(&mut self, poller: &mut Poller) {
        self.channel.remove(poller);
        self.state = ConnState::Disconnected;
    }
}

/// The side of a connection registries and business handlers get to see:
/// enough to push a frame or ask for a half-close, from any thread, without
/// reaching into the worker reactor that actually owns the socket.
///
/// A trait object rather than a concrete `ReactorHandle<WorkerState>` so
/// that `registry`/`dispatcher` don't need to depend on `server`'s worker
/// state type -- only `server.rs` implements this.
pub trait ConnectionSink: Send + Sync {
    fn id(&self) -> ConnId;
    fn peer_addr(&self) -> SocketAddr;
    fn send(&self, payload: Vec<u8>);
    fn shutdown(&self);
}

#[derive(Clone)]
pub struct ConnectionHandle(Arc<dyn ConnectionSink>);

impl ConnectionHandle {
    pub fn new(sink: Arc<dyn ConnectionSink>) -> Self {
        Self(sink)
    }

    pub fn id(&self) -> ConnId {
        self.0.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.0.peer_addr()
    }

    pub fn send(&self, payload: Vec<u8>) {
        self.0.send(payload)
    }

    pub fn shutdown(&self) {
        self.0.shutdown()
    }
}
