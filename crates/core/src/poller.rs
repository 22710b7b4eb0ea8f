//! Thin wrapper over `popol`, the readiness primitive the engine is built on.
//!
//! Grounded in the teacher's `net::reactor`/`net::mod` (`popol::Sources`,
//! `popol::Waker`, the `Source<Id>` token enum), generalized from a
//! single peer-connection token to the handful of source kinds EchoMesh's
//! reactors register (listener, stream connections, the datagram socket,
//! the wakeup fd).

use std::io;
use std::time::Duration;

use crate::ids::ConnId;

/// Identifies what a readiness event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// The stream acceptor's listening socket.
    Listener,
    /// A stream connection, by its reactor-local id.
    Connection(ConnId),
    /// The datagram relay's UDP socket.
    Datagram,
    /// The reactor's own wakeup fd.
    Wakeup,
}

pub use popol::interest;
pub type Event = popol::Event<Token>;

/// Wraps `popol::Sources<Token>` and the reactor's wakeup source.
pub struct Poller {
    sources: popol::Sources<Token>,
    events: Vec<Event>,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            sources: popol::Sources::new(),
            events: Vec::with_capacity(32),
        }
    }

    pub fn register(&mut self, token: Token, fd: &impl std::os::unix::io::AsRawFd, interest: popol::Interest) {
        self.sources.register(token, fd, interest);
    }

    pub fn unregister(&mut self, token: &Token) {
        self.sources.unregister(token);
    }

    pub fn set_interest(&mut self, token: &Token, interest: popol::Interest) {
        if let Some(source) = self.sources.get_mut(token) {
            source.set(interest);
        }
    }

    pub fn unset_interest(&mut self, token: &Token, interest: popol::Interest) {
        if let Some(source) = self.sources.get_mut(token) {
            source.unset(interest);
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.len() == 0
    }

    /// Poll for readiness, doubling the event buffer's capacity whenever a
    /// poll fills it. Returns an empty slice on timeout or signal
    /// interruption; other errors are returned to the caller to log.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<&mut Vec<Event>> {
        if self.events.len() == self.events.capacity() {
            self.events.reserve(self.events.capacity().max(32));
        }
        match self.sources.wait_timeout(&mut self.events, timeout) {
            Ok(_) => {}
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                self.events.clear();
            }
            Err(err) => return Err(err),
        }
        Ok(&mut self.events)
    }

    pub fn make_waker(&mut self) -> io::Result<popol::Waker> {
        popol::Waker::new(&mut self.sources, Token::Wakeup)
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}
