//! Per-fd binding of requested interest to a reactor.
//!
//! The original design (and the spec) gives `Channel` three boxed callbacks
//! (read/write/error) set by whoever owns the fd. In the teacher's async
//! reactor the equivalent role is played by `Source<Id>` plus the
//! `handle_peer_source_event`/`handle_writable`/`handle_readable` dispatch
//! order in `net::reactor::Reactor::handle_new_source`. Boxing closures here
//! would force every `Connection` into a self-referential `Rc<RefCell<_>>`
//! callback (the channel, owned by the connection, would need a callback
//! that mutates the very connection that owns it) for no benefit over a
//! direct method call, so `Channel` only tracks interest and the reactor
//! routes each `Event` to the owning component's `handle_read`/
//! `handle_write`/`handle_error` methods in the order below.

use crate::poller::{interest, Event, Poller, Token};

/// What a readiness event requires of its owner, in dispatch order.
/// A single event may carry more than one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Error,
    Read,
    Write,
}

/// Classify an event into the callback-invocation order spec.md §4.2
/// mandates: hangup-without-read -> error, error -> error, readable
/// (including peer-closed) -> read, writable -> write.
pub fn dispatch_order(event: &Event) -> Vec<Readiness> {
    let mut order = Vec::with_capacity(2);

    let hangup_without_read = event.is_hangup() && !event.is_readable();
    if hangup_without_read || event.is_error() || event.is_invalid() {
        order.push(Readiness::Error);
    }
    if event.is_readable() || event.is_hangup() {
        order.push(Readiness::Read);
    }
    if event.is_writable() {
        order.push(Readiness::Write);
    }
    order
}

/// Tracks one fd's registration with a [`Poller`] and whether write
/// readiness is currently requested.
pub struct Channel {
    token: Token,
    writing: bool,
}

impl Channel {
    /// Register `fd` with `poller` under `token`, with read interest only.
    pub fn register(poller: &mut Poller, token: Token, fd: &impl std::os::unix::io::AsRawFd) -> Self {
        poller.register(token, fd, interest::READ);
        Self {
            token,
            writing: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn enable_writing(&mut self, poller: &mut Poller) {
        if !self.writing {
            poller.set_interest(&self.token, interest::WRITE);
            self.writing = true;
        }
    }

    pub fn disable_writing(&mut self, poller: &mut Poller) {
        if self.writing {
            poller.unset_interest(&self.token, interest::WRITE);
            self.writing = false;
        }
    }

    /// Remove this fd from the poller. Must be called before the fd itself
    /// is closed.
    pub fn remove(&mut self, poller: &mut Poller) {
        poller.unregister(&self.token);
    }
}
