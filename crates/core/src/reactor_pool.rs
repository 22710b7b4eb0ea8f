//! A fixed set of eagerly started worker reactors, handed out round-robin.
//!
//! Grounded in the original `EventLoopThreadPool`: every worker starts at
//! construction time rather than lazily, and a pool configured with zero
//! workers degenerates to handing every connection to the reactor that
//! owns the pool itself (the original's "baseLoop if numThreads is zero").

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crate::reactor::{Reactor, ReactorHandle, ReactorState};

pub struct ReactorPool<S: ReactorState> {
    handles: Vec<ReactorHandle<S>>,
    joins: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl<S: ReactorState> ReactorPool<S> {
    /// Start `count` reactors named `"{name_prefix}-{i}"`, building each
    /// one's state with `build` (the same constructor signature
    /// [`Reactor::new`] takes).
    pub fn start(
        count: usize,
        name_prefix: &str,
        mut build: impl FnMut(&mut crate::poller::Poller, ReactorHandle<S>) -> io::Result<S>,
    ) -> io::Result<Self> {
        let mut handles = Vec::with_capacity(count);
        let mut joins = Vec::with_capacity(count);
        for i in 0..count {
            let (reactor, _handle) = Reactor::new(|poller, handle| build(poller, handle))?;
            let (join, handle) = reactor.spawn(format!("{name_prefix}-{i}"));
            handles.push(handle);
            joins.push(join);
        }
        Ok(Self {
            handles,
            joins,
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The next worker in round-robin order, or `None` if the pool has no
    /// workers (degenerate single-reactor mode; the caller should fall back
    /// to handling the work on its own reactor).
    pub fn next_handle(&self) -> Option<ReactorHandle<S>> {
        if self.handles.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        Some(self.handles[i].clone())
    }

    pub fn quit_all(&self) {
        for handle in &self.handles {
            handle.quit();
        }
    }

    pub fn join_all(self) {
        for join in self.joins {
            let _ = join.join();
        }
    }
}
