//! Identifiers shared across the registries and the wire schema.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A logged-in user's identifier. `0` is reserved for "unknown"/"not logged in".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UserId(pub u64);

impl UserId {
    /// The reserved "unknown" id, returned by `UserRegistry::user_of` when a
    /// connection has no logged-in user.
    pub const UNKNOWN: UserId = UserId(0);

    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonically increasing source of fresh [`UserId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct UserIdAllocator(AtomicU64);

impl UserIdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> UserId {
        UserId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// A room name, as chosen by clients. Rooms are auto-created on first join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a single stream connection within its owning reactor's
/// connection table. Distinct from [`UserId`]: a connection may exist before
/// login (no user yet) and survive a logout (until the socket itself closes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
