//! Who's online, which connection they're on, and which room they're in.
//!
//! Grounded in the original `UserManager`'s three parallel maps
//! (`online_`, `conn2user_`, `user2room_`), behind one lock rather than
//! three so a login/logout can't observe them out of sync.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::connection::ConnectionHandle;
use crate::ids::{ConnId, RoomId, UserId, UserIdAllocator};

#[derive(Default)]
struct Inner {
    online: HashMap<UserId, ConnectionHandle>,
    by_conn: HashMap<ConnId, UserId>,
    user_room: HashMap<UserId, RoomId>,
    names: HashMap<UserId, String>,
}

/// The online-user directory. Shared across every worker reactor; locked
/// only for the duration of one map operation, never across a send.
pub struct UserRegistry {
    inner: Mutex<Inner>,
    ids: UserIdAllocator,
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ids: UserIdAllocator::new(),
        }
    }

    /// Register a newly authenticated user on `conn`, allocating a fresh id.
    ///
    /// Returns `None` if `conn` already has a user logged in: a second
    /// `login` on the same connection without an intervening logout must
    /// not be allowed to silently overwrite `by_conn`, or `online`/`by_conn`
    /// stop being exact inverses (the old entry would keep pointing at a
    /// connection that no longer points back at it). The caller should reply
    /// with `StatusCode::AlreadyLoggedIn` in that case.
    pub fn login(&self, conn: &ConnectionHandle, name: impl Into<String>) -> Option<UserId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_conn.contains_key(&conn.id()) {
            return None;
        }
        let user_id = self.ids.next();
        inner.online.insert(user_id, conn.clone());
        inner.by_conn.insert(conn.id(), user_id);
        inner.names.insert(user_id, name.into());
        Some(user_id)
    }

    /// Remove a connection's user (if it had logged in), returning the id
    /// and whatever room it was last known to be in so the caller can tell
    /// the room registry to drop that membership too.
    pub fn logout_conn(&self, conn_id: ConnId) -> Option<(UserId, Option<RoomId>)> {
        let mut inner = self.inner.lock().unwrap();
        let user_id = inner.by_conn.remove(&conn_id)?;
        inner.online.remove(&user_id);
        inner.names.remove(&user_id);
        let room = inner.user_room.remove(&user_id);
        Some((user_id, room))
    }

    pub fn name_of(&self, user_id: UserId) -> Option<String> {
        self.inner.lock().unwrap().names.get(&user_id).cloned()
    }

    pub fn connection_of(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.inner.lock().unwrap().online.get(&user_id).cloned()
    }

    /// The user logged in on `conn_id`, or [`UserId::UNKNOWN`] if none.
    pub fn user_of(&self, conn_id: ConnId) -> UserId {
        self.inner
            .lock()
            .unwrap()
            .by_conn
            .get(&conn_id)
            .copied()
            .unwrap_or(UserId::UNKNOWN)
    }

    pub fn room_of(&self, user_id: UserId) -> Option<RoomId> {
        self.inner.lock().unwrap().user_room.get(&user_id).cloned()
    }

    pub fn set_room(&self, user_id: UserId, room_id: RoomId) {
        self.inner.lock().unwrap().user_room.insert(user_id, room_id);
    }

    pub fn clear_room(&self, user_id: UserId) -> Option<RoomId> {
        self.inner.lock().unwrap().user_room.remove(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().unwrap().online.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::connection::ConnectionSink;

    struct FakeSink {
        id: ConnId,
        shut: AtomicBool,
    }

    impl ConnectionSink for FakeSink {
        fn id(&self) -> ConnId {
            self.id
        }
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:9".parse().unwrap()
        }
        fn send(&self, _payload: Vec<u8>) {}
        fn shutdown(&self) {
            self.shut.store(true, Ordering::SeqCst);
        }
    }

    fn fake_conn(id: u64) -> ConnectionHandle {
        ConnectionHandle::new(Arc::new(FakeSink {
            id: ConnId(id),
            shut: AtomicBool::new(false),
        }))
    }

    #[test]
    fn login_then_logout_clears_every_map() {
        let registry = UserRegistry::new();
        let conn = fake_conn(1);
        let user = registry.login(&conn, "alice").expect("first login should succeed");
        assert!(!user.is_unknown());
        assert_eq!(registry.user_of(ConnId(1)), user);
        assert_eq!(registry.name_of(user), Some("alice".to_string()));

        registry.set_room(user, RoomId::from("lobby"));
        let (logged_out, room) = registry.logout_conn(ConnId(1)).unwrap();
        assert_eq!(logged_out, user);
        assert_eq!(room, Some(RoomId::from("lobby")));
        assert_eq!(registry.user_of(ConnId(1)), UserId::UNKNOWN);
        assert!(registry.connection_of(user).is_none());
    }

    #[test]
    fn relogin_on_the_same_connection_without_logout_is_rejected() {
        let registry = UserRegistry::new();
        let conn = fake_conn(1);
        let first = registry.login(&conn, "alice").expect("first login should succeed");

        assert!(registry.login(&conn, "alice-again").is_none());

        // byConn/online must still be exact inverses: the first login's
        // entries are untouched by the rejected second attempt.
        assert_eq!(registry.user_of(ConnId(1)), first);
        assert!(registry.connection_of(first).is_some());
        assert_eq!(registry.name_of(first), Some("alice".to_string()));
    }

    #[test]
    fn unknown_connection_reports_unknown_user() {
        let registry = UserRegistry::new();
        assert_eq!(registry.user_of(ConnId(42)), UserId::UNKNOWN);
    }
}
