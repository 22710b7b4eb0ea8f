//! Rooms: membership and each member's last-known voice (UDP) address.
//!
//! Grounded in the original `RoomManager`/`Room` pair. Rooms are
//! auto-created on first join; per the Open Question resolution recorded
//! in `SPEC_FULL.md` (an unbounded leak of empty `Room`s would contradict
//! the "no durability" framing of the engine), a room is destroyed the
//! moment its last member leaves rather than kept around indefinitely.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::ids::{RoomId, UserId};

#[derive(Default)]
struct Room {
    members: HashSet<UserId>,
    udp_addrs: HashMap<UserId, SocketAddr>,
}

/// The room directory. One lock over the whole map: rooms are expected to
/// be numerous and short-lived rather than individually hot, so per-room
/// locks would add complexity without a measured benefit.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` to `room_id`, creating the room if it doesn't exist yet.
    pub fn join(&self, room_id: &RoomId, user: UserId) {
        self.rooms
            .lock()
            .unwrap()
            .entry(room_id.clone())
            .or_default()
            .members
            .insert(user);
    }

    /// Remove `user` from `room_id`. Returns `true` if the room was deleted
    /// because it became empty.
    pub fn leave(&self, room_id: &RoomId, user: UserId) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        room.members.remove(&user);
        room.udp_addrs.remove(&user);
        if room.members.is_empty() {
            rooms.remove(room_id);
            true
        } else {
            false
        }
    }

    pub fn members(&self, room_id: &RoomId) -> Vec<UserId> {
        self.rooms
            .lock()
            .unwrap()
            .get(room_id)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room_id: &RoomId, user: UserId) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(room_id)
            .map(|room| room.members.contains(&user))
            .unwrap_or(false)
    }

    /// Record the address `user`'s most recent voice datagram arrived from.
    pub fn update_addr(&self, room_id: &RoomId, user: UserId, addr: SocketAddr) {
        if let Some(room) = self.rooms.lock().unwrap().get_mut(room_id) {
            room.udp_addrs.insert(user, addr);
        }
    }

    pub fn addr_of(&self, room_id: &RoomId, user: UserId) -> Option<SocketAddr> {
        self.rooms
            .lock()
            .unwrap()
            .get(room_id)
            .and_then(|room| room.udp_addrs.get(&user).copied())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_is_created_on_join_and_deleted_on_last_leave() {
        let rooms = RoomRegistry::new();
        let room_id = RoomId::from("lobby");
        rooms.join(&room_id, UserId(1));
        rooms.join(&room_id, UserId(2));
        assert_eq!(rooms.room_count(), 1);

        assert!(!rooms.leave(&room_id, UserId(1)));
        assert_eq!(rooms.room_count(), 1);
        assert!(rooms.leave(&room_id, UserId(2)));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn voice_address_is_scoped_to_room_and_user() {
        let rooms = RoomRegistry::new();
        let room_id = RoomId::from("lobby");
        rooms.join(&room_id, UserId(1));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        rooms.update_addr(&room_id, UserId(1), addr);
        assert_eq!(rooms.addr_of(&room_id, UserId(1)), Some(addr));
        assert_eq!(rooms.addr_of(&room_id, UserId(2)), None);
    }

    #[test]
    fn leaving_an_unknown_room_is_a_no_op() {
        let rooms = RoomRegistry::new();
        assert!(!rooms.leave(&RoomId::from("ghost"), UserId(1)));
    }
}
