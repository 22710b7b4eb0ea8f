//! The UDP voice relay: one socket, no framing, no retransmission.
//!
//! Grounded in `original_source/src/UdpServer.cpp`: a packet's sender is
//! identified by the `userId` carried in its own header rather than by
//! socket peer identity (there is none, UDP has no connection), the room
//! is found through the same `UserRegistry` the stream side populates, and
//! forwarding is best-effort -- a member with no recent address, or a full
//! send buffer, just doesn't get this packet. Per spec.md §6's explicit
//! non-goal, there is no retry and no congestion control beyond what the OS
//! socket gives for free.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::channel::Channel;
use crate::ids::UserId;
use crate::poller::{Poller, Token};
use crate::registry::{RoomRegistry, UserRegistry};
use crate::voice::{VoicePacket, MAX_DATAGRAM_LEN};

pub struct DatagramRelay {
    socket: UdpSocket,
    channel: Channel,
    users: Arc<UserRegistry>,
    rooms: Arc<RoomRegistry>,
    scratch: [u8; MAX_DATAGRAM_LEN],
}

impl DatagramRelay {
    pub fn bind(
        addr: SocketAddr,
        poller: &mut Poller,
        users: Arc<UserRegistry>,
        rooms: Arc<RoomRegistry>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let channel = Channel::register(poller, Token::Datagram, &socket);
        Ok(Self {
            socket,
            channel,
            users,
            rooms,
            scratch: [0u8; MAX_DATAGRAM_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn token(&self) -> Token {
        self.channel.token()
    }

    /// Drain every pending datagram, relaying each to the sender's
    /// roommates.
    pub fn handle_read(&mut self) {
        loop {
            match self.socket.recv_from(&mut self.scratch) {
                Ok((n, from)) => self.relay(n, from),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(target: "datagram", "recv_from failed: {}", err);
                    break;
                }
            }
        }
    }

    fn relay(&mut self, n: usize, from: SocketAddr) {
        let packet = match VoicePacket::parse(&self.scratch[..n]) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(target: "datagram", "dropping malformed datagram from {}: {}", from, err);
                return;
            }
        };

        let sender = UserId(packet.user_id as u64);
        let Some(room_id) = self.users.room_of(sender) else {
            trace!(target: "datagram", user_id = %sender, "dropping voice packet from a user not in a room");
            return;
        };

        self.rooms.update_addr(&room_id, sender, from);

        let framed = packet.encode();
        for member in self.rooms.members(&room_id) {
            if member == sender {
                continue;
            }
            if let Some(addr) = self.rooms.addr_of(&room_id, member) {
                // Best-effort: a would-block or any other send error just
                // drops this member's copy of the packet.
                let _ = self.socket.send_to(&framed, addr);
            }
        }
    }
}
