//! End-to-end loopback tests exercising a real `StreamServer` +
//! `ReactorPool` + `DatagramRelay` bound to `127.0.0.1:0`.
//!
//! These cover the scenarios from `SPEC_FULL.md` §8 (S1-S3, S5, S6) that a
//! unit test within a single module can't reach: they need an acceptor
//! thread, worker reactor threads, and a datagram relay thread all actually
//! running and talking to real sockets.
//!
//! The login/room/chat handlers registered here are test-local
//! stand-ins for `echomesh-server`'s `handlers.rs` (which this crate
//! cannot depend on), wired directly onto `echomesh_core::Dispatcher` and
//! the two registries.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use echomesh_core::connection::ConnectionHandle;
use echomesh_core::ids::RoomId;
use echomesh_core::wire::{self, EchoMsg, MsgType, StatusCode};
use echomesh_core::{StreamServer, StreamServerConfig};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn start_server(workers: usize) -> StreamServer {
    let server = StreamServer::start(StreamServerConfig {
        stream_addr: "127.0.0.1:0".parse().unwrap(),
        datagram_addr: "127.0.0.1:0".parse().unwrap(),
        worker_count: workers,
    })
    .expect("server should bind on an ephemeral port");

    register_test_handlers(&server);
    server
}

/// Minimal login/join/leave/chat handlers, enough to drive S1/S2/S3/S6
/// through the real dispatcher and registries.
fn register_test_handlers(server: &StreamServer) {
    let dispatcher = server.dispatcher.clone();
    let users = server.users.clone();
    let rooms = server.rooms.clone();

    {
        let users = users.clone();
        dispatcher.register(
            MsgType::Login,
            Arc::new(move |conn: &ConnectionHandle, msg: EchoMsg| {
                let EchoMsg::Login { username } = msg else {
                    return;
                };
                let Some(user_id) = users.login(conn, username) else {
                    send(conn, EchoMsg::LoginAck { status: StatusCode::AlreadyLoggedIn, user_id: 0 });
                    return;
                };
                send(conn, EchoMsg::LoginAck { status: StatusCode::Ok, user_id: user_id.0 });
            }),
        );
    }
    {
        let users = users.clone();
        let rooms = rooms.clone();
        dispatcher.register(
            MsgType::JoinRoom,
            Arc::new(move |conn: &ConnectionHandle, msg: EchoMsg| {
                let EchoMsg::JoinRoom { room } = msg else {
                    return;
                };
                let user_id = users.user_of(conn.id());
                let room_id = RoomId::from(room.as_str());
                rooms.join(&room_id, user_id);
                users.set_room(user_id, room_id);
                send(conn, EchoMsg::RoomAck { status: StatusCode::Ok, room });
            }),
        );
    }
    {
        let users = users.clone();
        let rooms = rooms.clone();
        dispatcher.register(
            MsgType::Chat,
            Arc::new(move |conn: &ConnectionHandle, msg: EchoMsg| {
                let EchoMsg::Chat { room, text } = msg else {
                    return;
                };
                let user_id = users.user_of(conn.id());
                let room_id = RoomId::from(room.as_str());
                let relay = EchoMsg::ChatRelay {
                    room: room.clone(),
                    from_user: user_id.0,
                    from_name: String::new(),
                    text,
                };
                let Ok(bytes) = wire::encode(&relay) else { return };
                for member in rooms.members(&room_id) {
                    if member == user_id {
                        continue;
                    }
                    if let Some(handle) = users.connection_of(member) {
                        handle.send(bytes.clone());
                    }
                }
            }),
        );
    }
}

fn send(conn: &ConnectionHandle, msg: EchoMsg) {
    conn.send(wire::encode(&msg).unwrap());
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
    stream.write_all(payload).unwrap();
}

fn write_frame_chunked(stream: &mut TcpStream, payload: &[u8], chunk_sizes: &[usize]) {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);

    let mut offset = 0;
    let mut i = 0;
    while offset < framed.len() {
        let size = chunk_sizes[i % chunk_sizes.len()].max(1);
        let end = (offset + size).min(framed.len());
        stream.write_all(&framed[offset..end]).unwrap();
        stream.flush().unwrap();
        offset = end;
        i += 1;
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Reads exactly one frame, blocking until the length prefix and full
/// payload have arrived. Returns `None` on EOF before any bytes.
fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return None,
        Err(err) => panic!("read_frame length prefix: {err}"),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("read_frame payload");
    Some(payload)
}

fn login(stream: &mut TcpStream, username: &str) -> u64 {
    write_frame(
        stream,
        &wire::encode(&EchoMsg::Login { username: username.to_string() }).unwrap(),
    );
    let reply = read_frame(stream).expect("login ack");
    match wire::decode(&reply).unwrap() {
        EchoMsg::LoginAck { status: StatusCode::Ok, user_id } => user_id,
        other => panic!("expected LoginAck, got {other:?}"),
    }
}

fn join_room(stream: &mut TcpStream, room: &str) {
    write_frame(stream, &wire::encode(&EchoMsg::JoinRoom { room: room.to_string() }).unwrap());
    let reply = read_frame(stream).expect("room ack");
    match wire::decode(&reply).unwrap() {
        EchoMsg::RoomAck { status: StatusCode::Ok, .. } => {}
        other => panic!("expected RoomAck, got {other:?}"),
    }
}

/// S1 - two clients log in, join the same room; a chat from one is
/// delivered to the other and not echoed back to the sender.
#[test]
fn s1_login_and_broadcast_excludes_sender() {
    let server = start_server(2);
    let addr = server.stream_addr();

    let mut a = connect(addr);
    let mut b = connect(addr);

    let user_a = login(&mut a, "a");
    let user_b = login(&mut b, "b");
    assert_ne!(user_a, user_b);

    join_room(&mut a, "r1");
    join_room(&mut b, "r1");

    write_frame(
        &mut a,
        &wire::encode(&EchoMsg::Chat { room: "r1".into(), text: "hi".into() }).unwrap(),
    );

    let relayed = read_frame(&mut b).expect("b should receive the chat relay");
    match wire::decode(&relayed).unwrap() {
        EchoMsg::ChatRelay { room, from_user, text, .. } => {
            assert_eq!(room, "r1");
            assert_eq!(from_user, user_a);
            assert_eq!(text, "hi");
        }
        other => panic!("expected ChatRelay, got {other:?}"),
    }

    a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut probe = [0u8; 1];
    let result = a.read(&mut probe);
    assert!(
        matches!(result, Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock),
        "sender must not receive its own chat message, got {result:?}"
    );

    server.shutdown();
}

/// S2 - three frames concatenated and delivered across arbitrary chunk
/// boundaries decode, in order, to the three original messages.
#[test]
fn s2_framing_survives_arbitrary_chunking() {
    let server = start_server(1);
    let addr = server.stream_addr();

    let mut sender = connect(addr);
    login(&mut sender, "chunky");
    join_room(&mut sender, "r1");

    let mut listener = connect(addr);
    login(&mut listener, "listener");
    join_room(&mut listener, "r1");

    let texts = ["one", "two", "three"];
    let chunk_plans: [&[usize]; 3] = [&[1], &[1, 1, 2], &[3, 7, 1, 50]];
    for (text, chunk_plan) in texts.iter().zip(chunk_plans) {
        let payload = wire::encode(&EchoMsg::Chat { room: "r1".into(), text: text.to_string() }).unwrap();
        write_frame_chunked(&mut sender, &payload, chunk_plan);
    }

    for expected in texts {
        let frame = read_frame(&mut listener).expect("expected a relayed chat frame");
        match wire::decode(&frame).unwrap() {
            EchoMsg::ChatRelay { text, .. } => assert_eq!(text, expected),
            other => panic!("expected ChatRelay, got {other:?}"),
        }
    }

    server.shutdown();
}

/// S3 - an out-of-bounds length prefix is a fatal protocol violation: the
/// offending connection is closed, other connections are unaffected.
#[test]
fn s3_oversized_length_prefix_closes_only_that_connection() {
    let server = start_server(1);
    let addr = server.stream_addr();

    let mut bad = connect(addr);
    bad.write_all(&0xFFFF_FFFFu32.to_be_bytes()).unwrap();

    let mut probe = [0u8; 1];
    bad.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    let n = bad.read(&mut probe).expect("connection should close, not hang");
    assert_eq!(n, 0, "bad connection should observe EOF after the protocol violation");

    // A fresh connection still works normally.
    let mut good = connect(addr);
    let id = login(&mut good, "still-fine");
    assert!(id > 0);

    server.shutdown();
}

/// An empty worker pool (`worker_count: 0`) degenerates to the listener's
/// own reactor handling every connection directly, per SPEC_FULL.md §4.4.
#[test]
fn degenerate_single_reactor_mode_still_relays_chat() {
    let server = start_server(0);
    let addr = server.stream_addr();

    let mut a = connect(addr);
    let user_a = login(&mut a, "solo-a");
    join_room(&mut a, "r1");

    let mut b = connect(addr);
    login(&mut b, "solo-b");
    join_room(&mut b, "r1");

    let payload = wire::encode(&EchoMsg::Chat { room: "r1".into(), text: "hi".into() }).unwrap();
    write_frame(&mut a, &payload);

    let relayed = read_frame(&mut b).expect("b should receive the chat relay");
    match wire::decode(&relayed).unwrap() {
        EchoMsg::ChatRelay { room, from_user, text, .. } => {
            assert_eq!(room, "r1");
            assert_eq!(from_user, user_a);
            assert_eq!(text, "hi");
        }
        other => panic!("expected ChatRelay, got {other:?}"),
    }

    server.shutdown();
}

/// S5 - voice relay learns each sender's datagram address from the packets
/// it observes, and only forwards to members it has already heard from.
#[test]
fn s5_voice_relay_learns_addresses_progressively() {
    let server = start_server(1);
    let addr = server.stream_addr();
    let datagram_addr = server.datagram_addr();

    let mut c1 = connect(addr);
    let mut c2 = connect(addr);
    let mut c3 = connect(addr);
    let u1 = login(&mut c1, "one");
    let u2 = login(&mut c2, "two");
    let u3 = login(&mut c3, "three");
    join_room(&mut c1, "v");
    join_room(&mut c2, "v");
    join_room(&mut c3, "v");

    let sock1 = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sock2 = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sock3 = UdpSocket::bind("127.0.0.1:0").unwrap();
    for s in [&sock1, &sock2, &sock3] {
        s.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    }

    let voice_packet = |seq: u32, user_id: u64| -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + 4);
        bytes.extend_from_slice(&seq.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&(user_id as u32).to_be_bytes());
        bytes.extend_from_slice(b"opus");
        bytes
    };

    // User 1 speaks first: nobody else has been heard from yet, so no
    // forwards should arrive anywhere.
    sock1.send_to(&voice_packet(1, u1), datagram_addr).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let mut buf = [0u8; 64];
    assert!(sock2.recv_from(&mut buf).is_err(), "user 2 should not have received a forward yet");
    assert!(sock3.recv_from(&mut buf).is_err(), "user 3 should not have received a forward yet");

    // User 2 speaks: user 1's address is known, so user 1 gets a copy.
    sock2.send_to(&voice_packet(2, u2), datagram_addr).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let (n, _from) = sock1.recv_from(&mut buf).expect("user 1 should receive user 2's packet");
    assert_eq!(&buf[8..12], &(u2 as u32).to_be_bytes());
    let _ = n;
    assert!(sock3.recv_from(&mut buf).is_err());

    // User 3 speaks: both 1 and 2 are known now.
    sock3.send_to(&voice_packet(3, u3), datagram_addr).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    sock1.recv_from(&mut buf).expect("user 1 should receive user 3's packet");
    sock2.recv_from(&mut buf).expect("user 2 should receive user 3's packet");

    server.shutdown();
}

/// S6 - a large send posted from off-reactor, immediately followed by
/// `shutdown()`, still delivers every byte to the peer before EOF.
#[test]
fn s6_graceful_shutdown_delivers_pending_bytes_before_eof() {
    let server = start_server(1);
    let addr = server.stream_addr();
    let mut conn = connect(addr);
    let user_id = login(&mut conn, "big-sender");

    // Reach into the connection via the registry, the way a handler
    // (rather than the owning worker reactor) would -- both `send` and
    // `shutdown` below are posted from this test thread, not the
    // connection's own reactor thread.
    let handle = server
        .users
        .connection_of(echomesh_core::ids::UserId(user_id))
        .expect("sender should be registered after login");

    let big_payload = vec![b'x'; 60_000];
    handle.send(big_payload.clone());
    handle.shutdown();

    let received = read_frame(&mut conn).expect("peer should receive the full pending payload");
    assert_eq!(received, big_payload, "payload must not be truncated");

    let mut probe = [0u8; 1];
    conn.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    let n = conn.read(&mut probe).expect("peer should observe EOF after the payload");
    assert_eq!(n, 0, "no truncation: EOF should follow the full payload, not precede it");

    server.shutdown();
}
