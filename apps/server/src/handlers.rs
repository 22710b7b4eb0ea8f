//! The application's business handlers: login, room join/leave, chat
//! broadcast.
//!
//! Grounded in `original_source/src/BusinessLogic.cpp`; spec.md explicitly
//! places handlers like these outside the engine's core (`echomesh-core`),
//! so they live here, registered into the engine's `Dispatcher` at startup.
//! Locking discipline matters here: every handler below reads the user
//! registry before it reads the room registry, never the other way
//! around, matching `SPEC_FULL.md`'s documented lock order.

use std::sync::Arc;

use echomesh_core::connection::ConnectionHandle;
use echomesh_core::dispatcher::Dispatcher;
use echomesh_core::ids::RoomId;
use echomesh_core::registry::{RoomRegistry, UserRegistry};
use echomesh_core::wire::{self, EchoMsg, MsgType, StatusCode};
use tracing::info;

pub fn register_all(dispatcher: &Arc<Dispatcher>, users: &Arc<UserRegistry>, rooms: &Arc<RoomRegistry>) {
    {
        let users = users.clone();
        dispatcher.register(
            MsgType::Login,
            Arc::new(move |conn, msg| handle_login(&users, conn, msg)),
        );
    }
    {
        let users = users.clone();
        let rooms = rooms.clone();
        dispatcher.register(
            MsgType::JoinRoom,
            Arc::new(move |conn, msg| handle_join_room(&users, &rooms, conn, msg)),
        );
    }
    {
        let users = users.clone();
        let rooms = rooms.clone();
        dispatcher.register(
            MsgType::LeaveRoom,
            Arc::new(move |conn, msg| handle_leave_room(&users, &rooms, conn, msg)),
        );
    }
    {
        let users = users.clone();
        let rooms = rooms.clone();
        dispatcher.register(
            MsgType::Chat,
            Arc::new(move |conn, msg| handle_chat(&users, &rooms, conn, msg)),
        );
    }
}

fn reply(conn: &ConnectionHandle, msg: EchoMsg) {
    match wire::encode(&msg) {
        Ok(bytes) => conn.send(bytes),
        Err(err) => tracing::error!("failed to encode reply: {}", err),
    }
}

fn handle_login(users: &UserRegistry, conn: &ConnectionHandle, msg: EchoMsg) {
    let EchoMsg::Login { username } = msg else {
        return;
    };
    match users.login(conn, username.clone()) {
        Some(user_id) => {
            info!(%user_id, %username, "user logged in");
            reply(
                conn,
                EchoMsg::LoginAck {
                    status: StatusCode::Ok,
                    user_id: user_id.0,
                },
            );
        }
        None => {
            reply(
                conn,
                EchoMsg::LoginAck {
                    status: StatusCode::AlreadyLoggedIn,
                    user_id: 0,
                },
            );
        }
    }
}

fn handle_join_room(users: &UserRegistry, rooms: &RoomRegistry, conn: &ConnectionHandle, msg: EchoMsg) {
    let EchoMsg::JoinRoom { room } = msg else {
        return;
    };
    let user_id = users.user_of(conn.id());
    if user_id.is_unknown() {
        reply(
            conn,
            EchoMsg::RoomAck {
                status: StatusCode::NotLoggedIn,
                room,
            },
        );
        return;
    }

    if let Some(previous) = users.room_of(user_id) {
        if previous.0 == room {
            reply(
                conn,
                EchoMsg::RoomAck {
                    status: StatusCode::AlreadyInRoom,
                    room,
                },
            );
            return;
        }
        rooms.leave(&previous, user_id);
    }

    let room_id = RoomId::from(room.as_str());
    rooms.join(&room_id, user_id);
    users.set_room(user_id, room_id);
    info!(%user_id, %room, "user joined room");
    reply(
        conn,
        EchoMsg::RoomAck {
            status: StatusCode::Ok,
            room,
        },
    );
}

fn handle_leave_room(users: &UserRegistry, rooms: &RoomRegistry, conn: &ConnectionHandle, msg: EchoMsg) {
    let EchoMsg::LeaveRoom { room } = msg else {
        return;
    };
    let user_id = users.user_of(conn.id());
    if user_id.is_unknown() {
        reply(
            conn,
            EchoMsg::RoomAck {
                status: StatusCode::NotLoggedIn,
                room,
            },
        );
        return;
    }

    let room_id = RoomId::from(room.as_str());
    if !rooms.contains(&room_id, user_id) {
        reply(
            conn,
            EchoMsg::RoomAck {
                status: StatusCode::NotInRoom,
                room,
            },
        );
        return;
    }

    rooms.leave(&room_id, user_id);
    users.clear_room(user_id);
    info!(%user_id, %room, "user left room");
    reply(
        conn,
        EchoMsg::RoomAck {
            status: StatusCode::Ok,
            room,
        },
    );
}

fn handle_chat(users: &UserRegistry, rooms: &RoomRegistry, conn: &ConnectionHandle, msg: EchoMsg) {
    let EchoMsg::Chat { room, text } = msg else {
        return;
    };
    let user_id = users.user_of(conn.id());
    if user_id.is_unknown() {
        return;
    }

    let room_id = RoomId::from(room.as_str());
    if !rooms.contains(&room_id, user_id) {
        return;
    }

    let relay = EchoMsg::ChatRelay {
        room: room.clone(),
        from_user: user_id.0,
        from_name: users.name_of(user_id).unwrap_or_default(),
        text,
    };
    let Ok(bytes) = wire::encode(&relay) else {
        return;
    };

    for member in rooms.members(&room_id) {
        if member == user_id {
            continue;
        }
        if let Some(handle) = users.connection_of(member) {
            handle.send(bytes.clone());
        }
    }
}
