//! Routes a decoded [`EchoMsg`] to whichever handler registered interest in
//! its [`MsgType`].
//!
//! Grounded in the original `MsgDispatcher`: a map guarded only long enough
//! to clone out the handler reference, so a slow handler never holds up
//! registration of a different message type or a concurrent dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::connection::ConnectionHandle;
use crate::wire::{EchoMsg, MsgType};

pub type Handler = Arc<dyn Fn(&ConnectionHandle, EchoMsg) + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<MsgType, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, msg_type: MsgType, handler: Handler) {
        self.handlers.lock().unwrap().insert(msg_type, handler);
    }

    /// Dispatch `msg` to its registered handler, if any. The lock is held
    /// only to clone the handler reference out; the handler itself runs
    /// without it.
    pub fn dispatch(&self, conn: &ConnectionHandle, msg: EchoMsg) {
        let msg_type = msg.msg_type();
        let handler = self.handlers.lock().unwrap().get(&msg_type).cloned();
        match handler {
            Some(handler) => handler(conn, msg),
            None => warn!(target: "dispatcher", ?msg_type, "no handler registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::connection::ConnectionSink;
    use crate::ids::ConnId;

    struct FakeSink;
    impl ConnectionSink for FakeSink {
        fn id(&self) -> ConnId {
            ConnId(1)
        }
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:1".parse().unwrap()
        }
        fn send(&self, _payload: Vec<u8>) {}
        fn shutdown(&self) {}
    }

    #[test]
    fn dispatches_to_matching_handler() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        dispatcher.register(
            MsgType::Chat,
            Arc::new(move |_conn, _msg| {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let conn = ConnectionHandle::new(Arc::new(FakeSink));
        dispatcher.dispatch(
            &conn,
            EchoMsg::Chat {
                room: "lobby".into(),
                text: "hi".into(),
            },
        );
        dispatcher.dispatch(
            &conn,
            EchoMsg::LeaveRoom {
                room: "lobby".into(),
            },
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
