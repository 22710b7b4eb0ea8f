//! Wires the acceptor, worker reactor pool, and datagram relay into one
//! running server.
//!
//! Grounded in the original `TcpServer`/`main.cpp`: one reactor owns the
//! listening socket, a fixed pool of worker reactors each own a disjoint
//! set of connections assigned round-robin, and the UDP voice relay runs
//! on a reactor of its own so a flood of stream I/O can't starve it (or
//! vice versa).

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::acceptor::Acceptor;
use crate::channel::Readiness;
use crate::connection::{Connection, ConnectionHandle, ConnectionSink, ReadOutcome};
use crate::datagram::DatagramRelay;
use crate::dispatcher::Dispatcher;
use crate::ids::ConnId;
use crate::poller::{Poller, Token};
use crate::reactor::{Reactor, ReactorHandle, ReactorState};
use crate::reactor_pool::ReactorPool;
use crate::registry::{RoomRegistry, UserRegistry};
use crate::wire;

/// Called with a freshly established or just-closed connection's handle.
pub type ConnectionCallback = Arc<dyn Fn(ConnId, &ConnectionHandle) + Send + Sync>;

/// Bind addresses and worker count for a running server.
#[derive(Debug, Clone)]
pub struct StreamServerConfig {
    pub stream_addr: SocketAddr,
    pub datagram_addr: SocketAddr,
    pub worker_count: usize,
}

/// Routes a connection's sends and shutdown requests back onto the worker
/// reactor that owns it.
struct WorkerSink {
    reactor: ReactorHandle<WorkerState>,
    id: ConnId,
    peer_addr: SocketAddr,
}

impl ConnectionSink for WorkerSink {
    fn id(&self) -> ConnId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn send(&self, payload: Vec<u8>) {
        let id = self.id;
        self.reactor.queue_in_loop(move |state: &mut WorkerState, poller: &mut Poller| {
            if let Some(conn) = state.connections.get_mut(&id) {
                if let Err(err) = conn.send(&payload, poller) {
                    warn!(target: "server", %id, "send failed: {}", err);
                }
            }
        });
    }

    fn shutdown(&self) {
        let id = self.id;
        self.reactor.queue_in_loop(move |state: &mut WorkerState, poller: &mut Poller| {
            if let Some(conn) = state.connections.get_mut(&id) {
                conn.shutdown(poller);
            }
        });
    }
}

/// A worker reactor's state: the connections it owns plus shared access to
/// the registries and dispatcher every handler needs.
///
/// `acceptor`/`on_connect`/`next_conn_id` are only populated in the
/// degenerate zero-worker-reactors configuration (spec.md §4.4: "an empty
/// pool returns the owning reactor"), where this single reactor both accepts
/// and owns every connection instead of handing them off to a separate pool.
pub struct WorkerState {
    connections: HashMap<ConnId, Connection>,
    dispatcher: Arc<Dispatcher>,
    users: Arc<UserRegistry>,
    rooms: Arc<RoomRegistry>,
    on_close: ConnectionCallback,
    self_handle: ReactorHandle<WorkerState>,
    acceptor: Option<Acceptor>,
    on_connect: Option<ConnectionCallback>,
    next_conn_id: u64,
}

impl WorkerState {
    fn handle_of(&self, id: ConnId, peer_addr: SocketAddr) -> ConnectionHandle {
        ConnectionHandle::new(Arc::new(WorkerSink {
            reactor: self.self_handle.clone(),
            id,
            peer_addr,
        }))
    }

    fn accept(&mut self, id: ConnId, socket: TcpStream, peer_addr: SocketAddr, poller: &mut Poller, on_connect: ConnectionCallback) {
        match Connection::new(id, socket, poller) {
            Ok(conn) => {
                self.connections.insert(id, conn);
                let handle = self.handle_of(id, peer_addr);
                on_connect(id, &handle);
            }
            Err(err) => warn!(target: "server", %peer_addr, "failed to register accepted connection: {}", err),
        }
    }

    fn close_connection(&mut self, id: ConnId, poller: &mut Poller) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        let peer_addr = conn.peer_addr();
        conn.close(poller);

        if let Some((user, room)) = self.users.logout_conn(id) {
            if let Some(room) = room {
                self.rooms.leave(&room, user);
            }
        }

        let handle = self.handle_of(id, peer_addr);
        (self.on_close)(id, &handle);
    }

    /// Degenerate single-reactor mode only: accept directly onto this same
    /// reactor instead of handing the connection off to a worker pool.
    fn handle_accept(&mut self, poller: &mut Poller) {
        let Some(acceptor) = self.acceptor.as_mut() else {
            return;
        };
        match acceptor.handle_read() {
            Ok(accepted) => {
                for (socket, peer_addr) in accepted {
                    let id = ConnId(self.next_conn_id);
                    self.next_conn_id += 1;
                    let on_connect = self
                        .on_connect
                        .clone()
                        .expect("degenerate mode always sets on_connect alongside acceptor");
                    info!(target: "server", %id, %peer_addr, "accepted connection");
                    self.accept(id, socket, peer_addr, poller, on_connect);
                }
            }
            Err(err) => warn!(target: "server", "accept failed: {}", err),
        }
    }
}

impl ReactorState for WorkerState {
    fn dispatch(&mut self, poller: &mut Poller, token: Token, order: &[Readiness]) {
        if token == Token::Listener {
            if order.contains(&Readiness::Read) {
                self.handle_accept(poller);
            }
            return;
        }
        let Token::Connection(id) = token else {
            return;
        };
        let mut should_close = order.contains(&Readiness::Error);

        if !should_close && order.contains(&Readiness::Read) {
            let outcome = self.connections.get_mut(&id).map(Connection::handle_read);
            match outcome {
                Some(Ok(ReadOutcome::Frames(frames))) => {
                    let peer_addr = self
                        .connections
                        .get(&id)
                        .map(Connection::peer_addr)
                        .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
                    for frame in frames {
                        match wire::decode(&frame) {
                            Ok(msg) => {
                                let handle = self.handle_of(id, peer_addr);
                                self.dispatcher.dispatch(&handle, msg);
                            }
                            Err(err) => {
                                warn!(target: "server", %id, "dropping connection on bad frame: {}", err);
                                should_close = true;
                                break;
                            }
                        }
                    }
                }
                Some(Ok(ReadOutcome::Closed)) => should_close = true,
                Some(Err(err)) => {
                    warn!(target: "server", %id, "read error: {}", err);
                    should_close = true;
                }
                None => {}
            }
        }

        if !should_close && order.contains(&Readiness::Write) {
            if let Some(conn) = self.connections.get_mut(&id) {
                if let Err(err) = conn.handle_write(poller) {
                    warn!(target: "server", %id, "write error: {}", err);
                    should_close = true;
                }
            }
        }

        if should_close {
            self.close_connection(id, poller);
        }
    }
}

/// The stream acceptor's reactor state: accepts, then hands each new
/// connection off to a worker reactor chosen round-robin.
struct AcceptorState {
    acceptor: Acceptor,
    workers: Arc<ReactorPool<WorkerState>>,
    next_conn_id: u64,
    on_connect: ConnectionCallback,
}

impl AcceptorState {
    fn bind(
        addr: SocketAddr,
        poller: &mut Poller,
        workers: Arc<ReactorPool<WorkerState>>,
        on_connect: ConnectionCallback,
    ) -> io::Result<Self> {
        Ok(Self {
            acceptor: Acceptor::bind(addr, poller)?,
            workers,
            next_conn_id: 1,
            on_connect,
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }
}

impl ReactorState for AcceptorState {
    fn dispatch(&mut self, _poller: &mut Poller, token: Token, order: &[Readiness]) {
        if token != Token::Listener || !order.contains(&Readiness::Read) {
            return;
        }
        match self.acceptor.handle_read() {
            Ok(accepted) => {
                for (socket, peer_addr) in accepted {
                    let id = ConnId(self.next_conn_id);
                    self.next_conn_id += 1;

                    let Some(worker) = self.workers.next_handle() else {
                        warn!(target: "server", %peer_addr, "no worker reactors configured, dropping connection");
                        continue;
                    };
                    let on_connect = self.on_connect.clone();
                    info!(target: "server", %id, %peer_addr, "accepted connection");
                    worker.queue_in_loop(move |state: &mut WorkerState, poller: &mut Poller| {
                        state.accept(id, socket, peer_addr, poller, on_connect);
                    });
                }
            }
            Err(err) => warn!(target: "server", "accept failed: {}", err),
        }
    }
}

struct DatagramState {
    relay: DatagramRelay,
}

impl DatagramState {
    fn bind(
        addr: SocketAddr,
        poller: &mut Poller,
        users: Arc<UserRegistry>,
        rooms: Arc<RoomRegistry>,
    ) -> io::Result<Self> {
        Ok(Self {
            relay: DatagramRelay::bind(addr, poller, users, rooms)?,
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.relay.local_addr()
    }
}

impl ReactorState for DatagramState {
    fn dispatch(&mut self, _poller: &mut Poller, token: Token, order: &[Readiness]) {
        if token == Token::Datagram && order.contains(&Readiness::Read) {
            self.relay.handle_read();
        }
    }
}

/// The reactor that owns the listening socket: either a dedicated
/// [`AcceptorState`] handing connections off to a worker pool, or -- in
/// degenerate zero-worker-reactors mode (spec.md §4.4) -- the sole
/// [`WorkerState`] reactor accepting onto itself.
enum ListenerHandle {
    Acceptor(ReactorHandle<AcceptorState>),
    Worker(ReactorHandle<WorkerState>),
}

impl ListenerHandle {
    fn quit(&self) {
        match self {
            ListenerHandle::Acceptor(handle) => handle.quit(),
            ListenerHandle::Worker(handle) => handle.quit(),
        }
    }
}

/// A running EchoMesh relay: accept reactor, worker pool, and datagram
/// relay, all started. Drop order doesn't stop the threads; call
/// [`StreamServer::shutdown`] explicitly.
pub struct StreamServer {
    workers: Arc<ReactorPool<WorkerState>>,
    listener_handle: ListenerHandle,
    listener_join: std::thread::JoinHandle<()>,
    datagram_handle: ReactorHandle<DatagramState>,
    datagram_join: std::thread::JoinHandle<()>,
    pub users: Arc<UserRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    stream_addr: SocketAddr,
    datagram_addr: SocketAddr,
}

impl StreamServer {
    pub fn start(config: StreamServerConfig) -> io::Result<Self> {
        Self::start_with_callbacks(
            config,
            Arc::new(|id, handle| info!(target: "server", %id, peer = %handle.peer_addr(), "connection established")),
            Arc::new(|id, _handle| info!(target: "server", %id, "connection closed")),
        )
    }

    pub fn start_with_callbacks(
        config: StreamServerConfig,
        on_connect: ConnectionCallback,
        on_close: ConnectionCallback,
    ) -> io::Result<Self> {
        let users = Arc::new(UserRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new());

        let dispatcher_for_workers = dispatcher.clone();
        let users_for_workers = users.clone();
        let rooms_for_workers = rooms.clone();
        let on_close_for_workers = on_close.clone();
        let workers = ReactorPool::start(config.worker_count, "echomesh-worker", move |_poller, handle| {
            Ok(WorkerState {
                connections: HashMap::new(),
                dispatcher: dispatcher_for_workers.clone(),
                users: users_for_workers.clone(),
                rooms: rooms_for_workers.clone(),
                on_close: on_close_for_workers.clone(),
                self_handle: handle,
                acceptor: None,
                on_connect: None,
                next_conn_id: 1,
            })
        })?;
        let workers = Arc::new(workers);

        let stream_addr_cell = Arc::new(OnceLock::new());
        let cell = stream_addr_cell.clone();
        let stream_addr = config.stream_addr;

        let (listener_join, listener_handle) = if config.worker_count == 0 {
            // Degenerate single-reactor mode (spec.md §4.4): no separate
            // worker pool exists, so the reactor that owns the listener
            // also owns every accepted connection.
            let dispatcher = dispatcher.clone();
            let users = users.clone();
            let rooms = rooms.clone();
            let on_close = on_close.clone();
            let (reactor, _unused) = Reactor::new(move |poller, handle| {
                let acceptor = Acceptor::bind(stream_addr, poller)?;
                let _ = cell.set(acceptor.local_addr()?);
                Ok(WorkerState {
                    connections: HashMap::new(),
                    dispatcher: dispatcher.clone(),
                    users: users.clone(),
                    rooms: rooms.clone(),
                    on_close: on_close.clone(),
                    self_handle: handle,
                    acceptor: Some(acceptor),
                    on_connect: Some(on_connect.clone()),
                    next_conn_id: 1,
                })
            })?;
            let (join, handle) = reactor.spawn("echomesh-accept");
            (join, ListenerHandle::Worker(handle))
        } else {
            let workers_for_acceptor = workers.clone();
            let (reactor, _unused) = Reactor::new(move |poller, _handle| {
                let state = AcceptorState::bind(stream_addr, poller, workers_for_acceptor, on_connect.clone())?;
                let _ = cell.set(state.local_addr()?);
                Ok(state)
            })?;
            let (join, handle) = reactor.spawn("echomesh-accept");
            (join, ListenerHandle::Acceptor(handle))
        };
        let stream_addr = *stream_addr_cell
            .get()
            .expect("the listener build closure sets this before Reactor::new returns");

        let datagram_addr_cell = Arc::new(OnceLock::new());
        let cell = datagram_addr_cell.clone();
        let users_for_datagram = users.clone();
        let rooms_for_datagram = rooms.clone();
        let datagram_addr = config.datagram_addr;
        let (datagram_reactor, _unused) = Reactor::new(move |poller, _handle| {
            let state = DatagramState::bind(datagram_addr, poller, users_for_datagram, rooms_for_datagram)?;
            let _ = cell.set(state.local_addr()?);
            Ok(state)
        })?;
        let (datagram_join, datagram_handle) = datagram_reactor.spawn("echomesh-datagram");
        let datagram_addr = *datagram_addr_cell
            .get()
            .expect("the datagram build closure sets this before Reactor::new returns");

        Ok(Self {
            workers,
            listener_handle,
            listener_join,
            datagram_handle,
            datagram_join,
            users,
            rooms,
            dispatcher,
            stream_addr,
            datagram_addr,
        })
    }

    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    pub fn datagram_addr(&self) -> SocketAddr {
        self.datagram_addr
    }

    /// Signal every reactor to quit and wait for them to exit. The worker
    /// pool is only joined once the listener reactor (its last other
    /// owner) has fully stopped, since `ReactorPool::join_all` requires
    /// sole ownership.
    pub fn shutdown(self) {
        self.listener_handle.quit();
        self.datagram_handle.quit();
        self.workers.quit_all();

        let _ = self.listener_join.join();
        let _ = self.datagram_join.join();

        match Arc::try_unwrap(self.workers) {
            Ok(pool) => pool.join_all(),
            Err(_) => warn!(target: "server", "worker pool outlived the acceptor; not joining worker threads"),
        }
    }
}
