//! The stream listener: binds once, then accepts in a loop on every
//! readiness notification.
//!
//! Grounded in the original `Acceptor`'s reserved-fd trick for recovering
//! from `EMFILE`/`ENFILE` without spinning the event loop, and in the
//! teacher's `net::reactor::listen` for non-blocking socket construction
//! via `socket2`.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream};

use socket2::{Domain, Socket, Type};
use tracing::warn;

use crate::channel::Channel;
use crate::poller::{Poller, Token};

pub struct Acceptor {
    listener: Socket,
    channel: Channel,
    /// A spare, otherwise-unused fd held in reserve. When `accept` fails
    /// with `EMFILE`/`ENFILE`, this is closed to free one fd, a single
    /// pending connection is accepted and immediately dropped, and the
    /// reserve is reopened -- keeping the listener able to shed load
    /// instead of spinning on a readiness event it can never clear.
    idle_fd: Option<File>,
}

impl Acceptor {
    pub fn bind(addr: SocketAddr, poller: &mut Poller) -> io::Result<Self> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let listener = Socket::new(domain, Type::STREAM, None)?;
        listener.set_reuse_address(true)?;
        #[cfg(unix)]
        listener.set_reuse_port(true)?;
        listener.set_nonblocking(true)?;
        listener.bind(&addr.into())?;
        listener.listen(1024)?;

        let channel = Channel::register(poller, Token::Listener, &listener);
        let idle_fd = File::open("/dev/null").ok();

        Ok(Self {
            listener,
            channel,
            idle_fd,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener has no IP address"))
    }

    pub fn token(&self) -> Token {
        self.channel.token()
    }

    /// Accept every connection currently pending, handling fd exhaustion
    /// inline rather than returning it to the caller: there is no pending
    /// connection to hand back in that case anyway.
    pub fn handle_read(&mut self) -> io::Result<Vec<(TcpStream, SocketAddr)>> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((socket, addr)) => {
                    let addr = addr.as_socket().unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
                    accepted.push((socket.into(), addr));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if is_fd_exhaustion(&err) => self.recover_from_fd_exhaustion(),
                Err(err) => return Err(err),
            }
        }
        Ok(accepted)
    }

    fn recover_from_fd_exhaustion(&mut self) {
        warn!(target: "acceptor", "out of file descriptors, shedding one pending connection");
        self.idle_fd.take();
        let _ = self.listener.accept();
        self.idle_fd = File::open("/dev/null").ok();
    }
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}
