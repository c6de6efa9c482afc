//! Socket establishment and the connected session socket.

use std::io::{self, Read};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use nix::sys::socket::{MsgFlags, send};

use super::server::ServerAddr;

/// A connected stream socket, UNIX or TCP, in non-blocking mode.
///
/// Writes go through `send(2)` with `MSG_NOSIGNAL` so a dead peer surfaces
/// as `EPIPE` instead of killing the process.
#[derive(Debug)]
pub enum SessionSocket {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl SessionSocket {
    pub fn fd(&self) -> RawFd {
        match self {
            SessionSocket::Unix(s) => s.as_raw_fd(),
            SessionSocket::Tcp(s) => s.as_raw_fd(),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SessionSocket::Unix(s) => s.read(buf),
            SessionSocket::Tcp(s) => s.read(buf),
        }
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        send(self.fd(), buf, MsgFlags::MSG_NOSIGNAL)
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
    }
}

/// An in-flight connection attempt.
///
/// The attempt itself runs to completion (bounded by the connect timeout)
/// when the client is created, but the outcome is handed to the session only
/// from the next event-loop iteration, so the caller always observes the
/// `Connecting` state and an asynchronous readiness transition.
#[derive(Debug)]
pub struct SocketClient {
    outcome: Option<io::Result<SessionSocket>>,
}

impl SocketClient {
    pub fn begin(addr: &ServerAddr, connect_timeout: Duration) -> Self {
        let outcome = match addr {
            ServerAddr::Unix(path) => UnixStream::connect(path).and_then(|s| {
                s.set_nonblocking(true)?;
                Ok(SessionSocket::Unix(s))
            }),
            ServerAddr::Inet(addr) => {
                TcpStream::connect_timeout(addr, connect_timeout).and_then(|s| {
                    s.set_nodelay(true)?;
                    s.set_nonblocking(true)?;
                    Ok(SessionSocket::Tcp(s))
                })
            }
        };
        Self {
            outcome: Some(outcome),
        }
    }

    /// Take the connection outcome. Yields a value exactly once.
    pub fn finish(&mut self) -> Option<io::Result<SessionSocket>> {
        self.outcome.take()
    }
}
