//! Non-blocking TCP listener and stream.

use std::io::{self, Read, Write};
use std::net::{self, Ipv4Addr, Shutdown, SocketAddr};

use socket2::{Domain, Type};
use tracing::{debug, trace};

use super::{Listen, Socket};
use crate::error::Error;
use crate::Result;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

const BACKLOG: i32 = 128;

/// A bound, non-blocking TCP listener.
pub struct TcpListener {
    inner: net::TcpListener,
}

impl TcpListener {
    /// Binds `address:port`. The address is a dotted quad or the literal
    /// `"INADDR_ANY"`; port 0 asks the system for an ephemeral port, which
    /// [`local_addr`](TcpListener::local_addr) then reports.
    pub fn bind(address: &str, port: u16) -> Result<TcpListener> {
        let ip: Ipv4Addr = if address == "INADDR_ANY" {
            Ipv4Addr::UNSPECIFIED
        } else {
            address.parse().map_err(|_| Error::new_invalid_uri())?
        };
        let addr = SocketAddr::from((ip, port));

        let socket =
            socket2::Socket::new(Domain::IPV4, Type::STREAM, None).map_err(Error::new_listen)?;
        socket.set_reuse_address(true).map_err(Error::new_listen)?;
        socket.set_nonblocking(true).map_err(Error::new_listen)?;
        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                Error::new_address_in_use()
            } else {
                Error::new_listen(e)
            }
        })?;
        socket.listen(BACKLOG).map_err(Error::new_listen)?;

        let listener: net::TcpListener = socket.into();
        debug!("listening on {}", listener.local_addr().map_err(Error::new_listen)?);
        Ok(TcpListener { inner: listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Error::new_listen)
    }
}

#[cfg(unix)]
impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Listen for TcpListener {
    type Socket = TcpStream;

    fn accept(&mut self) -> io::Result<Option<TcpStream>> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                trace!("accepted connection from {}", peer);
                Ok(Some(TcpStream { inner: stream }))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A connected, non-blocking TCP stream.
pub struct TcpStream {
    inner: net::TcpStream,
}

impl TcpStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

#[cfg(unix)]
impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Socket for TcpStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    #[cfg(unix)]
    fn sendfile(&mut self, fd: RawFd, len: usize) -> io::Result<usize> {
        super::sendfile_fd(self.inner.as_raw_fd(), fd, len)
    }

    fn shutdown(&mut self) {
        let _ = self.inner.shutdown(Shutdown::Both);
    }
}
