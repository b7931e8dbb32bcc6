//! Non-blocking Unix-domain ("pipe") listener and stream.

use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net;
use std::path::Path;

use tracing::{debug, trace};

use super::{Listen, Socket};
use crate::error::Error;
use crate::Result;

/// A bound, non-blocking Unix-domain listener.
pub struct UnixListener {
    inner: net::UnixListener,
}

impl UnixListener {
    /// Binds the filesystem `path`, replacing a stale socket file left by
    /// a previous run.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<UnixListener> {
        let path = path.as_ref();
        let _ = fs::remove_file(path);
        let listener = net::UnixListener::bind(path).map_err(Error::new_listen)?;
        listener.set_nonblocking(true).map_err(Error::new_listen)?;
        debug!("listening on {}", path.display());
        Ok(UnixListener { inner: listener })
    }
}

impl AsRawFd for UnixListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Listen for UnixListener {
    type Socket = UnixStream;

    fn accept(&mut self) -> io::Result<Option<UnixStream>> {
        match self.inner.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(true)?;
                trace!("accepted pipe connection");
                Ok(Some(UnixStream { inner: stream }))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A connected, non-blocking Unix-domain stream.
pub struct UnixStream {
    inner: net::UnixStream,
}

impl AsRawFd for UnixStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Socket for UnixStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn sendfile(&mut self, fd: RawFd, len: usize) -> io::Result<usize> {
        super::sendfile_fd(self.inner.as_raw_fd(), fd, len)
    }

    fn shutdown(&mut self) {
        let _ = self.inner.shutdown(Shutdown::Both);
    }
}
