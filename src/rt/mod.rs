//! The narrow interfaces to the outside world.
//!
//! The event loop itself lives with the embedder: it watches the handles
//! it registered and calls back into
//! [`Httpd::accept_ready`](crate::server::Httpd::accept_ready),
//! [`read_ready`](crate::server::Httpd::read_ready),
//! [`write_ready`](crate::server::Httpd::write_ready) and
//! [`tick`](crate::server::Httpd::tick). This module defines the byte
//! transport those entry points drive, the [`Socket`] and [`Listen`]
//! traits, together with non-blocking TCP and Unix-domain
//! implementations.

use std::io;

#[cfg(unix)]
use std::os::unix::io::RawFd;

mod tcp;
#[cfg(unix)]
mod uds;

pub use self::tcp::{TcpListener, TcpStream};
#[cfg(unix)]
pub use self::uds::{UnixListener, UnixStream};

/// A non-blocking byte transport.
///
/// `recv` and `send` follow `io` conventions: `Ok(0)` from `recv` means
/// the peer closed the connection, and `ErrorKind::WouldBlock` means the
/// operation should be retried once the embedder's event loop reports
/// readiness.
pub trait Socket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Transmits up to `len` bytes from `fd` (at its current file offset)
    /// to the peer, returning how many were sent.
    #[cfg(unix)]
    fn sendfile(&mut self, fd: RawFd, len: usize) -> io::Result<usize> {
        let _ = (fd, len);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sendfile is not supported by this transport",
        ))
    }

    /// Shuts the transport down in both directions. Errors are not
    /// interesting at this point and are swallowed.
    fn shutdown(&mut self);
}

/// A non-blocking listener handing out connected [`Socket`]s.
pub trait Listen {
    type Socket: Socket;

    /// Accepts one pending connection; `Ok(None)` when none is queued.
    fn accept(&mut self) -> io::Result<Option<Self::Socket>>;
}

/// `sendfile(2)` from `in_fd`'s current offset to `out_fd`.
#[cfg(target_os = "linux")]
pub(crate) fn sendfile_fd(out_fd: RawFd, in_fd: RawFd, len: usize) -> io::Result<usize> {
    let sent = unsafe { libc::sendfile(out_fd, in_fd, std::ptr::null_mut(), len) };
    if sent < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(sent as usize)
    }
}

/// Portable fallback: read a chunk from the file and write it out,
/// rewinding the file offset past anything the socket refused.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn sendfile_fd(out_fd: RawFd, in_fd: RawFd, len: usize) -> io::Result<usize> {
    let mut chunk = [0u8; 8192];
    let want = len.min(chunk.len());
    let got = unsafe { libc::read(in_fd, chunk.as_mut_ptr() as *mut _, want) };
    if got < 0 {
        return Err(io::Error::last_os_error());
    }
    if got == 0 {
        return Ok(0);
    }

    let sent = unsafe { libc::write(out_fd, chunk.as_ptr() as *const _, got as usize) };
    if sent < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::lseek(in_fd, -got as libc::off_t, libc::SEEK_CUR) };
        return Err(err);
    }

    let unsent = got as usize - sent as usize;
    if unsent > 0 {
        unsafe { libc::lseek(in_fd, -(unsent as libc::off_t), libc::SEEK_CUR) };
    }
    Ok(sent as usize)
}
