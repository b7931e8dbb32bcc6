//! The per-request view handed to handlers: read-side accessors over the
//! parsed request, and the write-side response operations.

use std::time::Instant;

use http::{Method, StatusCode};
use tracing::trace;

use super::conn::{Conn, ConnState, OutBuf, RequestLine};
use super::pool::Pool;
use super::Config;
use crate::error::Error;
use crate::proto::message::{HeaderSpan, Span};
use crate::rt::Socket;
use crate::Result;

#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(unix)]
use super::conn::Sendfile;

/// A transient view of one connection, valid for a single handler
/// invocation. Handlers must not retain slices obtained from it past the
/// call; the borrow checker enforces this.
pub struct Request<'a, S: Socket> {
    buf: &'a [u8],
    line: &'a RequestLine,
    headers: &'a [HeaderSpan],
    content_length: u64,
    content_seen: u64,
    out: &'a mut OutBuf,
    #[cfg(unix)]
    sendfile: &'a mut Option<Sendfile<S>>,
    sock: &'a mut S,
    pool: &'a mut Pool,
    index: usize,
    config: &'a Config,
    now: Instant,
}

impl<'a, S: Socket> Request<'a, S> {
    #[cfg(unix)]
    pub(crate) fn new(
        conn: &'a mut Conn<S>,
        pool: &'a mut Pool,
        index: usize,
        config: &'a Config,
        now: Instant,
    ) -> Request<'a, S> {
        Request {
            buf: &conn.input.buf[..conn.input.len],
            line: &conn.input.line,
            headers: &conn.input.headers,
            content_length: conn.input.content_length,
            content_seen: conn.input.content_seen,
            out: &mut conn.out,
            sendfile: &mut conn.sendfile,
            sock: conn.sock.as_mut().expect("live connection has a socket"),
            pool,
            index,
            config,
            now,
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn new(
        conn: &'a mut Conn<S>,
        pool: &'a mut Pool,
        index: usize,
        config: &'a Config,
        now: Instant,
    ) -> Request<'a, S> {
        Request {
            buf: &conn.input.buf[..conn.input.len],
            line: &conn.input.line,
            headers: &conn.input.headers,
            content_length: conn.input.content_length,
            content_seen: conn.input.content_seen,
            out: &mut conn.out,
            sock: conn.sock.as_mut().expect("live connection has a socket"),
            pool,
            index,
            config,
            now,
        }
    }

    /// The connection's pool index; stable for the connection's lifetime
    /// and usable as a reactor registration token.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The record's current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.pool.state(self.index)
    }

    /// The request method, once the request line has parsed.
    pub fn method(&self) -> Option<&Method> {
        self.line.method.as_ref()
    }

    /// The request URL, raw; empty until the request line has parsed.
    pub fn url(&self) -> &[u8] {
        self.line.url.map(|s| s.slice(self.buf)).unwrap_or(b"")
    }

    /// The protocol version token, raw.
    pub fn version(&self) -> &[u8] {
        self.line.version.map(|s| s.slice(self.buf)).unwrap_or(b"")
    }

    /// Looks up a request header by name, case-insensitively. The first
    /// match wins.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.slice(self.buf).eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value.slice(self.buf))
    }

    /// All request headers, in arrival order, names in original case.
    pub fn headers(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        let buf = self.buf;
        self.headers
            .iter()
            .map(move |h| (h.name.slice(buf), h.value.slice(buf)))
    }

    /// The value of the `Content-Length` header, zero when absent.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Body bytes already delivered to the application.
    pub fn content_seen(&self) -> u64 {
        self.content_seen
    }

    /// Looks up an already-buffered response header by name.
    pub fn header_out(&self, name: &str) -> Option<&[u8]> {
        let buf: &[u8] = &self.out.buf;
        self.out
            .headers
            .iter()
            .find(|h| h.name.slice(buf).eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value.slice(buf))
    }

    /// Appends a response header. No duplicate check is made.
    ///
    /// Returns `NoUnusedElements` when the output buffer cannot hold the
    /// header; the caller should then give up on the response and
    /// [`response_close`](Request::response_close).
    pub fn set_header_out(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let need = name.len() + 2 + value.len() + 2;
        if self.out.buf.len() + need > self.out.cap
            || self.out.headers.len() >= self.config.max_headers
        {
            return Err(Error::new_no_unused_elements());
        }

        let name_off = self.out.buf.len();
        self.out.buf.extend_from_slice(name.as_bytes());
        self.out.buf.extend_from_slice(b": ");
        let value_off = self.out.buf.len();
        self.out.buf.extend_from_slice(value);
        self.out.buf.extend_from_slice(b"\r\n");
        self.out.headers.push(HeaderSpan {
            name: Span {
                off: name_off,
                len: name.len(),
            },
            value: Span {
                off: value_off,
                len: value.len(),
            },
        });
        Ok(())
    }

    /// Appends a `Content-Length` header.
    pub fn set_content_length(&mut self, length: u64) -> Result<()> {
        let mut digits = itoa::Buffer::new();
        self.set_header_out("Content-Length", digits.format(length).as_bytes())
    }

    /// Writes the status line, the buffered headers and the blank line to
    /// the socket.
    ///
    /// Writes are not buffered by the core: a transport that is not ready
    /// surfaces `WouldBlock` to the caller, and a vanished peer surfaces
    /// `NoConnection`. A response interrupted mid-write cannot be resumed;
    /// callers should [`response_close`](Request::response_close) on error.
    pub fn response_start(&mut self, code: StatusCode, reason: &str) -> Result<()> {
        trace!("response {} {}", code.as_u16(), reason);
        let mut head = Vec::with_capacity(16 + reason.len() + self.out.buf.len() + 2);
        head.extend_from_slice(b"HTTP/1.1 ");
        let mut digits = itoa::Buffer::new();
        head.extend_from_slice(digits.format(code.as_u16()).as_bytes());
        head.push(b' ');
        head.extend_from_slice(reason.as_bytes());
        head.extend_from_slice(b"\r\n");
        head.extend_from_slice(&self.out.buf);
        head.extend_from_slice(b"\r\n");
        self.send_all(&head)
    }

    /// Writes body bytes straight through to the socket.
    pub fn response_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.send_all(chunk)
    }

    /// Asks the transport to transmit `length` bytes from `fd`, starting
    /// at the file's current offset. The transfer continues across
    /// writability events; `done` is invoked exactly once with the final
    /// result (success, or the transport error that stopped it).
    #[cfg(unix)]
    pub fn response_sendfile<F>(&mut self, fd: RawFd, length: usize, done: F) -> Result<()>
    where
        F: FnOnce(&mut Request<'_, S>, Result<()>) + 'static,
    {
        debug_assert!(self.sendfile.is_none(), "sendfile already in flight");
        let mut remaining = length;
        while remaining > 0 {
            match self.sock.sendfile(fd, remaining) {
                Ok(0) => {
                    done(self, Err(Error::new_no_connection()));
                    return Ok(());
                }
                Ok(n) => remaining -= n.min(remaining),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    trace!("sendfile parked, {} bytes remaining", remaining);
                    *self.sendfile = Some(Sendfile {
                        fd,
                        remaining,
                        done: Some(Box::new(done)),
                    });
                    return Ok(());
                }
                Err(e) => {
                    done(self, Err(e.into()));
                    return Ok(());
                }
            }
        }
        done(self, Ok(()));
        Ok(())
    }

    /// Completes the response: per-request state is cleared and the record
    /// returns to `Idle` for keep-alive.
    ///
    /// Bytes of a pipelined next request that already arrived are
    /// discarded; an application responding before the current request's
    /// body has fully arrived should use
    /// [`response_close`](Request::response_close) instead.
    pub fn response_end(&mut self) {
        let state = self.pool.state(self.index);
        trace!("response end, {:?} -> Idle", state);
        self.out.clear();
        self.pool.set_state(self.index, state, ConnState::Idle, self.now);
    }

    /// Abandons keep-alive: the socket is shut down and the record freed.
    pub fn response_close(&mut self) {
        let state = self.pool.state(self.index);
        trace!("response close in {:?}", state);
        self.out.clear();
        self.sock.shutdown();
        self.pool.set_state(self.index, state, ConnState::Free, self.now);
    }

    /// Shorthand: `Content-Length`, status line, one body chunk, end.
    pub fn response_simple(&mut self, code: StatusCode, reason: &str, body: &[u8]) -> Result<()> {
        self.set_content_length(body.len() as u64)?;
        self.response_start(code, reason)?;
        self.response_chunk(body)?;
        self.response_end();
        Ok(())
    }

    fn send_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.sock.send(bytes) {
                Ok(0) => return Err(Error::new_no_connection()),
                Ok(n) => bytes = &bytes[n..],
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
