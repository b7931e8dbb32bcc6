//! Per-connection state: the bounded input buffer, the cursor into it, and
//! the output side of an in-flight response.

use bytes::BytesMut;
use http::Method;

use crate::proto::message::{HeaderSpan, MessageParser, Span};

#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::rt::Socket;

#[cfg(unix)]
use crate::Result;

/// The lifecycle states of a connection record.
///
/// A record is either `Free` with no socket, or in one of the live states
/// with an open socket. Reads drive `Idle` through `ReqBody`; while in
/// `ReqResponse` incoming bytes are discarded until the application
/// completes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Free,
    Idle,
    ReqLine,
    ReqHeaders,
    ReqBody,
    ReqResponse,
}

impl ConnState {
    pub(crate) const COUNT: usize = 6;

    pub(crate) const ALL: [ConnState; ConnState::COUNT] = [
        ConnState::Free,
        ConnState::Idle,
        ConnState::ReqLine,
        ConnState::ReqHeaders,
        ConnState::ReqBody,
        ConnState::ReqResponse,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// The parsed request line, as spans into the input buffer.
#[derive(Debug, Default)]
pub(crate) struct RequestLine {
    pub(crate) method: Option<Method>,
    pub(crate) url: Option<Span>,
    pub(crate) version: Option<Span>,
    /// Offset of the header block, just past the request line's CRLF.
    pub(crate) headers_off: usize,
}

/// The input side of a connection: a fixed-capacity buffer holding the
/// unconsumed prefix of the current request up to end-of-headers, the
/// parser cursor over it, and everything parsed so far.
pub(crate) struct Input {
    pub(crate) buf: BytesMut,
    pub(crate) len: usize,
    pub(crate) parser: MessageParser,
    /// Absolute offset in `buf` of the parser's position zero; advances
    /// only when an oversized header line is dropped.
    pub(crate) parse_base: usize,
    pub(crate) line: RequestLine,
    pub(crate) headers: Vec<HeaderSpan>,
    pub(crate) content_length: u64,
    pub(crate) content_seen: u64,
    pub(crate) saw_content_length: bool,
}

impl Input {
    fn new(capacity: usize) -> Input {
        Input {
            buf: BytesMut::zeroed(capacity),
            len: 0,
            parser: MessageParser::new(),
            parse_base: 0,
            line: RequestLine::default(),
            headers: Vec::new(),
            content_length: 0,
            content_seen: 0,
            saw_content_length: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.parser = MessageParser::new();
        self.parse_base = 0;
        self.line = RequestLine::default();
        self.headers.clear();
        self.content_length = 0;
        self.content_seen = 0;
        self.saw_content_length = false;
    }
}

/// The output side: headers accumulated before the flush, as bytes plus
/// spans over them. The application's body bytes are never buffered here.
pub(crate) struct OutBuf {
    pub(crate) cap: usize,
    pub(crate) buf: BytesMut,
    pub(crate) headers: Vec<HeaderSpan>,
}

impl OutBuf {
    fn new(capacity: usize) -> OutBuf {
        OutBuf {
            cap: capacity,
            buf: BytesMut::with_capacity(capacity),
            headers: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
        self.headers.clear();
    }
}

/// An in-flight file transmission, parked until the socket is writable
/// again.
#[cfg(unix)]
pub(crate) struct Sendfile<S: Socket> {
    pub(crate) fd: RawFd,
    pub(crate) remaining: usize,
    pub(crate) done: Option<SendfileDone<S>>,
}

/// Completion continuation for [`Request::response_sendfile`].
///
/// [`Request::response_sendfile`]: crate::server::Request::response_sendfile
#[cfg(unix)]
pub type SendfileDone<S> =
    Box<dyn FnOnce(&mut crate::server::Request<'_, S>, Result<()>)>;

/// One connection record, owned by the server's pool.
pub(crate) struct Conn<S: Socket> {
    pub(crate) sock: Option<S>,
    pub(crate) input: Input,
    pub(crate) out: OutBuf,
    #[cfg(unix)]
    pub(crate) sendfile: Option<Sendfile<S>>,
}

#[cfg(unix)]
impl<S: Socket> Conn<S> {
    pub(crate) fn new(capacity: usize) -> Conn<S> {
        Conn {
            sock: None,
            input: Input::new(capacity),
            out: OutBuf::new(capacity),
            sendfile: None,
        }
    }

    pub(crate) fn reset_request(&mut self) {
        self.input.reset();
        self.out.clear();
        self.sendfile = None;
    }
}

#[cfg(not(unix))]
impl<S: Socket> Conn<S> {
    pub(crate) fn new(capacity: usize) -> Conn<S> {
        Conn {
            sock: None,
            input: Input::new(capacity),
            out: OutBuf::new(capacity),
        }
    }

    pub(crate) fn reset_request(&mut self) {
        self.input.reset();
        self.out.clear();
    }
}
