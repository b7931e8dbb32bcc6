//! The HTTP/1.1 server core.
//!
//! An [`Httpd`] owns a fixed pool of connection records and drives each
//! accepted connection through its state machine as the embedder's event
//! loop reports readiness: [`accept_ready`] on the listener,
//! [`read_ready`]/[`write_ready`] per connection, and [`tick`] for
//! per-state timeouts. Parsed request artifacts are dispatched to the
//! application through the [`Handler`] event vocabulary, and the
//! application answers through the `response_*` operations on
//! [`Request`].
//!
//! Everything runs on the caller's thread; handlers run to completion
//! before the next event is processed.
//!
//! [`accept_ready`]: Httpd::accept_ready
//! [`read_ready`]: Httpd::read_ready
//! [`write_ready`]: Httpd::write_ready
//! [`tick`]: Httpd::tick

use std::io;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tracing::{debug, trace};

use crate::error::Error;
use crate::proto::message::{HeaderSpan, LineElement, Parse, Span};
use crate::rt::{Listen, Socket};
use crate::Result;

mod conn;
mod handler;
pub mod pool;
mod request;

pub use self::conn::ConnState;
#[cfg(unix)]
pub use self::conn::SendfileDone;
pub use self::handler::Handler;
pub use self::request::Request;

use self::conn::{Conn, Input};
use self::pool::{Pool, Timeouts};

/// Default capacity of the per-connection receive and response-header
/// buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

const DEFAULT_POOL_CAPACITY: usize = 64;
const DEFAULT_MAX_HEADERS: usize = 100;
const DEFAULT_SERVER_NAME: &str = "sxe-httpd/1.0";

/// Written straight to a just-accepted socket when the pool has nothing
/// left to reap.
const SERVICE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service unavailable\r\nConnection: close\r\n\r\n";

pub(crate) struct Config {
    pub(crate) buffer_capacity: usize,
    pub(crate) max_headers: usize,
    pub(crate) server_name: String,
}

/// Configures and constructs an [`Httpd`].
///
/// ```
/// use sxe_httpd::server::Builder;
/// use std::time::Duration;
///
/// let builder = Builder::new()
///     .pool_capacity(128)
///     .idle_timeout(Some(Duration::from_secs(30)));
/// ```
pub struct Builder {
    pool_capacity: usize,
    buffer_capacity: usize,
    max_headers: usize,
    timeouts: Timeouts,
    server_name: String,
}

impl Builder {
    pub fn new() -> Builder {
        let mut timeouts: Timeouts = [None; ConnState::COUNT];
        timeouts[ConnState::Idle.index()] = Some(Duration::from_secs(60));
        timeouts[ConnState::ReqLine.index()] = Some(Duration::from_secs(2));
        timeouts[ConnState::ReqHeaders.index()] = Some(Duration::from_secs(30));

        Builder {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_headers: DEFAULT_MAX_HEADERS,
            timeouts,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
        }
    }

    /// How many connections can be handled concurrently.
    pub fn pool_capacity(mut self, capacity: usize) -> Builder {
        assert!(capacity > 0, "pool capacity must be non-zero");
        self.pool_capacity = capacity;
        self
    }

    /// Capacity of each connection's receive buffer and response-header
    /// buffer. Bounds the request line plus headers of a single request.
    pub fn buffer_capacity(mut self, capacity: usize) -> Builder {
        assert!(capacity >= 64, "buffer capacity is impractically small");
        self.buffer_capacity = capacity;
        self
    }

    /// How many headers a single request or response may carry.
    pub fn max_headers(mut self, max: usize) -> Builder {
        assert!(max > 0, "at least one header must be allowed");
        self.max_headers = max;
        self
    }

    /// The value advertised in the `Server` header of internal error
    /// responses.
    pub fn server_name<T: Into<String>>(mut self, name: T) -> Builder {
        self.server_name = name.into();
        self
    }

    /// Timeout for connections sitting in `Idle`; default 60 seconds.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Builder {
        self.timeouts[ConnState::Idle.index()] = timeout;
        self
    }

    /// Timeout for receiving the request line; default 2 seconds.
    pub fn request_line_timeout(mut self, timeout: Option<Duration>) -> Builder {
        self.timeouts[ConnState::ReqLine.index()] = timeout;
        self
    }

    /// Timeout for receiving the header block; default 30 seconds.
    pub fn headers_timeout(mut self, timeout: Option<Duration>) -> Builder {
        self.timeouts[ConnState::ReqHeaders.index()] = timeout;
        self
    }

    /// Timeout for the request body; disabled by default, as progress is
    /// driven by the application.
    pub fn body_timeout(mut self, timeout: Option<Duration>) -> Builder {
        self.timeouts[ConnState::ReqBody.index()] = timeout;
        self
    }

    /// Timeout for the response phase; disabled by default.
    pub fn response_timeout(mut self, timeout: Option<Duration>) -> Builder {
        self.timeouts[ConnState::ReqResponse.index()] = timeout;
        self
    }

    pub fn build<L, H>(self, handler: H) -> Httpd<L, H>
    where
        L: Listen,
        H: Handler<L::Socket>,
    {
        let now = Instant::now();
        let conns = (0..self.pool_capacity)
            .map(|_| Conn::new(self.buffer_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Httpd {
            listener: None,
            pool: Pool::new(self.pool_capacity, self.timeouts, now),
            conns,
            handler,
            config: Config {
                buffer_capacity: self.buffer_capacity,
                max_headers: self.max_headers,
                server_name: self.server_name,
            },
            scratch: vec![0u8; self.buffer_capacity].into_boxed_slice(),
            event_buf: Vec::new(),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

/// How far one processing step got.
enum Step {
    Advanced,
    NeedMore,
    Stop,
}

enum LineStep {
    Complete,
    NeedMore,
    Bad,
}

enum HeaderStep {
    Header(HeaderSpan),
    Discard(usize),
    Partial,
    End(usize),
    Bad,
}

enum Recv {
    Data(usize),
    Closed,
    Blocked,
    Failed,
}

/// The server core. See the [module docs](self).
pub struct Httpd<L: Listen, H: Handler<L::Socket>> {
    listener: Option<L>,
    pool: Pool,
    conns: Box<[Conn<L::Socket>]>,
    handler: H,
    config: Config,
    /// Staging area for body chunks and sink-mode reads.
    scratch: Box<[u8]>,
    /// Staging area for event arguments, so handler slices never alias
    /// the connection record the handler mutates.
    event_buf: Vec<u8>,
}

impl<H: Handler<crate::rt::TcpStream>> Httpd<crate::rt::TcpListener, H> {
    /// Binds a TCP listener and attaches it. The address is a dotted quad
    /// or `"INADDR_ANY"`; port 0 picks an ephemeral port, reported in the
    /// returned address.
    pub fn listen(&mut self, address: &str, port: u16) -> Result<std::net::SocketAddr> {
        let listener = crate::rt::TcpListener::bind(address, port)?;
        let addr = listener.local_addr()?;
        self.attach(listener)?;
        Ok(addr)
    }
}

#[cfg(unix)]
impl<H: Handler<crate::rt::UnixStream>> Httpd<crate::rt::UnixListener, H> {
    /// Binds a Unix-domain listener at `path` and attaches it.
    pub fn listen_pipe<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        let listener = crate::rt::UnixListener::bind(path)?;
        self.attach(listener)
    }
}

impl<L: Listen, H: Handler<L::Socket>> Httpd<L, H> {
    /// Attaches an already-bound listener. At most one listener per
    /// server; a second attach fails with `AlreadyConnected`.
    pub fn attach(&mut self, listener: L) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::new_already_connected());
        }
        self.listener = Some(listener);
        Ok(())
    }

    /// The attached listener, for reactor registration.
    pub fn listener(&self) -> Option<&L> {
        self.listener.as_ref()
    }

    /// The socket of a live connection, for reactor registration. `None`
    /// for `Free` records.
    pub fn socket(&self, index: usize) -> Option<&L::Socket> {
        self.conns.get(index).and_then(|c| c.sock.as_ref())
    }

    /// Number of records currently in `state`.
    pub fn connections(&self, state: ConnState) -> usize {
        self.pool.count(state)
    }

    /// The pool capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Stops accepting and closes every live connection, surfacing each
    /// through the close event.
    pub fn close(&mut self, now: Instant) {
        debug!("server closing");
        self.listener = None;
        for index in 0..self.conns.len() {
            if self.pool.state(index) != ConnState::Free {
                self.close_conn(index, now);
            }
        }
    }

    /// Drives per-state timeouts; call at the embedder's timer cadence.
    /// Each expired connection is surfaced through the close event and
    /// freed.
    pub fn tick(&mut self, now: Instant) {
        while let Some((index, state)) = self.pool.next_expired(now) {
            debug!("connection {} timed out in state {:?}", index, state);
            self.close_conn(index, now);
        }
    }

    /// Runs `f` with the request view of a live connection, outside any
    /// handler event. This is how an application finishes a response it
    /// deferred from [`Handler::respond`], for example once an upstream
    /// it was waiting on has answered. Returns `None` for `Free` records.
    pub fn with_connection<F, R>(&mut self, index: usize, now: Instant, f: F) -> Option<R>
    where
        F: FnOnce(&mut Request<'_, L::Socket>) -> R,
    {
        if self.pool.state(index) == ConnState::Free {
            return None;
        }
        let result = {
            let Httpd {
                conns,
                pool,
                config,
                ..
            } = self;
            let mut req = Request::new(&mut conns[index], pool, index, config, now);
            f(&mut req)
        };
        self.after_events(index);
        Some(result)
    }

    /// The listener is readable: accept until it would block.
    pub fn accept_ready(&mut self, now: Instant) {
        loop {
            let sock = {
                let listener = match self.listener.as_mut() {
                    Some(listener) => listener,
                    None => return,
                };
                match listener.accept() {
                    Ok(Some(sock)) => sock,
                    Ok(None) => return,
                    Err(e) => {
                        debug!("accept failed: {}", e);
                        return;
                    }
                }
            };
            self.admit(sock, now);
        }
    }

    fn admit(&mut self, mut sock: L::Socket, now: Instant) {
        let index = match self.pool.take_oldest(ConnState::Free, ConnState::Idle, now) {
            Some(index) => index,
            None => match self.pool.oldest(ConnState::Idle) {
                Some(victim) => {
                    debug!("pool exhausted, reaping idle connection {}", victim);
                    self.close_conn(victim, now);
                    self.pool
                        .take_oldest(ConnState::Free, ConnState::Idle, now)
                        .expect("reaped connection is free")
                }
                None => {
                    debug!("pool exhausted with nothing to reap, answering 503");
                    send_raw(&mut sock, SERVICE_UNAVAILABLE);
                    sock.shutdown();
                    return;
                }
            },
        };

        let conn = &mut self.conns[index];
        conn.reset_request();
        conn.sock = Some(sock);
        trace!("connection {} accepted", index);

        let Httpd {
            handler,
            conns,
            pool,
            config,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        handler.connect(&mut req);
        drop(req);
        self.after_events(index);
    }

    /// A connection is readable: pull bytes and run the state machine.
    pub fn read_ready(&mut self, index: usize, now: Instant) {
        loop {
            match self.pool.state(index) {
                ConnState::Free => return,
                ConnState::Idle | ConnState::ReqLine | ConnState::ReqHeaders => {
                    let cap = self.config.buffer_capacity;
                    if self.conns[index].input.len < cap {
                        let conn = &mut self.conns[index];
                        let len = conn.input.len;
                        let sock = conn.sock.as_mut().expect("live connection has a socket");
                        match sock.recv(&mut conn.input.buf[len..cap]) {
                            Ok(0) => {
                                trace!("connection {} closed by peer", index);
                                self.close_conn(index, now);
                                return;
                            }
                            Ok(n) => conn.input.len += n,
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                            Err(e) => {
                                debug!("recv failed on {}: {}", index, e);
                                self.close_conn(index, now);
                                return;
                            }
                        }
                    }
                    if self.pool.state(index) == ConnState::Idle {
                        trace!("connection {}: Idle -> ReqLine", index);
                        self.pool
                            .set_state(index, ConnState::Idle, ConnState::ReqLine, now);
                    }
                    match self.process_head(index, now) {
                        Step::Advanced | Step::NeedMore => {}
                        Step::Stop => return,
                    }
                }
                ConnState::ReqBody => {
                    if !self.read_body(index, now) {
                        return;
                    }
                }
                ConnState::ReqResponse => {
                    if !self.drain_response_data(index, now) {
                        return;
                    }
                }
            }
        }
    }

    /// A connection is writable again: resume an in-flight sendfile.
    #[cfg(unix)]
    pub fn write_ready(&mut self, index: usize, now: Instant) {
        if self.pool.state(index) == ConnState::Free {
            return;
        }
        let mut op = match self.conns[index].sendfile.take() {
            Some(op) => op,
            None => return,
        };

        let result = loop {
            if op.remaining == 0 {
                break Ok(());
            }
            let conn = &mut self.conns[index];
            let sock = conn.sock.as_mut().expect("live connection has a socket");
            match sock.sendfile(op.fd, op.remaining) {
                Ok(0) => break Err(Error::new_no_connection()),
                Ok(n) => op.remaining -= n.min(op.remaining),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!("sendfile still blocked, {} bytes remaining", op.remaining);
                    self.conns[index].sendfile = Some(op);
                    return;
                }
                Err(e) => break Err(e.into()),
            }
        };

        let done = op.done.take().expect("sendfile completion present");
        let Httpd {
            conns,
            pool,
            config,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        done(&mut req, result);
        drop(req);
        self.after_events(index);
    }

    /// A connection is writable again. Without sendfile support this is a
    /// no-op: ordinary writes are never buffered by the core.
    #[cfg(not(unix))]
    pub fn write_ready(&mut self, _index: usize, _now: Instant) {}

    fn process_head(&mut self, index: usize, now: Instant) -> Step {
        loop {
            match self.pool.state(index) {
                ConnState::ReqLine => match self.advance_request_line(index, now) {
                    Step::Advanced => {}
                    other => return other,
                },
                ConnState::ReqHeaders => match self.advance_headers(index, now) {
                    Step::Advanced => {}
                    other => return other,
                },
                _ => return Step::Advanced,
            }
        }
    }

    fn advance_request_line(&mut self, index: usize, now: Instant) -> Step {
        match line_step(&mut self.conns[index].input) {
            LineStep::Complete => {
                self.fire_request(index, now);
                if self.pool.state(index) == ConnState::ReqLine {
                    self.pool
                        .set_state(index, ConnState::ReqLine, ConnState::ReqHeaders, now);
                }
                Step::Advanced
            }
            LineStep::NeedMore => {
                if self.conns[index].input.len >= self.config.buffer_capacity {
                    self.error_close(index, now, StatusCode::URI_TOO_LONG, "Request-URI too large");
                    return Step::Stop;
                }
                Step::NeedMore
            }
            LineStep::Bad => {
                self.error_close(index, now, StatusCode::BAD_REQUEST, "Bad request");
                Step::Stop
            }
        }
    }

    fn advance_headers(&mut self, index: usize, now: Instant) -> Step {
        loop {
            match header_step(&mut self.conns[index].input) {
                HeaderStep::Header(h) => {
                    let base = self.conns[index].input.parse_base;
                    let header = HeaderSpan {
                        name: Span {
                            off: h.name.off + base,
                            len: h.name.len,
                        },
                        value: Span {
                            off: h.value.off + base,
                            len: h.value.len,
                        },
                    };
                    if let Err(step) = self.record_header(index, now, header) {
                        return step;
                    }
                    if self.pool.state(index) != ConnState::ReqHeaders {
                        return Step::Advanced;
                    }
                }
                HeaderStep::Discard(skip) => {
                    let input = &mut self.conns[index].input;
                    let base = input.parse_base;
                    trace!("discarding {} bytes of ignored header line", skip);
                    input.buf.copy_within(base + skip..input.len, base);
                    input.len -= skip;
                }
                HeaderStep::Partial => {
                    let cap = self.config.buffer_capacity;
                    if self.conns[index].input.len < cap {
                        return Step::NeedMore;
                    }
                    let line_start = {
                        let input = &self.conns[index].input;
                        input.parse_base + input.parser.pos()
                    };
                    if line_start >= cap / 2 {
                        self.error_close(
                            index,
                            now,
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "Request entity too large",
                        );
                        return Step::Stop;
                    }
                    // A single header line has eaten the rest of the
                    // buffer; skip the line and keep what was parsed.
                    debug!("header line at offset {} cannot fit, ignoring it", line_start);
                    let input = &mut self.conns[index].input;
                    let consumed = input.parser.consume_parsed_headers();
                    input.parse_base += consumed;
                    input.len = input.parse_base;
                    input.parser.set_ignore_line();
                    return Step::NeedMore;
                }
                HeaderStep::End(rel) => {
                    let eoh = self.conns[index].input.parse_base + rel;
                    return self.finish_headers(index, now, eoh);
                }
                HeaderStep::Bad => {
                    self.error_close(index, now, StatusCode::BAD_REQUEST, "Bad request");
                    return Step::Stop;
                }
            }
        }
    }

    fn record_header(
        &mut self,
        index: usize,
        now: Instant,
        header: HeaderSpan,
    ) -> std::result::Result<(), Step> {
        enum Verdict {
            Fine,
            TooMany,
            DuplicateLength,
            BadLength,
        }

        let verdict = {
            let input = &mut self.conns[index].input;
            if input.headers.len() >= self.config.max_headers {
                Verdict::TooMany
            } else {
                input.headers.push(header);
                let name = header.name.slice(&input.buf);
                if name.eq_ignore_ascii_case(b"Content-Length") {
                    if input.saw_content_length {
                        Verdict::DuplicateLength
                    } else {
                        input.saw_content_length = true;
                        match parse_decimal(header.value.slice(&input.buf)) {
                            Some(n) => {
                                input.content_length = n;
                                Verdict::Fine
                            }
                            None => Verdict::BadLength,
                        }
                    }
                } else {
                    Verdict::Fine
                }
            }
        };

        match verdict {
            Verdict::Fine => {
                self.fire_header(index, now, header);
                Ok(())
            }
            Verdict::TooMany => {
                debug!("too many headers in one request");
                self.error_close(
                    index,
                    now,
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request entity too large",
                );
                Err(Step::Stop)
            }
            Verdict::DuplicateLength => {
                debug!("duplicate Content-Length header");
                self.error_close(index, now, StatusCode::BAD_REQUEST, "Bad request");
                Err(Step::Stop)
            }
            Verdict::BadLength => {
                debug!("malformed Content-Length header");
                self.error_close(index, now, StatusCode::BAD_REQUEST, "Bad request");
                Err(Step::Stop)
            }
        }
    }

    fn finish_headers(&mut self, index: usize, now: Instant, eoh: usize) -> Step {
        trace!("end of headers at offset {}", eoh);
        debug_assert!(eoh >= self.conns[index].input.line.headers_off);
        self.fire_headers_end(index, now);
        if self.pool.state(index) != ConnState::ReqHeaders {
            return Step::Advanced;
        }
        self.pool
            .set_state(index, ConnState::ReqHeaders, ConnState::ReqBody, now);

        // Whatever followed the header block is the first piece of the
        // body; the buffer keeps only the prefix up to end-of-headers.
        let deliver = {
            let Httpd { conns, scratch, .. } = self;
            let input = &mut conns[index].input;
            input.content_seen = 0;
            let avail = (input.len - eoh) as u64;
            let deliver = avail.min(input.content_length) as usize;
            scratch[..deliver].copy_from_slice(&input.buf[eoh..eoh + deliver]);
            input.len = eoh;
            deliver
        };
        if deliver > 0 {
            self.fire_body(index, now, deliver);
            if self.pool.state(index) != ConnState::ReqBody {
                return Step::Advanced;
            }
        }

        let input = &self.conns[index].input;
        if input.content_seen >= input.content_length {
            self.enter_respond(index, now);
        }
        Step::Advanced
    }

    fn read_body(&mut self, index: usize, now: Instant) -> bool {
        let read = self.recv_into_scratch(index);
        match read {
            Recv::Closed | Recv::Failed => {
                self.close_conn(index, now);
                false
            }
            Recv::Blocked => false,
            Recv::Data(n) => {
                let (deliver, surplus) = {
                    let input = &self.conns[index].input;
                    let remaining = input.content_length - input.content_seen;
                    let deliver = (n as u64).min(remaining) as usize;
                    (deliver, n - deliver)
                };
                if surplus > 0 {
                    trace!("discarding {} bytes past the request body", surplus);
                }
                if deliver > 0 {
                    self.fire_body(index, now, deliver);
                    if self.pool.state(index) != ConnState::ReqBody {
                        return true;
                    }
                }
                let input = &self.conns[index].input;
                if input.content_seen >= input.content_length {
                    self.enter_respond(index, now);
                }
                true
            }
        }
    }

    fn drain_response_data(&mut self, index: usize, now: Instant) -> bool {
        match self.recv_into_scratch(index) {
            Recv::Closed | Recv::Failed => {
                self.close_conn(index, now);
                false
            }
            Recv::Blocked => false,
            Recv::Data(n) => {
                trace!("sink mode: discarding {} bytes", n);
                true
            }
        }
    }

    fn recv_into_scratch(&mut self, index: usize) -> Recv {
        let Httpd { conns, scratch, .. } = self;
        let conn = &mut conns[index];
        let sock = conn.sock.as_mut().expect("live connection has a socket");
        match sock.recv(scratch) {
            Ok(0) => Recv::Closed,
            Ok(n) => Recv::Data(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Recv::Blocked,
            Err(e) => {
                debug!("recv failed on {}: {}", index, e);
                Recv::Failed
            }
        }
    }

    fn enter_respond(&mut self, index: usize, now: Instant) {
        trace!("connection {}: request complete, responding", index);
        self.pool
            .set_state(index, ConnState::ReqBody, ConnState::ReqResponse, now);
        let Httpd {
            handler,
            conns,
            pool,
            config,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        handler.respond(&mut req);
        drop(req);
        self.after_events(index);
    }

    fn fire_request(&mut self, index: usize, now: Instant) {
        self.event_buf.clear();
        let url_len;
        let method;
        {
            let Httpd {
                conns, event_buf, ..
            } = self;
            let input = &conns[index].input;
            let buf = &input.buf[..input.len];
            let url = input.line.url.map(|s| s.slice(buf)).unwrap_or(b"");
            let version = input.line.version.map(|s| s.slice(buf)).unwrap_or(b"");
            event_buf.extend_from_slice(url);
            url_len = url.len();
            event_buf.extend_from_slice(version);
            method = input.line.method.clone().expect("request line parsed");
        }

        let Httpd {
            handler,
            conns,
            pool,
            config,
            event_buf,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        let (url, version) = event_buf[..].split_at(url_len);
        handler.request(&mut req, &method, url, version);
        drop(req);
        self.after_events(index);
    }

    fn fire_header(&mut self, index: usize, now: Instant, header: HeaderSpan) {
        self.event_buf.clear();
        let name_len = header.name.len;
        {
            let Httpd {
                conns, event_buf, ..
            } = self;
            let input = &conns[index].input;
            event_buf.extend_from_slice(header.name.slice(&input.buf));
            event_buf.extend_from_slice(header.value.slice(&input.buf));
        }

        let Httpd {
            handler,
            conns,
            pool,
            config,
            event_buf,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        let (name, value) = event_buf[..].split_at(name_len);
        handler.header(&mut req, name, value);
        drop(req);
        self.after_events(index);
    }

    fn fire_headers_end(&mut self, index: usize, now: Instant) {
        let Httpd {
            handler,
            conns,
            pool,
            config,
            ..
        } = self;
        let mut req = Request::new(&mut conns[index], pool, index, config, now);
        handler.headers_end(&mut req);
        drop(req);
        self.after_events(index);
    }

    /// Delivers the chunk staged in `scratch[..len]` and accounts for it.
    fn fire_body(&mut self, index: usize, now: Instant, len: usize) {
        {
            let Httpd {
                handler,
                conns,
                pool,
                config,
                scratch,
                ..
            } = self;
            let mut req = Request::new(&mut conns[index], pool, index, config, now);
            handler.body(&mut req, &scratch[..len]);
        }
        self.conns[index].input.content_seen += len as u64;
        self.after_events(index);
    }

    /// Applies what a handler did to the record: keep-alive resets the
    /// request state, a freed record gets its socket dropped.
    fn after_events(&mut self, index: usize) {
        match self.pool.state(index) {
            ConnState::Idle => self.conns[index].reset_request(),
            ConnState::Free => self.finish_close(index),
            _ => {}
        }
    }

    /// Surfaces a dying connection through the close event, then frees it.
    fn close_conn(&mut self, index: usize, now: Instant) {
        let state = self.pool.state(index);
        if state == ConnState::Free {
            return;
        }
        trace!("closing connection {} in state {:?}", index, state);
        {
            let Httpd {
                handler,
                conns,
                pool,
                config,
                ..
            } = self;
            let mut req = Request::new(&mut conns[index], pool, index, config, now);
            handler.close(&mut req);
        }
        let state = self.pool.state(index);
        if state != ConnState::Free {
            self.pool.set_state(index, state, ConnState::Free, now);
        }
        self.finish_close(index);
    }

    fn finish_close(&mut self, index: usize) {
        let conn = &mut self.conns[index];
        if let Some(mut sock) = conn.sock.take() {
            sock.shutdown();
        }
        conn.reset_request();
    }

    /// Answers a malformed or oversized request and closes the connection.
    fn error_close(&mut self, index: usize, now: Instant, code: StatusCode, reason: &str) {
        debug!("rejecting request: {} {}", code.as_u16(), reason);
        let mut body = Vec::with_capacity(24 + reason.len());
        body.extend_from_slice(b"<html>");
        let mut digits = itoa::Buffer::new();
        body.extend_from_slice(digits.format(code.as_u16()).as_bytes());
        body.push(b' ');
        body.extend_from_slice(reason.as_bytes());
        body.extend_from_slice(b"</html>\r\n");

        {
            let Httpd {
                conns,
                pool,
                config,
                ..
            } = self;
            let conn = &mut conns[index];
            conn.out.clear();
            let mut req = Request::new(conn, pool, index, config, now);
            let _ = req.set_header_out("Server", config.server_name.as_bytes());
            let _ = req.set_header_out("Connection", b"close");
            let _ = req.set_header_out("Content-Type", b"text/html; charset=\"UTF-8\"");
            let _ = req.response_simple(code, reason, &body);
            req.response_close();
        }
        self.finish_close(index);
    }
}

fn send_raw<S: Socket>(sock: &mut S, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        match sock.send(bytes) {
            Ok(0) => return,
            Ok(n) => bytes = &bytes[n..],
            Err(_) => return,
        }
    }
}

fn known_method(token: &[u8]) -> Option<Method> {
    match token {
        b"GET" => Some(Method::GET),
        b"HEAD" => Some(Method::HEAD),
        b"PUT" => Some(Method::PUT),
        b"POST" => Some(Method::POST),
        b"DELETE" => Some(Method::DELETE),
        _ => None,
    }
}

fn parse_decimal(value: &[u8]) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(n)
}

/// Pulls as much of the request line as the buffer allows.
fn line_step(input: &mut Input) -> LineStep {
    let Input {
        buf,
        len,
        parser,
        line,
        ..
    } = input;
    parser.grow(*len);
    let buf: &[u8] = &buf[..];

    loop {
        if line.method.is_none() {
            match parser.next_line_element(buf, LineElement::Token) {
                Ok(Parse::Complete(span)) => match known_method(span.slice(buf)) {
                    Some(method) => line.method = Some(method),
                    None => return LineStep::Bad,
                },
                Ok(Parse::Partial) => return LineStep::NeedMore,
                Ok(Parse::End) | Err(_) => return LineStep::Bad,
            }
        } else if line.url.is_none() {
            match parser.next_line_element(buf, LineElement::Token) {
                Ok(Parse::Complete(span)) => line.url = Some(span),
                Ok(Parse::Partial) => return LineStep::NeedMore,
                Ok(Parse::End) | Err(_) => return LineStep::Bad,
            }
        } else {
            return match parser.next_line_element(buf, LineElement::EndOfLine) {
                Ok(Parse::Complete(mut span)) => {
                    // The header block starts just past the line's CRLF.
                    line.headers_off = span.off + span.len + 2;
                    while span.len > 0 && matches!(buf[span.off + span.len - 1], b' ' | b'\t') {
                        span.len -= 1;
                    }
                    if !matches!(span.slice(buf), b"HTTP/1.1" | b"HTTP/1.0") {
                        return LineStep::Bad;
                    }
                    line.version = Some(span);
                    LineStep::Complete
                }
                Ok(Parse::Partial) => LineStep::NeedMore,
                Ok(Parse::End) | Err(_) => LineStep::Bad,
            };
        }
    }
}

/// Pulls the next header (or ignore-mode progress) out of the buffer.
fn header_step(input: &mut Input) -> HeaderStep {
    let Input {
        buf,
        len,
        parser,
        parse_base,
        ..
    } = input;
    parser.grow(*len - *parse_base);
    let view: &[u8] = &buf[*parse_base..];

    match parser.next_header(view) {
        Ok(Parse::Complete(h)) => HeaderStep::Header(h),
        Ok(Parse::Partial) => {
            if parser.ignore_len() > 0 {
                HeaderStep::Discard(parser.ignore_len())
            } else {
                HeaderStep::Partial
            }
        }
        Ok(Parse::End) => HeaderStep::End(parser.pos()),
        Err(_) => HeaderStep::Bad,
    }
}
