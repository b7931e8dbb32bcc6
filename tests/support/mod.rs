//! In-memory transport and event recorder for driving the server without
//! real sockets or a reactor.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use sxe_httpd::rt::{Listen, Socket};
use sxe_httpd::{Handler, Method, Request, StatusCode};

#[derive(Default)]
pub struct StreamState {
    /// Scripted inbound chunks; `recv` consumes at most one per call.
    input: VecDeque<Vec<u8>>,
    /// Remainder of a chunk that did not fit the last `recv` buffer.
    carry: Vec<u8>,
    output: Vec<u8>,
    peer_closed: bool,
    reset: bool,
    block_writes: bool,
    shutdowns: usize,
}

/// A scriptable in-memory stream. Clones share state, so a test keeps one
/// handle while the server owns the other.
#[derive(Clone, Default)]
pub struct MockStream(Rc<RefCell<StreamState>>);

impl MockStream {
    pub fn new() -> MockStream {
        MockStream::default()
    }

    /// Queues bytes for the server to read.
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().input.push_back(bytes.to_vec());
    }

    /// After the scripted input drains, `recv` reports end-of-stream
    /// instead of would-block.
    pub fn close_peer(&self) {
        self.0.borrow_mut().peer_closed = true;
    }

    /// Makes every transport operation fail with `ECONNRESET`.
    pub fn reset(&self) {
        self.0.borrow_mut().reset = true;
    }

    /// Makes writes (and sendfile) report would-block.
    pub fn set_block_writes(&self, block: bool) {
        self.0.borrow_mut().block_writes = block;
    }

    pub fn output(&self) -> Vec<u8> {
        self.0.borrow().output.clone()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().output)
    }

    pub fn shutdowns(&self) -> usize {
        self.0.borrow().shutdowns
    }
}

impl Socket for MockStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if state.reset {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        let chunk = if !state.carry.is_empty() {
            std::mem::take(&mut state.carry)
        } else {
            match state.input.pop_front() {
                Some(chunk) => chunk,
                None if state.peer_closed => return Ok(0),
                None => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.carry = chunk[n..].to_vec();
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if state.reset {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        if state.block_writes {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        state.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[cfg(unix)]
    fn sendfile(&mut self, fd: std::os::unix::io::RawFd, len: usize) -> io::Result<usize> {
        use std::fs::File;
        use std::io::Read;
        use std::mem::ManuallyDrop;
        use std::os::unix::io::FromRawFd;

        {
            let state = self.0.borrow();
            if state.reset {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            if state.block_writes {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
        }

        // Borrow the fd without adopting it; the file's offset advances
        // like the real syscall's would.
        let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(fd) });
        let mut chunk = vec![0u8; len.min(4096)];
        let n = file.read(&mut chunk)?;
        self.0.borrow_mut().output.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn shutdown(&mut self) {
        self.0.borrow_mut().shutdowns += 1;
    }
}

/// A listener whose pending connections the test enqueues by hand.
#[derive(Clone, Default)]
pub struct MockListener(Rc<RefCell<VecDeque<MockStream>>>);

impl MockListener {
    pub fn new() -> MockListener {
        MockListener::default()
    }

    /// Creates a client connection and queues its server end for accept.
    pub fn connect(&self) -> MockStream {
        let stream = MockStream::new();
        self.0.borrow_mut().push_back(stream.clone());
        stream
    }
}

impl Listen for MockListener {
    type Socket = MockStream;

    fn accept(&mut self) -> io::Result<Option<MockStream>> {
        Ok(self.0.borrow_mut().pop_front())
    }
}

/// Everything the server told the application, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    Request(String, String, String),
    Header(String, String),
    HeadersEnd,
    Body(Vec<u8>),
    Respond,
    Close,
}

pub type Events = Rc<RefCell<Vec<Event>>>;

pub fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Best-effort tracing setup; `RUST_LOG=sxe_httpd=trace` shows the
/// server's state transitions while a test runs.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records every event and delegates `respond` to a scripted closure.
pub struct Recorder {
    pub events: Events,
    on_respond: Box<dyn FnMut(&mut Request<'_, MockStream>)>,
}

impl Recorder {
    /// Responds `200 OK` with an empty body.
    pub fn new() -> (Recorder, Events) {
        Recorder::with_respond(|req| {
            let _ = req.response_simple(StatusCode::OK, "OK", b"");
        })
    }

    pub fn with_respond<F>(on_respond: F) -> (Recorder, Events)
    where
        F: FnMut(&mut Request<'_, MockStream>) + 'static,
    {
        let events: Events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: events.clone(),
            on_respond: Box::new(on_respond),
        };
        (recorder, events)
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Handler<MockStream> for Recorder {
    fn connect(&mut self, _req: &mut Request<'_, MockStream>) {
        self.push(Event::Connect);
    }

    fn request(
        &mut self,
        _req: &mut Request<'_, MockStream>,
        method: &Method,
        url: &[u8],
        version: &[u8],
    ) {
        self.push(Event::Request(
            method.to_string(),
            lossy(url),
            lossy(version),
        ));
    }

    fn header(&mut self, _req: &mut Request<'_, MockStream>, name: &[u8], value: &[u8]) {
        self.push(Event::Header(lossy(name), lossy(value)));
    }

    fn headers_end(&mut self, _req: &mut Request<'_, MockStream>) {
        self.push(Event::HeadersEnd);
    }

    fn body(&mut self, _req: &mut Request<'_, MockStream>, chunk: &[u8]) {
        self.push(Event::Body(chunk.to_vec()));
    }

    fn respond(&mut self, req: &mut Request<'_, MockStream>) {
        self.push(Event::Respond);
        (self.on_respond)(req);
    }

    fn close(&mut self, _req: &mut Request<'_, MockStream>) {
        self.push(Event::Close);
    }
}
