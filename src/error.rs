//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type often returned from methods that can have `sxe-httpd` errors.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while driving an HTTP connection.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// The operation could not complete without blocking; the caller should
    /// retry when the transport signals readiness.
    WouldBlock,
    /// The peer is gone (connection reset, broken pipe, or write of zero).
    NoConnection,
    /// A listener is already attached to this server.
    AlreadyConnected,
    /// A malformed message was received.
    BadMessage,
    /// The listen address is already in use.
    AddressInUse,
    /// A listener address could not be parsed.
    InvalidUri,
    /// An output buffer or pool element could not be acquired.
    NoUnusedElements,
    /// Binding or accepting on a listener failed.
    Listen,
    /// An `io::Error` from the transport.
    Io,
    /// An internal invariant was violated.
    Internal,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_would_block() -> Error {
        Error::new(Kind::WouldBlock)
    }

    pub(crate) fn new_no_connection() -> Error {
        Error::new(Kind::NoConnection)
    }

    pub(crate) fn new_already_connected() -> Error {
        Error::new(Kind::AlreadyConnected)
    }

    pub(crate) fn new_bad_message(detail: &'static str) -> Error {
        Error::new(Kind::BadMessage).with(detail)
    }

    pub(crate) fn new_address_in_use() -> Error {
        Error::new(Kind::AddressInUse)
    }

    pub(crate) fn new_invalid_uri() -> Error {
        Error::new(Kind::InvalidUri)
    }

    pub(crate) fn new_no_unused_elements() -> Error {
        Error::new(Kind::NoUnusedElements)
    }

    pub(crate) fn new_listen(cause: io::Error) -> Error {
        Error::new(Kind::Listen).with(cause)
    }

    pub(crate) fn new_io(cause: io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    #[allow(unused)]
    pub(crate) fn new_internal(detail: &'static str) -> Error {
        Error::new(Kind::Internal).with(detail)
    }

    /// Returns true if the operation would have blocked.
    pub fn is_would_block(&self) -> bool {
        matches!(self.inner.kind, Kind::WouldBlock)
    }

    /// Returns true if the peer connection is gone.
    pub fn is_no_connection(&self) -> bool {
        matches!(self.inner.kind, Kind::NoConnection)
    }

    /// Returns true if a listener was already attached.
    pub fn is_already_connected(&self) -> bool {
        matches!(self.inner.kind, Kind::AlreadyConnected)
    }

    /// Returns true if a malformed message was received.
    pub fn is_bad_message(&self) -> bool {
        matches!(self.inner.kind, Kind::BadMessage)
    }

    /// Returns true if the listen address was in use.
    pub fn is_address_in_use(&self) -> bool {
        matches!(self.inner.kind, Kind::AddressInUse)
    }

    /// Returns true if an output buffer or pool element was exhausted.
    pub fn is_no_unused_elements(&self) -> bool {
        matches!(self.inner.kind, Kind::NoUnusedElements)
    }

    /// Returns true if this error came from the listener.
    pub fn is_listen(&self) -> bool {
        matches!(self.inner.kind, Kind::Listen)
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Cause> {
        self.inner.cause
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::WouldBlock => "operation would block",
            Kind::NoConnection => "connection is gone",
            Kind::AlreadyConnected => "listener already attached",
            Kind::BadMessage => "invalid message",
            Kind::AddressInUse => "address in use",
            Kind::InvalidUri => "invalid listener address",
            Kind::NoUnusedElements => "out of buffers or pool elements",
            Kind::Listen => "listener error",
            Kind::Io => "transport error",
            Kind::Internal => "internal error",
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::new_would_block(),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::new_no_connection(),
            io::ErrorKind::AddrInUse => Error::new_address_in_use(),
            _ => Error::new_io(err),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("sxe_httpd::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
