//! The application-facing event vocabulary.

use http::Method;

use super::request::Request;
use crate::rt::Socket;

/// Receives the events of a connection's lifecycle.
///
/// Within one connection the invocations are strictly ordered: `connect`,
/// then for each request `request`, `header` for every parsed header,
/// `headers_end`, `body` for each body chunk, `respond`, and finally
/// `close` when the connection goes away. Every method except [`respond`]
/// has a default empty implementation.
///
/// Handlers must not block; all I/O they trigger goes through the
/// connection's non-blocking socket. Slices passed to a handler point into
/// the connection's receive buffer and are only valid for the duration of
/// the call.
///
/// [`respond`]: Handler::respond
pub trait Handler<S: Socket> {
    /// A client connected; the record is in the `Idle` state.
    fn connect(&mut self, _req: &mut Request<'_, S>) {}

    /// The request line parsed: method, URL and version.
    fn request(
        &mut self,
        _req: &mut Request<'_, S>,
        _method: &Method,
        _url: &[u8],
        _version: &[u8],
    ) {
    }

    /// One header parsed. Names keep their original case.
    fn header(&mut self, _req: &mut Request<'_, S>, _name: &[u8], _value: &[u8]) {}

    /// The empty line ending the header block was consumed.
    fn headers_end(&mut self, _req: &mut Request<'_, S>) {}

    /// One chunk of the request body, at most the advertised
    /// `Content-Length` in total.
    fn body(&mut self, _req: &mut Request<'_, S>, _chunk: &[u8]) {}

    /// The request is complete; the application builds the response with
    /// the `response_*` operations on `req`.
    fn respond(&mut self, req: &mut Request<'_, S>);

    /// The connection is going away: the peer disconnected, a per-state
    /// timeout fired, the record was reaped to make room, or the server is
    /// shutting down.
    fn close(&mut self, _req: &mut Request<'_, S>) {}
}
