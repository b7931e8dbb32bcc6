//! A fast and correct event-driven HTTP/1.1 server core.
//!
//! `sxe-httpd` is the server half of a low-level networking toolkit: a
//! per-connection state machine that ingests bytes from a non-blocking
//! socket, incrementally parses the request line, headers and body inside
//! a bounded buffer, dispatches the parsed artifacts to the application
//! through a small [`Handler`] vocabulary, and writes responses back with
//! explicit back-pressure. Connections live in a fixed-size pool with
//! per-state aging, reaping and timeouts.
//!
//! The event loop is deliberately *not* included. The embedder owns the
//! reactor (epoll, kqueue, poll, a test harness), registers the handles
//! exposed by [`server::Httpd`], and calls back into `accept_ready`,
//! `read_ready`, `write_ready` and `tick` as readiness arrives. Everything
//! runs single-threaded and cooperatively; handlers run to completion.
//!
//! # Example
//!
//! ```no_run
//! use sxe_httpd::{server, Handler, Request, StatusCode};
//! use sxe_httpd::rt::{TcpListener, TcpStream};
//! use std::time::Instant;
//!
//! struct Hello;
//!
//! impl Handler<TcpStream> for Hello {
//!     fn respond(&mut self, req: &mut Request<'_, TcpStream>) {
//!         if req.response_simple(StatusCode::OK, "OK", b"hello\n").is_err() {
//!             req.response_close();
//!         }
//!     }
//! }
//!
//! let mut httpd: server::Httpd<TcpListener, Hello> =
//!     server::Builder::new().pool_capacity(16).build(Hello);
//! let addr = httpd.listen("INADDR_ANY", 8080).unwrap();
//! println!("listening on {}", addr);
//!
//! // The embedder's reactor loop drives it from here:
//! //   readable listener  -> httpd.accept_ready(Instant::now())
//! //   readable conn i    -> httpd.read_ready(i, Instant::now())
//! //   writable conn i    -> httpd.write_ready(i, Instant::now())
//! //   timer              -> httpd.tick(Instant::now())
//! # let _ = Instant::now();
//! ```
//!
//! Two supporting pieces are exposed for reuse on both client and server
//! sides: the restartable [`proto::message`] parser the read path is
//! written in terms of, and the [`auth`] digest-authentication helpers
//! layered on top of it.

mod common;
mod error;

pub mod proto;
pub mod rt;
pub mod server;

pub use crate::common::hex;
pub use crate::error::{Error, Result};
pub use crate::proto::auth;
pub use crate::server::{Builder, ConnState, Handler, Httpd, Request};

pub use http::{Method, StatusCode};
