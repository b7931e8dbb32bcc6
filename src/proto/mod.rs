//! Protocol pieces shared by the server core: the incremental message
//! parser and the digest-authentication helpers layered on top of it.

pub mod auth;
pub mod message;

pub use self::message::{HeaderSpan, LineElement, MessageParser, Parse, Span};
