//! HTTP digest authentication helpers (RFC 2617, `qop=auth`).
//!
//! These sit above the message parser: the caller extracts the
//! `Authorization` or `WWW-Authenticate` header value and pulls fields out
//! of it with [`get_field`], then composes or validates the digest with
//! [`ha1`], [`ha2`] and [`response`].

use std::fmt;
use std::str;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest as _, Md5};

use crate::common::hex;

/// A lower-case hex-encoded MD5 digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    hex: [u8; 32],
}

impl Digest {
    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.hex).expect("digest is ascii hex")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.as_str())
    }
}

/// MD5 over `parts` joined with `:`.
fn digest_of(parts: &[&[u8]]) -> Digest {
    let mut md5 = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            md5.update(b":");
        }
        md5.update(part);
    }
    let raw = md5.finalize();
    let mut out = [0u8; 32];
    hex::encode_into(&raw, &mut out);
    Digest { hex: out }
}

/// `HA1 = MD5(username:realm:password)`.
///
/// Typically only a client computes this; a server is better off storing
/// the value in its credentials database, indexed by the username.
pub fn ha1(username: &[u8], realm: &[u8], password: &[u8]) -> Digest {
    digest_of(&[username, realm, password])
}

/// `HA2 = MD5(method:url)`.
pub fn ha2(method: &[u8], url: &[u8]) -> Digest {
    digest_of(&[method, url])
}

/// `response = MD5(HA1:nonce:nc:cnonce:auth:HA2)`.
pub fn response(
    ha1: &Digest,
    nonce: &[u8],
    nc: &[u8],
    cnonce: &[u8],
    ha2: &Digest,
) -> Digest {
    digest_of(&[ha1.as_bytes(), nonce, nc, cnonce, b"auth", ha2.as_bytes()])
}

/// Extracts a field from a `WWW-Authenticate` or `Authorization` header
/// value. The field is `name=` optionally surrounded by quotes; the value
/// runs until the first character outside `[A-Za-z0-9_-]`.
///
/// Returns `None` when the field is absent, or when the value runs to the
/// end of the buffer unterminated.
///
/// ```
/// let header = br#"Digest realm="hello" qop=auth nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093""#;
/// let nonce = sxe_httpd::auth::get_field(header, "nonce").unwrap();
/// assert_eq!(nonce, b"dcd98b7102dd2f0e8b11d0f600bfb0c093".as_ref());
/// ```
pub fn get_field<'a>(value: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let name = name.as_bytes();
    let mut base = 0;

    while let Some(i) = memchr::memmem::find(&value[base..], name) {
        let at = base + i;
        let after = at + name.len();

        // Require a field boundary before the name, so that "nonce" does
        // not match inside "cnonce".
        let bounded = at == 0 || !is_field_char(value[at - 1]);
        if !bounded || after >= value.len() || value[after] != b'=' {
            base = at + 1;
            continue;
        }

        let mut start = after + 1;
        if start < value.len() && value[start] == b'"' {
            start += 1;
        }
        let mut end = start;
        while end < value.len() && is_field_char(value[end]) {
            end += 1;
        }
        if end == value.len() {
            return None;
        }
        return Some(&value[start..end]);
    }
    None
}

fn is_field_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Generates 128-bit monotonically-increasing nonce values.
///
/// The high half is seeded from wall-clock seconds at construction, so
/// values stay unique across restarts of the process; the low half is a
/// counter that carries into the high half on wrap. Hand out one generator
/// per server instance; the `&mut` receiver on [`next`] serialises callers.
///
/// [`next`]: NonceSequence::next
#[derive(Debug)]
pub struct NonceSequence {
    time: u64,
    sequence: u64,
}

impl NonceSequence {
    pub fn new() -> NonceSequence {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        NonceSequence::with_seed(secs)
    }

    /// A generator with a fixed seed; useful for replay and tests.
    pub fn with_seed(time: u64) -> NonceSequence {
        NonceSequence { time, sequence: 0 }
    }

    pub fn next(&mut self) -> Nonce {
        let nonce = Nonce {
            time: self.time,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.time = self.time.wrapping_add(1);
        }
        nonce
    }
}

impl Default for NonceSequence {
    fn default() -> Self {
        NonceSequence::new()
    }
}

/// A single 128-bit nonce value; displays as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nonce {
    time: u64,
    sequence: u64,
}

impl Nonce {
    pub fn as_u128(&self) -> u128 {
        (self.time as u128) << 64 | self.sequence as u128
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.time, self.sequence)
    }
}
