//! Incremental HTTP message parsing.
//!
//! [`MessageParser`] is a restartable cursor over a caller-owned buffer: it
//! never copies and never allocates, and every output is an offset/length
//! pair into the caller's bytes. A partial buffer parses as far as it can;
//! after more bytes arrive the caller declares the new length with
//! [`MessageParser::grow`] and retries. The offsets stay valid across the
//! caller compacting its buffer, provided [`consume_parsed_headers`] is
//! invoked first.
//!
//! [`consume_parsed_headers`]: MessageParser::consume_parsed_headers

use tracing::trace;

use crate::error::Error;
use crate::Result;

/// Upper bound on a single header name.
///
/// Longer names are treated as malformed rather than accumulated forever.
pub const MAX_NAME_LEN: usize = 65_535;

const LINE_PARSED: usize = usize::MAX;

/// Outcome of a parse step that is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse<T> {
    /// An element was produced.
    Complete(T),
    /// Only a prefix of the element is buffered; `grow` and retry.
    Partial,
    /// The line (or header block) has been fully parsed.
    End,
}

impl<T> Parse<T> {
    /// Unwraps `Complete`.
    ///
    /// # Panics
    ///
    /// Panics on `Partial` or `End`.
    pub fn unwrap(self) -> T {
        match self {
            Parse::Complete(v) => v,
            Parse::Partial => panic!("unexpected Parse::Partial"),
            Parse::End => panic!("unexpected Parse::End"),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Parse::Complete(_))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Parse::Partial)
    }
}

/// The kind of element to pull from a request or response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineElement {
    /// The next whitespace- or CRLF-terminated token.
    Token,
    /// The remainder of the current line, up to CRLF.
    EndOfLine,
}

/// An offset/length pair into the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub off: usize,
    pub len: usize,
}

impl Span {
    /// Resolves the span against the buffer it was parsed from.
    pub fn slice<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.off..self.off + self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A parsed header: name and value spans into the caller's buffer.
///
/// The name preserves its original case; matching is the caller's concern
/// and is case-insensitive everywhere in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderSpan {
    pub name: Span,
    pub value: Span,
}

/// Restartable cursor state for parsing one HTTP message head.
///
/// The same buffer (or a longer one with identical contents below the
/// declared length) must be passed to every call.
#[derive(Debug)]
pub struct MessageParser {
    /// Valid bytes in the caller's buffer; grown monotonically.
    limit: usize,
    /// Start of the current (or last returned) element or header field.
    consumed: usize,
    /// Length of the last line element, or `LINE_PARSED` once the line is done.
    element_len: usize,
    name_len: usize,
    value_off: usize,
    value_len: usize,
    /// Offset just past the last returned field; zero while mid-field.
    next_field: usize,
    ignore_line: bool,
    ignore_len: usize,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    pub fn new() -> MessageParser {
        MessageParser {
            limit: 0,
            consumed: 0,
            element_len: 0,
            name_len: 0,
            value_off: 0,
            value_len: 0,
            next_field: 0,
            ignore_line: false,
            ignore_len: 0,
        }
    }

    /// Declares that the buffer now holds `len` valid bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is smaller than the previously declared length.
    pub fn grow(&mut self, len: usize) {
        assert!(
            len >= self.limit,
            "buffer length shrank: {} < {}",
            len,
            self.limit
        );
        self.limit = len;
    }

    /// The currently declared valid length.
    pub fn buffer_len(&self) -> usize {
        self.limit
    }

    /// Offset of the first unconsumed byte.
    ///
    /// After [`Parse::End`] this is the offset just past the line's CRLF
    /// (or past the empty line ending the header block). While a header is
    /// [`Parse::Partial`], it is the offset where the unfinished field
    /// begins.
    pub fn pos(&self) -> usize {
        self.consumed
    }

    /// Bytes the caller must discard from the front of its buffer while in
    /// ignore-line mode; reset on every [`next_header`] call.
    ///
    /// [`next_header`]: MessageParser::next_header
    pub fn ignore_len(&self) -> usize {
        self.ignore_len
    }

    /// Switches the cursor into ignore-line mode: the current logical
    /// header line (honouring continuations) is discarded rather than
    /// parsed. Call after [`consume_parsed_headers`], then feed data as
    /// usual; each [`next_header`] reports how much to skip via
    /// [`ignore_len`].
    ///
    /// [`consume_parsed_headers`]: MessageParser::consume_parsed_headers
    /// [`next_header`]: MessageParser::next_header
    /// [`ignore_len`]: MessageParser::ignore_len
    pub fn set_ignore_line(&mut self) {
        self.limit = 0;
        self.consumed = 0;
        self.ignore_line = true;
    }

    /// Parses the next element from the request or response line.
    pub fn next_line_element(&mut self, buf: &[u8], kind: LineElement) -> Result<Parse<Span>> {
        debug_assert!(buf.len() >= self.limit, "buffer shorter than declared length");
        let buf = &buf[..self.limit];

        if self.element_len == LINE_PARSED
            || (self.next_field >= 2
                && buf[self.next_field - 2] == b'\r'
                && buf[self.next_field - 1] == b'\n')
        {
            trace!("request/response line already parsed");
            self.element_len = LINE_PARSED;
            return Ok(Parse::End);
        }

        // Move past the previously returned element, unless resuming a
        // partial one.
        if self.next_field != 0 || self.consumed == 0 {
            self.element_len = 0;
            self.consumed = self.next_field;
            self.next_field = 0;
        }

        let mut off = self.consumed;
        while off < buf.len() && (buf[off] == b' ' || buf[off] == b'\t') {
            off += 1;
        }
        self.consumed = off;

        if buf.len() - off < 2 {
            trace!("partial line element, {} bytes buffered", buf.len() - off);
            return Ok(Parse::Partial);
        }

        if buf[off] == b'\r' && buf[off + 1] == b'\n' {
            self.consumed = off + 2;
            self.next_field = self.consumed;
            self.element_len = LINE_PARSED;
            return Ok(Parse::End);
        }

        let mut end = off;
        let terminated = loop {
            if end >= buf.len() {
                break false;
            }
            match buf[end] {
                b'\r' => break true,
                b' ' | b'\t' if kind == LineElement::Token => break true,
                _ => end += 1,
            }
        };

        if !terminated {
            trace!("partial line element");
            return Ok(Parse::Partial);
        }

        if buf[end] == b'\r' {
            if end + 1 >= buf.len() {
                return Ok(Parse::Partial);
            }
            if buf[end + 1] != b'\n' {
                return Err(Error::new_bad_message(
                    "carriage return not followed by line feed",
                ));
            }
            self.next_field = end + 2;
        } else {
            self.next_field = end + 1;
        }

        self.element_len = end - off;
        Ok(Parse::Complete(Span {
            off,
            len: end - off,
        }))
    }

    /// Parses the next header field.
    ///
    /// Returns [`Parse::End`] on the empty line terminating the header
    /// block. Must not be called again after that.
    pub fn next_header(&mut self, buf: &[u8]) -> Result<Parse<HeaderSpan>> {
        debug_assert!(buf.len() >= self.limit, "buffer shorter than declared length");
        let buf = &buf[..self.limit];

        if self.element_len != LINE_PARSED {
            debug_assert!(
                self.next_field >= 2,
                "request/response line has not been parsed yet"
            );
            self.element_len = LINE_PARSED;
        }

        // The caller discards ignore_len bytes after each call, so it
        // resets every time.
        self.ignore_len = 0;

        // Move past the previously returned header field.
        if self.next_field != 0 {
            self.consumed = self.next_field;
            self.name_len = 0;
            self.value_off = 0;
            self.value_len = 0;
            self.next_field = 0;

            if self.limit - self.consumed < 2 {
                trace!("tiny partial header field");
                return Ok(Parse::Partial);
            }

            if buf[self.consumed] == b'\r' && buf[self.consumed + 1] == b'\n' {
                self.consumed += 2;
                return Ok(Parse::End);
            }
        }

        if self.ignore_line {
            return self.skip_ignored_line(buf);
        }

        // Header field name.
        if self.value_off == 0 {
            if self.name_len == 0 {
                if self.consumed >= self.limit {
                    return Ok(Parse::Partial);
                }
                if buf[self.consumed] == b':' {
                    return Err(Error::new_bad_message("header name begins with ':'"));
                }
            }

            let mut off = self.consumed + self.name_len;
            loop {
                if off >= self.limit {
                    self.name_len = off - self.consumed;
                    if self.name_len > MAX_NAME_LEN {
                        return Err(Error::new_bad_message("header name too long"));
                    }
                    trace!("partial header field name, {} bytes", self.name_len);
                    return Ok(Parse::Partial);
                }
                let b = buf[off];
                if b == b':' {
                    break;
                }
                // Printable, non-space characters only (RFC 822 3.1.2).
                if !b.is_ascii_graphic() {
                    return Err(Error::new_bad_message(
                        "invalid character in header name",
                    ));
                }
                off += 1;
            }
            self.name_len = off - self.consumed;
            if self.name_len > MAX_NAME_LEN {
                return Err(Error::new_bad_message("header name too long"));
            }
            self.value_off = off + 1;
        }

        // Trim leading spaces and tabs. Leading line continuations are not
        // stripped.
        if self.value_len == 0 {
            loop {
                if self.value_off >= self.limit {
                    return Ok(Parse::Partial);
                }
                match buf[self.value_off] {
                    b' ' | b'\t' => self.value_off += 1,
                    _ => break,
                }
            }
        }

        // Find the end of the value, folding line continuations in.
        loop {
            let scan_from = self.value_off + self.value_len;
            let cr = match memchr::memchr(b'\r', &buf[scan_from..]) {
                Some(i) => scan_from + i,
                None => {
                    self.value_len = self.limit - self.value_off;
                    trace!("partial header field value");
                    return Ok(Parse::Partial);
                }
            };
            self.value_len = cr - self.value_off;

            if cr + 2 >= self.limit {
                return Ok(Parse::Partial);
            }
            if buf[cr + 1] != b'\n' {
                return Err(Error::new_bad_message(
                    "carriage return not followed by line feed",
                ));
            }
            if buf[cr + 2] != b' ' && buf[cr + 2] != b'\t' {
                self.next_field = cr + 2;
                break;
            }

            // Line continuation; the CRLF and leading whitespace stay part
            // of the value verbatim.
            trace!("header value contains a line continuation");
            self.value_len = cr + 2 - self.value_off;
        }

        // Trim trailing whitespace, including vertical tab and form feed.
        while self.value_len > 0 && is_trailing_ws(buf[self.value_off + self.value_len - 1]) {
            self.value_len -= 1;
        }

        Ok(Parse::Complete(HeaderSpan {
            name: Span {
                off: self.consumed,
                len: self.name_len,
            },
            value: Span {
                off: self.value_off,
                len: self.value_len,
            },
        }))
    }

    /// Scans forward for the end of the line being ignored.
    fn skip_ignored_line(&mut self, buf: &[u8]) -> Result<Parse<HeaderSpan>> {
        let mut start = self.consumed;
        loop {
            let lf = match memchr::memchr(b'\n', &buf[start..self.limit]) {
                Some(i) => start + i,
                None => {
                    // Nothing decidable in the buffer; discard all of it.
                    self.ignore_len = self.limit;
                    self.limit = 0;
                    self.consumed = 0;
                    trace!("ignoring line: {} bytes to discard", self.ignore_len);
                    return Ok(Parse::Partial);
                }
            };

            if lf + 2 >= self.limit {
                // Keep the trailing bytes so the continuation check can be
                // made once more data arrives.
                self.ignore_len = self.limit.saturating_sub(2);
                self.limit -= self.ignore_len;
                self.consumed = 0;
                trace!("ignoring line: partial terminator, {} bytes to discard", self.ignore_len);
                return Ok(Parse::Partial);
            }

            if buf[lf + 1] == b'\r' && buf[lf + 2] == b'\n' {
                // The ignored line was the last header.
                self.ignore_line = false;
                self.ignore_len = lf + 3;
                self.consumed = lf + 3;
                trace!("ignored line ends the header block");
                return Ok(Parse::End);
            }

            if buf[lf + 1] != b' ' && buf[lf + 1] != b'\t' {
                // End of the ignored logical line; the next field follows.
                self.ignore_line = false;
                self.ignore_len = lf + 1;
                self.name_len = 0;
                self.value_off = 0;
                self.value_len = 0;
                self.limit -= self.ignore_len;
                self.consumed = 0;
                trace!("ignored line complete, {} bytes to discard", self.ignore_len);
                return Ok(Parse::Partial);
            }

            // A continuation belongs to the line being ignored.
            start = lf + 1;
        }
    }

    /// Returns the byte count the caller may discard from the front of its
    /// buffer. The caller must compact the buffer by exactly that amount
    /// (and re-`grow`) before the next parse call; the cursor's offsets are
    /// rebased here so parsing resumes correctly afterwards.
    pub fn consume_parsed_headers(&mut self) -> usize {
        let consumed;
        if self.next_field != 0 {
            consumed = self.next_field;
            self.name_len = 0;
            self.value_off = 0;
            self.value_len = 0;
            self.next_field = 0;
        } else {
            consumed = self.consumed;
            if self.value_off != 0 {
                self.value_off -= consumed;
            }
        }
        self.consumed = 0;
        self.limit -= consumed;
        consumed
    }
}

fn is_trailing_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::LineElement::{EndOfLine, Token};

    fn parser_for(buf: &[u8]) -> MessageParser {
        let mut p = MessageParser::new();
        p.grow(buf.len());
        p
    }

    #[test]
    fn request_line_tokens() {
        let buf = b"GET /a/b HTTP/1.1\r\n";
        let mut p = parser_for(buf);

        let m = p.next_line_element(buf, Token).unwrap().unwrap();
        assert_eq!(m.slice(buf), b"GET");
        let u = p.next_line_element(buf, Token).unwrap().unwrap();
        assert_eq!(u.slice(buf), b"/a/b");
        let v = p.next_line_element(buf, EndOfLine).unwrap().unwrap();
        assert_eq!(v.slice(buf), b"HTTP/1.1");
        assert_eq!(p.next_line_element(buf, Token).unwrap(), Parse::End);
        assert_eq!(p.pos(), buf.len());
    }

    #[test]
    fn request_line_extra_whitespace() {
        let buf = b"GET  \t /x \t HTTP/1.0\r\n";
        let mut p = parser_for(buf);

        assert_eq!(p.next_line_element(buf, Token).unwrap().unwrap().slice(buf), b"GET");
        assert_eq!(p.next_line_element(buf, Token).unwrap().unwrap().slice(buf), b"/x");
        assert_eq!(
            p.next_line_element(buf, EndOfLine).unwrap().unwrap().slice(buf),
            b"HTTP/1.0"
        );
    }

    #[test]
    fn line_elements_byte_at_a_time() {
        let buf = b"PUT /some/where HTTP/1.0\r\n";
        let mut p = MessageParser::new();
        let kinds = [Token, Token, EndOfLine];
        let mut next = 0;
        let mut out = Vec::new();

        for len in 1..=buf.len() {
            p.grow(len);
            while next < kinds.len() {
                match p.next_line_element(&buf[..len], kinds[next]).unwrap() {
                    Parse::Complete(span) => {
                        out.push(span.slice(buf).to_vec());
                        next += 1;
                    }
                    Parse::Partial => break,
                    Parse::End => panic!("premature end of line"),
                }
            }
        }

        assert_eq!(
            out,
            vec![
                b"PUT".to_vec(),
                b"/some/where".to_vec(),
                b"HTTP/1.0".to_vec(),
            ]
        );
        assert_eq!(p.next_line_element(buf, Token).unwrap(), Parse::End);
    }

    #[test]
    fn empty_line_is_end() {
        let buf = b"\r\nHost: x\r\n\r\n";
        let mut p = parser_for(buf);
        assert_eq!(p.next_line_element(buf, EndOfLine).unwrap(), Parse::End);

        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"Host");
        assert_eq!(h.value.slice(buf), b"x");
        assert_eq!(p.next_header(buf).unwrap(), Parse::End);
    }

    #[test]
    fn bare_cr_in_line_is_bad() {
        let buf = b"GET /x\rZ HTTP/1.1\r\n";
        let mut p = parser_for(buf);
        assert_eq!(p.next_line_element(buf, Token).unwrap().unwrap().slice(buf), b"GET");
        assert!(p.next_line_element(buf, Token).unwrap_err().is_bad_message());
    }

    fn parse_line(p: &mut MessageParser, buf: &[u8]) {
        loop {
            match p.next_line_element(buf, EndOfLine).unwrap() {
                Parse::End => return,
                Parse::Complete(_) => {}
                Parse::Partial => panic!("line did not complete"),
            }
        }
    }

    #[test]
    fn headers_ows_stripped() {
        let buf = b"x\r\nName: \t  value  \x0b\x0c \r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);

        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"Name");
        assert_eq!(h.value.slice(buf), b"value");
        assert_eq!(p.next_header(buf).unwrap(), Parse::End);
    }

    #[test]
    fn header_empty_value() {
        let buf = b"x\r\nA:\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);

        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"A");
        assert_eq!(h.value.len, 0);
        assert_eq!(p.next_header(buf).unwrap(), Parse::End);
    }

    #[test]
    fn header_name_case_preserved() {
        let buf = b"x\r\nCoNtEnT-LeNgTh: 3\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);
        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"CoNtEnT-LeNgTh");
    }

    #[test]
    fn header_continuation_folds_into_value() {
        let buf = b"x\r\nA: one\r\n two\r\n\tthree\r\nB: b\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);

        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"A");
        // Continuation bytes are part of the value verbatim.
        assert_eq!(h.value.slice(buf), b"one\r\n two\r\n\tthree");

        let h = p.next_header(buf).unwrap().unwrap();
        assert_eq!(h.name.slice(buf), b"B");
        assert_eq!(h.value.slice(buf), b"b");
        assert_eq!(p.next_header(buf).unwrap(), Parse::End);
    }

    #[test]
    fn header_leading_colon_is_bad() {
        let buf = b"x\r\n:B\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);
        assert!(p.next_header(buf).unwrap_err().is_bad_message());
    }

    #[test]
    fn header_name_with_space_is_bad() {
        let buf = b"x\r\nA B: v\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);
        assert!(p.next_header(buf).unwrap_err().is_bad_message());
    }

    #[test]
    fn header_without_colon_is_bad() {
        // The scan runs into the CR, which is not a valid name character.
        let buf = b"x\r\nSDF\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);
        assert!(p.next_header(buf).unwrap_err().is_bad_message());
    }

    #[test]
    fn header_cr_without_lf_is_bad() {
        let buf = b"x\r\nA: v\rZ\r\n\r\n";
        let mut p = parser_for(buf);
        parse_line(&mut p, buf);
        assert!(p.next_header(buf).unwrap_err().is_bad_message());
    }

    /// Parses a whole message head, collecting (name, value) pairs.
    fn collect_headers(buf: &[u8], grow_step: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut p = MessageParser::new();
        let mut len = 0;
        let mut out = Vec::new();
        let mut line_done = false;

        loop {
            let step = grow_step.min(buf.len() - len);
            len += step;
            p.grow(len);

            if !line_done {
                match p.next_line_element(&buf[..len], EndOfLine).unwrap() {
                    Parse::End => line_done = true,
                    Parse::Complete(_) => continue,
                    Parse::Partial => {
                        assert!(len < buf.len(), "line never completed");
                        continue;
                    }
                }
            }

            loop {
                match p.next_header(&buf[..len]).unwrap() {
                    Parse::Complete(h) => out.push((
                        h.name.slice(buf).to_vec(),
                        h.value.slice(buf).to_vec(),
                    )),
                    Parse::Partial => break,
                    Parse::End => return out,
                }
            }
            assert!(len < buf.len(), "headers never completed");
        }
    }

    #[test]
    fn incremental_parse_equivalence() {
        let buf: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\nX-Folded: a\r\n b\r\nEmpty:\r\n\r\n";
        let whole = collect_headers(buf, buf.len());
        assert_eq!(whole.len(), 4);
        assert_eq!(whole[0], (b"Host".to_vec(), b"example.com".to_vec()));
        assert_eq!(whole[3], (b"Empty".to_vec(), b"".to_vec()));

        // The same bytes, arriving in fragments of every possible size,
        // produce the same headers.
        for step in 1..buf.len() {
            assert_eq!(collect_headers(buf, step), whole, "fragment size {}", step);
        }
    }

    #[test]
    fn consume_and_compact_between_headers() {
        let mut storage = b"x\r\nFirst: 1\r\nSecond: 2\r\n\r\n".to_vec();
        let mut p = parser_for(&storage);
        parse_line(&mut p, &storage);

        let h = p.next_header(&storage).unwrap().unwrap();
        assert_eq!(h.name.slice(&storage), b"First");

        // Discard the request line and the first header, as a caller with a
        // bounded buffer would.
        let consumed = p.consume_parsed_headers();
        assert_eq!(consumed, 13); // "x\r\nFirst: 1\r\n"
        storage.drain(..consumed);

        let h = p.next_header(&storage).unwrap().unwrap();
        assert_eq!(h.name.slice(&storage), b"Second");
        assert_eq!(h.value.slice(&storage), b"2");
        assert_eq!(p.next_header(&storage).unwrap(), Parse::End);
    }

    /// Drives the ignore-line protocol the way a bounded caller does: a
    /// window of at most `window` bytes over `msg`, discarding what the
    /// parser says to discard.
    #[test]
    fn ignore_line_skips_oversized_value() {
        let window = 50;
        let mut msg = b"\r\nHEADER-1: LONG_VALUE_".to_vec();
        msg.extend(std::iter::repeat(b'9').take(100));
        msg.extend_from_slice(b"\r\n\r\n");

        let mut fed = 0; // bytes of msg shifted into the window so far
        let mut buf: Vec<u8> = Vec::new();
        let mut refill = |buf: &mut Vec<u8>, fed: &mut usize| {
            let take = (msg.len() - *fed).min(window - buf.len());
            buf.extend_from_slice(&msg[*fed..*fed + take]);
            *fed += take;
        };

        let mut p = MessageParser::new();
        refill(&mut buf, &mut fed);
        p.grow(buf.len());
        assert_eq!(p.next_line_element(&buf, EndOfLine).unwrap(), Parse::End);

        // The single header cannot complete inside the window.
        assert_eq!(p.next_header(&buf).unwrap(), Parse::Partial);
        let consumed = p.consume_parsed_headers();
        assert_eq!(consumed, 2); // the leading CRLF
        buf.drain(..consumed);

        // Give up on the line: discard the partial field and start ignoring.
        let mut ignored = buf.len();
        buf.clear();
        p.set_ignore_line();
        loop {
            refill(&mut buf, &mut fed);
            p.grow(buf.len());
            match p.next_header(&buf).unwrap() {
                Parse::Partial => {
                    assert!(p.ignore_len() > 0, "ignore mode must report progress");
                    ignored += p.ignore_len();
                    buf.drain(..p.ignore_len());
                }
                Parse::End => {
                    ignored += p.ignore_len();
                    break;
                }
                Parse::Complete(_) => panic!("ignored line produced a header"),
            }
        }

        // Everything after the request line was skipped, terminator included.
        assert_eq!(ignored, msg.len() - 2);
    }

    #[test]
    fn ignore_line_preserves_following_headers() {
        let window = 70;
        let mut msg = b"\r\nHEADER-1: VALUE_1\r\nHEADER-2: LONG_VALUE_2_".to_vec();
        msg.extend(std::iter::repeat(b'7').take(100));
        msg.extend_from_slice(b"\r\nHEADER-333: VALUE_3333\r\nHEADER-55: VALUE_5\r\n\r\n");

        let mut fed = 0;
        let mut buf: Vec<u8> = Vec::new();
        let msg2 = msg.clone();
        let mut refill = |buf: &mut Vec<u8>, fed: &mut usize| {
            let take = (msg2.len() - *fed).min(window - buf.len());
            buf.extend_from_slice(&msg2[*fed..*fed + take]);
            *fed += take;
        };

        let mut p = MessageParser::new();
        refill(&mut buf, &mut fed);
        p.grow(buf.len());
        assert_eq!(p.next_line_element(&buf, EndOfLine).unwrap(), Parse::End);

        let h = p.next_header(&buf).unwrap().unwrap();
        assert_eq!(h.name.slice(&buf), b"HEADER-1");
        assert_eq!(h.value.slice(&buf), b"VALUE_1");

        // HEADER-2 does not fit; consume what was parsed and ignore it.
        assert_eq!(p.next_header(&buf).unwrap(), Parse::Partial);
        let consumed = p.consume_parsed_headers();
        assert_eq!(consumed, 21); // CRLF + "HEADER-1: VALUE_1\r\n"
        buf.drain(..consumed);

        buf.clear();
        p.set_ignore_line();

        let mut headers = Vec::new();
        loop {
            refill(&mut buf, &mut fed);
            p.grow(buf.len());
            match p.next_header(&buf).unwrap() {
                Parse::Partial => {
                    if p.ignore_len() > 0 {
                        buf.drain(..p.ignore_len());
                    } else {
                        let consumed = p.consume_parsed_headers();
                        buf.drain(..consumed);
                    }
                }
                Parse::Complete(h) => headers.push((
                    h.name.slice(&buf).to_vec(),
                    h.value.slice(&buf).to_vec(),
                )),
                Parse::End => break,
            }
        }

        // The surrounding headers survived the ignored one.
        assert_eq!(
            headers,
            vec![
                (b"HEADER-333".to_vec(), b"VALUE_3333".to_vec()),
                (b"HEADER-55".to_vec(), b"VALUE_5".to_vec()),
            ]
        );
    }

    #[test]
    fn ignore_line_honours_continuations() {
        let window = 60;
        let mut msg = b"\r\nHEADER-1: LONG_VALUE_1_".to_vec();
        msg.extend(std::iter::repeat(b'5').take(100));
        msg.extend_from_slice(b"\r\n CONTINUE_LINE1\r\n\tCONTINUE_LINE2\r\nLAST: v\r\n\r\n");

        let mut fed = 0;
        let mut buf: Vec<u8> = Vec::new();
        let msg2 = msg.clone();
        let mut refill = |buf: &mut Vec<u8>, fed: &mut usize| {
            let take = (msg2.len() - *fed).min(window - buf.len());
            buf.extend_from_slice(&msg2[*fed..*fed + take]);
            *fed += take;
        };

        let mut p = MessageParser::new();
        refill(&mut buf, &mut fed);
        p.grow(buf.len());
        assert_eq!(p.next_line_element(&buf, EndOfLine).unwrap(), Parse::End);
        assert_eq!(p.next_header(&buf).unwrap(), Parse::Partial);
        buf.drain(..p.consume_parsed_headers());

        buf.clear();
        p.set_ignore_line();

        // The folded continuations are skipped along with their line; the
        // next real header still parses.
        loop {
            refill(&mut buf, &mut fed);
            p.grow(buf.len());
            match p.next_header(&buf).unwrap() {
                Parse::Partial => {
                    if p.ignore_len() > 0 {
                        buf.drain(..p.ignore_len());
                    } else {
                        buf.drain(..p.consume_parsed_headers());
                    }
                }
                Parse::Complete(h) => {
                    assert_eq!(h.name.slice(&buf), b"LAST");
                    assert_eq!(h.value.slice(&buf), b"v");
                    break;
                }
                Parse::End => panic!("missed the trailing header"),
            }
        }
        assert_eq!(p.next_header(&buf).unwrap(), Parse::End);
    }

    #[test]
    #[should_panic(expected = "buffer length shrank")]
    fn grow_must_not_shrink() {
        let mut p = MessageParser::new();
        p.grow(10);
        p.grow(5);
    }
}
