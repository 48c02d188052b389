// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for the request/response protocol.
//!
//! Requests are arrays of bulk strings; replies are one of five shapes.
//! The codec maintains partial-read state so it can be fed arbitrary TCP
//! segment boundaries:
//!
//! ```text
//! +hello\r\n                      simple string
//! -ERR reason\r\n                 error
//! :42\r\n                         integer
//! $5\r\nvalue\r\n                 bulk ($-1 = null)
//! *2\r\n<elem><elem>              array (*-1 = null)
//! ```
//!
//! A request frame for `SET key value`:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! ```
//!
//! The engine treats argument payloads as opaque bytes; callers encode
//! their own key/value representations before building a command.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{KvError, Result};

/// Default maximum accepted reply size (64 MB, anti-OOM protection).
pub const DEFAULT_MAX_REPLY_SIZE: usize = 64 * 1024 * 1024;

const CRLF: &[u8] = b"\r\n";

// ============================================================================
// Reply values
// ============================================================================

/// One decoded wire reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireReply {
    /// Simple string reply (`+OK`).
    Simple(String),

    /// Error reply (`-ERR ...`). Completes the matched command as failed.
    Error(String),

    /// Integer reply.
    Integer(i64),

    /// Bulk payload; `None` is the null bulk.
    Bulk(Option<Bytes>),

    /// Array of replies; `None` is the null array.
    Array(Option<Vec<WireReply>>),
}

// ============================================================================
// Request encoding
// ============================================================================

/// Encode one request frame from a keyword and pre-encoded arguments.
pub fn encode_request(keyword: &str, args: &[Vec<u8>]) -> Bytes {
    // Payload bytes plus a generous allowance for length headers.
    let payload: usize = keyword.len() + args.iter().map(Vec::len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(payload + 16 * (args.len() + 2));

    buf.extend_from_slice(format!("*{}\r\n", 1 + args.len()).as_bytes());
    encode_bulk(&mut buf, keyword.as_bytes());
    for arg in args {
        encode_bulk(&mut buf, arg);
    }
    buf.freeze()
}

fn encode_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

// ============================================================================
// Reply decoding
// ============================================================================

/// Incremental reply decoder.
///
/// Feed raw bytes as they arrive, then drain complete replies with
/// [`WireDecoder::next`]. Partial input is buffered across calls.
#[derive(Debug)]
pub struct WireDecoder {
    /// Accumulated unparsed bytes.
    buf: BytesMut,

    /// Maximum allowed size of a single buffered reply.
    max_reply_size: usize,

    /// Statistics: replies decoded.
    replies_decoded: u64,

    /// Statistics: bytes consumed.
    bytes_decoded: u64,
}

impl WireDecoder {
    /// Create a decoder with the given reply size limit.
    pub fn new(max_reply_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_reply_size,
            replies_decoded: 0,
            bytes_decoded: 0,
        }
    }

    /// Create a decoder with the default 64 MB limit.
    pub fn with_default_max() -> Self {
        Self::new(DEFAULT_MAX_REPLY_SIZE)
    }

    /// Append raw transport bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of replies decoded so far.
    pub fn replies_decoded(&self) -> u64 {
        self.replies_decoded
    }

    /// Number of bytes consumed so far.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Discard buffered state (after a connection reset).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Try to decode the next complete reply.
    ///
    /// Returns:
    /// - `Ok(Some(reply))` - a complete reply was decoded
    /// - `Ok(None)` - need more data
    /// - `Err(e)` - the stream is malformed; fatal to the connection
    pub fn next(&mut self) -> Result<Option<WireReply>> {
        match parse_value(&self.buf, 0)? {
            Some((reply, consumed)) => {
                self.buf.advance(consumed);
                self.replies_decoded += 1;
                self.bytes_decoded += consumed as u64;
                Ok(Some(reply))
            }
            None => {
                if self.buf.len() > self.max_reply_size {
                    return Err(KvError::Decode(format!(
                        "reply exceeds {} byte limit",
                        self.max_reply_size
                    )));
                }
                Ok(None)
            }
        }
    }
}

/// Parse one value starting at `pos`. Returns the value and the position
/// one past its end, or `None` when the buffer is incomplete.
fn parse_value(buf: &[u8], pos: usize) -> Result<Option<(WireReply, usize)>> {
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };

    match prefix {
        b'+' => Ok(parse_line(buf, pos + 1)?
            .map(|(line, end)| (WireReply::Simple(lossy(line)), end))),
        b'-' => Ok(parse_line(buf, pos + 1)?
            .map(|(line, end)| (WireReply::Error(lossy(line)), end))),
        b':' => match parse_line(buf, pos + 1)? {
            Some((line, end)) => Ok(Some((WireReply::Integer(parse_i64(line)?), end))),
            None => Ok(None),
        },
        b'$' => parse_bulk(buf, pos + 1),
        b'*' => parse_array(buf, pos + 1),
        other => Err(KvError::Decode(format!(
            "unexpected reply prefix byte 0x{:02x}",
            other
        ))),
    }
}

/// Find the CRLF-terminated line starting at `pos`.
fn parse_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>> {
    let mut i = pos;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' {
            if buf[i + 1] != b'\n' {
                return Err(KvError::Decode("bare CR inside reply line".into()));
            }
            return Ok(Some((&buf[pos..i], i + 2)));
        }
        i += 1;
    }
    Ok(None)
}

fn parse_bulk(buf: &[u8], pos: usize) -> Result<Option<(WireReply, usize)>> {
    let Some((line, body)) = parse_line(buf, pos)? else {
        return Ok(None);
    };
    let len = parse_i64(line)?;
    if len < 0 {
        if len != -1 {
            return Err(KvError::Decode(format!("invalid bulk length {}", len)));
        }
        return Ok(Some((WireReply::Bulk(None), body)));
    }

    let len = len as usize;
    let end = body + len + CRLF.len();
    if buf.len() < end {
        return Ok(None);
    }
    if &buf[body + len..end] != CRLF {
        return Err(KvError::Decode("bulk payload missing terminator".into()));
    }
    let payload = Bytes::copy_from_slice(&buf[body..body + len]);
    Ok(Some((WireReply::Bulk(Some(payload)), end)))
}

fn parse_array(buf: &[u8], pos: usize) -> Result<Option<(WireReply, usize)>> {
    let Some((line, mut cursor)) = parse_line(buf, pos)? else {
        return Ok(None);
    };
    let count = parse_i64(line)?;
    if count < 0 {
        if count != -1 {
            return Err(KvError::Decode(format!("invalid array length {}", count)));
        }
        return Ok(Some((WireReply::Array(None), cursor)));
    }

    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match parse_value(buf, cursor)? {
            Some((value, next)) => {
                elements.push(value);
                cursor = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((WireReply::Array(Some(elements)), cursor)))
}

fn parse_i64(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            KvError::Decode(format!(
                "invalid numeric field {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(input: &[u8]) -> Result<Option<WireReply>> {
        let mut decoder = WireDecoder::with_default_max();
        decoder.feed(input);
        decoder.next()
    }

    #[test]
    fn encodes_request_frames() {
        let frame = encode_request("PING", &[]);
        assert_eq!(&frame[..], b"*1\r\n$4\r\nPING\r\n");

        let frame = encode_request("SET", &[b"key".to_vec(), b"value".to_vec()]);
        assert_eq!(
            &frame[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn decodes_each_reply_shape() {
        assert_eq!(
            decode_one(b"+OK\r\n").unwrap(),
            Some(WireReply::Simple("OK".into()))
        );
        assert_eq!(
            decode_one(b"-ERR bad\r\n").unwrap(),
            Some(WireReply::Error("ERR bad".into()))
        );
        assert_eq!(
            decode_one(b":1234\r\n").unwrap(),
            Some(WireReply::Integer(1234))
        );
        assert_eq!(
            decode_one(b"$5\r\nhello\r\n").unwrap(),
            Some(WireReply::Bulk(Some(Bytes::from_static(b"hello"))))
        );
        assert_eq!(decode_one(b"$-1\r\n").unwrap(), Some(WireReply::Bulk(None)));
        assert_eq!(
            decode_one(b"*2\r\n:1\r\n$2\r\nab\r\n").unwrap(),
            Some(WireReply::Array(Some(vec![
                WireReply::Integer(1),
                WireReply::Bulk(Some(Bytes::from_static(b"ab"))),
            ])))
        );
        assert_eq!(
            decode_one(b"*-1\r\n").unwrap(),
            Some(WireReply::Array(None))
        );
    }

    #[test]
    fn buffers_partial_input_across_feeds() {
        let mut decoder = WireDecoder::with_default_max();

        decoder.feed(b"$5\r\nhe");
        assert_eq!(decoder.next().unwrap(), None);

        decoder.feed(b"llo\r\n+OK");
        assert_eq!(
            decoder.next().unwrap(),
            Some(WireReply::Bulk(Some(Bytes::from_static(b"hello"))))
        );
        assert_eq!(decoder.next().unwrap(), None);

        decoder.feed(b"\r\n");
        assert_eq!(
            decoder.next().unwrap(),
            Some(WireReply::Simple("OK".into()))
        );
        assert_eq!(decoder.replies_decoded(), 2);
    }

    #[test]
    fn decodes_back_to_back_replies() {
        let mut decoder = WireDecoder::with_default_max();
        decoder.feed(b"+one\r\n+two\r\n+three\r\n");

        assert_eq!(
            decoder.next().unwrap(),
            Some(WireReply::Simple("one".into()))
        );
        assert_eq!(
            decoder.next().unwrap(),
            Some(WireReply::Simple("two".into()))
        );
        assert_eq!(
            decoder.next().unwrap(),
            Some(WireReply::Simple("three".into()))
        );
        assert_eq!(decoder.next().unwrap(), None);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(decode_one(b"?what\r\n"), Err(KvError::Decode(_))));
        assert!(matches!(decode_one(b":12x4\r\n"), Err(KvError::Decode(_))));
        assert!(matches!(decode_one(b"$-7\r\n"), Err(KvError::Decode(_))));
    }

    #[test]
    fn rejects_oversized_replies() {
        let mut decoder = WireDecoder::new(16);
        decoder.feed(b"$100\r\naaaaaaaaaaaaaaaaaaaa");
        assert!(matches!(decoder.next(), Err(KvError::Decode(_))));
    }

    #[test]
    fn request_roundtrips_through_decoder() {
        // A request frame is itself a valid array-of-bulks value, which is
        // what server-side test fixtures rely on.
        let frame = encode_request("DEL", &[b"a".to_vec(), b"b".to_vec()]);
        let mut decoder = WireDecoder::with_default_max();
        decoder.feed(&frame);

        let WireReply::Array(Some(parts)) = decoder.next().unwrap().unwrap() else {
            panic!("expected array");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], WireReply::Bulk(Some(Bytes::from_static(b"DEL"))));
    }
}
