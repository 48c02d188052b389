// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal typed command builders.
//!
//! The full command catalogue lives with external command-builder
//! collaborators; this module carries just enough of it to exercise the
//! pipeline end to end: basic string operations, connectivity checks, and
//! the two transaction-control commands. Each builder pairs pre-encoded
//! arguments with the decoder for the reply shape the server answers
//! with.

use bytes::Bytes;

use crate::error::{KvError, Result};
use crate::protocol::command::{Command, ReplyDecoder};
use crate::protocol::wire::WireReply;

// ============================================================================
// Standard decoders
// ============================================================================

/// Expects a simple-string acknowledgment, discarding its text.
pub struct OkReply;

impl ReplyDecoder for OkReply {
    type Output = ();

    fn decode(&mut self, reply: WireReply) -> Result<()> {
        match reply {
            WireReply::Simple(_) => Ok(()),
            other => Err(KvError::Decode(format!(
                "expected status reply, got {:?}",
                other
            ))),
        }
    }
}

/// Expects a simple string (or a bulk payload) as text.
pub struct SimpleReply;

impl ReplyDecoder for SimpleReply {
    type Output = String;

    fn decode(&mut self, reply: WireReply) -> Result<String> {
        match reply {
            WireReply::Simple(text) => Ok(text),
            WireReply::Bulk(Some(data)) => Ok(String::from_utf8_lossy(&data).into_owned()),
            other => Err(KvError::Decode(format!(
                "expected text reply, got {:?}",
                other
            ))),
        }
    }
}

/// Expects a bulk payload; the null bulk maps to `None`.
pub struct BulkReply;

impl ReplyDecoder for BulkReply {
    type Output = Option<Bytes>;

    fn decode(&mut self, reply: WireReply) -> Result<Option<Bytes>> {
        match reply {
            WireReply::Bulk(data) => Ok(data),
            other => Err(KvError::Decode(format!(
                "expected bulk reply, got {:?}",
                other
            ))),
        }
    }
}

/// Expects an integer reply.
pub struct IntegerReply;

impl ReplyDecoder for IntegerReply {
    type Output = i64;

    fn decode(&mut self, reply: WireReply) -> Result<i64> {
        match reply {
            WireReply::Integer(value) => Ok(value),
            other => Err(KvError::Decode(format!(
                "expected integer reply, got {:?}",
                other
            ))),
        }
    }
}

/// Expects an array of replies; the null array (an aborted transaction)
/// maps to `None`.
pub struct ArrayReply;

impl ReplyDecoder for ArrayReply {
    type Output = Option<Vec<WireReply>>;

    fn decode(&mut self, reply: WireReply) -> Result<Option<Vec<WireReply>>> {
        match reply {
            WireReply::Array(elements) => Ok(elements),
            other => Err(KvError::Decode(format!(
                "expected array reply, got {:?}",
                other
            ))),
        }
    }
}

/// Passes the raw reply through undecoded.
pub struct RawReply;

impl ReplyDecoder for RawReply {
    type Output = WireReply;

    fn decode(&mut self, reply: WireReply) -> Result<WireReply> {
        Ok(reply)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// `PING` — connectivity check.
pub fn ping() -> Command<SimpleReply> {
    Command::new("PING", &[], SimpleReply)
}

/// `ECHO message`.
pub fn echo(message: &[u8]) -> Command<BulkReply> {
    Command::new("ECHO", &[message.to_vec()], BulkReply)
}

/// `GET key` — `None` when the key is missing.
pub fn get(key: &[u8]) -> Command<BulkReply> {
    Command::new("GET", &[key.to_vec()], BulkReply)
}

/// `SET key value`.
pub fn set(key: &[u8], value: &[u8]) -> Command<OkReply> {
    Command::new("SET", &[key.to_vec(), value.to_vec()], OkReply)
}

/// `DEL key...` — number of keys removed.
pub fn del(keys: &[&[u8]]) -> Command<IntegerReply> {
    let args: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
    Command::new("DEL", &args, IntegerReply)
}

/// `INCR key` — the incremented value.
pub fn incr(key: &[u8]) -> Command<IntegerReply> {
    Command::new("INCR", &[key.to_vec()], IntegerReply)
}

/// `MULTI` — open a transaction block. Exempt from the transaction guard.
pub fn multi() -> Command<OkReply> {
    Command::new("MULTI", &[], OkReply).guard_exempt()
}

/// `EXEC` — execute the open transaction block. Exempt from the
/// transaction guard; a null array means the transaction aborted.
pub fn exec() -> Command<ArrayReply> {
    Command::new("EXEC", &[], ArrayReply).guard_exempt()
}

/// Arbitrary command with a raw, undecoded reply.
pub fn raw(keyword: impl Into<std::borrow::Cow<'static, str>>, args: &[Vec<u8>]) -> Command<RawReply> {
    Command::new(keyword, args, RawReply)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::QueuedCommand;

    #[test]
    fn builders_encode_expected_frames() {
        let cmd = ping();
        assert_eq!(&QueuedCommand::frame(&cmd)[..], b"*1\r\n$4\r\nPING\r\n");

        let cmd = set(b"k", b"v");
        assert_eq!(
            &QueuedCommand::frame(&cmd)[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"
        );

        let cmd = del(&[b"a", b"b"]);
        assert_eq!(
            &QueuedCommand::frame(&cmd)[..],
            b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n"
        );
    }

    #[test]
    fn transaction_controls_are_guard_exempt() {
        assert!(QueuedCommand::skips_tx_guard(&multi()));
        assert!(QueuedCommand::skips_tx_guard(&exec()));
        assert!(!QueuedCommand::skips_tx_guard(&ping()));
        assert!(!QueuedCommand::skips_tx_guard(&get(b"k")));
    }

    #[test]
    fn decoders_accept_their_shapes() {
        assert!(OkReply.decode(WireReply::Simple("OK".into())).is_ok());
        assert_eq!(
            SimpleReply.decode(WireReply::Simple("PONG".into())).unwrap(),
            "PONG"
        );
        assert_eq!(
            BulkReply
                .decode(WireReply::Bulk(Some(Bytes::from_static(b"v"))))
                .unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        assert_eq!(BulkReply.decode(WireReply::Bulk(None)).unwrap(), None);
        assert_eq!(IntegerReply.decode(WireReply::Integer(3)).unwrap(), 3);
        assert_eq!(
            ArrayReply.decode(WireReply::Array(None)).unwrap(),
            None,
            "aborted transaction"
        );
    }

    #[test]
    fn decoders_reject_mismatched_shapes() {
        assert!(matches!(
            OkReply.decode(WireReply::Integer(1)),
            Err(KvError::Decode(_))
        ));
        assert!(matches!(
            IntegerReply.decode(WireReply::Simple("OK".into())),
            Err(KvError::Decode(_))
        ));
        assert!(matches!(
            BulkReply.decode(WireReply::Array(Some(vec![]))),
            Err(KvError::Decode(_))
        ));
    }
}
