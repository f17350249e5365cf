//! Fuzz testing harnesses.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. Every target must return normally for
//! any input; a panic is a finding.

use tuplespace_codec::{from_cbor, to_cbor, Path};
use tuplespace_core::{
    ContainerDefinition, CoordinationData, CoordinatorKind, CoordinatorSpec, Count,
    RequestContext, RequestTimeout, Selector, Space, Value, WriteEntry,
};
use tuplespace_storage::WriteBatch;

/// Fuzz target for CBOR decoding.
///
/// Tests that arbitrary byte sequences either:
/// - Decode successfully to a valid Value, or
/// - Return a proper error (no panics)
pub fn fuzz_cbor_decode(data: &[u8]) {
    let _ = from_cbor(data);
}

/// Fuzz target for CBOR roundtrip.
///
/// Tests that encoding and decoding preserves values.
pub fn fuzz_cbor_roundtrip(data: &[u8]) {
    if let Ok(value) = from_cbor(data) {
        if let Ok(encoded) = to_cbor(&value) {
            if let Ok(decoded) = from_cbor(&encoded) {
                assert_eq!(
                    format!("{:?}", value),
                    format!("{:?}", decoded),
                    "Roundtrip mismatch"
                );
            }
        }
    }
}

/// Fuzz target for log frame decoding.
///
/// A frame that decodes must re-encode to the bytes it was read from.
pub fn fuzz_frame_decode(data: &[u8]) {
    if let Ok((batch, consumed)) = WriteBatch::decode_frame(data, 0) {
        assert_eq!(batch.encode_frame(), data[..consumed].to_vec());
    }
}

/// Fuzz target for property path parsing.
pub fn fuzz_path_parse(data: &[u8]) {
    if let Ok(expr) = std::str::from_utf8(data) {
        if let Ok(path) = Path::parse(expr) {
            let _ = path.lookup(&Value::Null);
        }
    }
}

/// Fuzz target for request sequences.
///
/// Interprets the input as a stream of operations against a space with a
/// FIFO and a key coordinator. Requests never wait, so the target always
/// terminates.
pub fn fuzz_space_operations(data: &[u8]) {
    let Ok(space) = Space::open_in_memory() else {
        return;
    };
    let Ok(c) = space.create_container(
        ContainerDefinition::named("fuzz")
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
            .optional(CoordinatorSpec::new(CoordinatorKind::Key)),
        RequestContext::new(),
    ) else {
        return;
    };

    let mut tx = None;
    for op in sequence::parse_sequence(data) {
        let ctx = RequestContext {
            transaction: tx,
            ..RequestContext::new().timeout(RequestTimeout::Zero)
        };
        match op {
            sequence::FuzzOp::Write { key, value } => {
                let entry = WriteEntry::new(Value::Integer(i64::from(value)));
                let entry = match key {
                    Some(key) => entry.with(CoordinationData::key(format!("k{key}"))),
                    None => entry,
                };
                let _ = space.write(c.id, vec![entry], ctx);
            }
            sequence::FuzzOp::Take(n) => {
                let _ = space.take(c.id, vec![Selector::fifo(Count::Exactly(n.into()))], ctx);
            }
            sequence::FuzzOp::TakeKey(key) => {
                let _ = space.take(c.id, vec![Selector::key(format!("k{key}"))], ctx);
            }
            sequence::FuzzOp::ReadAll => {
                let _ = space.read(c.id, vec![Selector::fifo(Count::All)], ctx);
            }
            sequence::FuzzOp::Begin => {
                if tx.is_none() {
                    tx = space.begin_transaction().ok();
                }
            }
            sequence::FuzzOp::Commit => {
                if let Some(id) = tx.take() {
                    let _ = space.commit_transaction(id);
                }
            }
            sequence::FuzzOp::Rollback => {
                if let Some(id) = tx.take() {
                    let _ = space.rollback_transaction(id);
                }
            }
        }
    }
    if let Some(id) = tx {
        let _ = space.rollback_transaction(id);
    }
    assert_eq!(space.active_transactions(), 0);
}

/// Decoding of fuzz input into request sequences.
pub mod sequence {
    /// One fuzzed request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FuzzOp {
        /// Write an entry, optionally under a key.
        Write {
            /// Key suffix, if the entry is keyed.
            key: Option<u8>,
            /// Payload.
            value: u8,
        },
        /// Take the oldest `n` entries.
        Take(u8),
        /// Take the entry under a key.
        TakeKey(u8),
        /// Read every entry.
        ReadAll,
        /// Begin an explicit transaction.
        Begin,
        /// Commit the explicit transaction.
        Commit,
        /// Roll the explicit transaction back.
        Rollback,
    }

    /// Parses bytes two at a time into operations.
    pub fn parse_sequence(data: &[u8]) -> Vec<FuzzOp> {
        data.chunks_exact(2)
            .map(|pair| {
                let (op, arg) = (pair[0], pair[1]);
                match op % 8 {
                    0 => FuzzOp::Write {
                        key: None,
                        value: arg,
                    },
                    1 => FuzzOp::Write {
                        key: Some(arg % 8),
                        value: arg,
                    },
                    2 => FuzzOp::Take(arg % 4 + 1),
                    3 => FuzzOp::TakeKey(arg % 8),
                    4 => FuzzOp::ReadAll,
                    5 => FuzzOp::Begin,
                    6 => FuzzOp::Commit,
                    _ => FuzzOp::Rollback,
                }
            })
            .collect()
    }
}
