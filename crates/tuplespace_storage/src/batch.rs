//! Write batches and their checksummed frame encoding.
//!
//! A frame is laid out as:
//!
//! ```text
//! | magic (4) | payload len (4, LE) | payload | checksum (8) |
//! ```
//!
//! The checksum is the first eight bytes of the SHA-256 digest of the
//! payload. The payload is an op count followed by tagged ops.

use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};

/// Magic bytes that open every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"TSB1";

/// Fixed bytes around a frame payload.
pub const FRAME_OVERHEAD: usize = 4 + 4 + CHECKSUM_LEN;

const CHECKSUM_LEN: usize = 8;
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key. Removing an absent key is not an error.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the key this op touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// An ordered group of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Returns the staged ops in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of staged ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encodes this batch as a complete frame.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.extend_from_slice(&len_u32(payload.len()).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&checksum(&payload));
        frame
    }

    /// Decodes one frame from the start of `data`.
    ///
    /// Returns the batch and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` when `data` ends inside the frame and
    /// `Corrupted` when the magic, checksum or payload is invalid.
    pub fn decode_frame(data: &[u8], offset: u64) -> StorageResult<(Self, usize)> {
        if data.len() < 8 {
            return Err(StorageError::Truncated {
                offset,
                needed: 8,
                available: data.len(),
            });
        }
        if data[..4] != FRAME_MAGIC {
            return Err(StorageError::Corrupted(format!(
                "bad frame magic at offset {offset}"
            )));
        }
        let payload_len = read_u32(&data[4..8]) as usize;
        let total = payload_len + FRAME_OVERHEAD;
        if data.len() < total {
            return Err(StorageError::Truncated {
                offset,
                needed: total,
                available: data.len(),
            });
        }
        let payload = &data[8..8 + payload_len];
        let stored = &data[8 + payload_len..total];
        if stored != checksum(payload) {
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch at offset {offset}"
            )));
        }
        let batch = Self::decode_payload(payload)
            .ok_or_else(|| StorageError::Corrupted(format!("bad payload at offset {offset}")))?;
        Ok((batch, total))
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&len_u32(self.ops.len()).to_le_bytes());
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    out.push(OP_PUT);
                    put_bytes(&mut out, key);
                    put_bytes(&mut out, value);
                }
                BatchOp::Delete { key } => {
                    out.push(OP_DELETE);
                    put_bytes(&mut out, key);
                }
            }
        }
        out
    }

    fn decode_payload(payload: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { data: payload };
        let count = cursor.u32()? as usize;
        let mut ops = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let op = match cursor.u8()? {
                OP_PUT => BatchOp::Put {
                    key: cursor.bytes()?,
                    value: cursor.bytes()?,
                },
                OP_DELETE => BatchOp::Delete {
                    key: cursor.bytes()?,
                },
                _ => return None,
            };
            ops.push(op);
        }
        cursor.data.is_empty().then_some(Self { ops })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl Cursor<'_> {
    fn u8(&mut self) -> Option<u8> {
        let (first, rest) = self.data.split_first()?;
        self.data = rest;
        Some(*first)
    }

    fn u32(&mut self) -> Option<u32> {
        if self.data.len() < 4 {
            return None;
        }
        let (head, rest) = self.data.split_at(4);
        self.data = rest;
        Some(read_u32(head))
    }

    fn bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.u32()? as usize;
        if self.data.len() < len {
            return None;
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Some(head.to_vec())
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&len_u32(bytes.len()).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

#[allow(clippy::cast_possible_truncation)]
fn len_u32(len: usize) -> u32 {
    len as u32
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}
