//! # Tuplespace Codec
//!
//! Entry value model and binary encoding for the tuplespace engine.
//!
//! This crate provides:
//! - [`Value`], the dynamic payload of every entry
//! - [`ValueKind`], the kind tag that decides comparability
//! - [`Path`], property paths resolved into [`Resolved`] outcomes
//! - CBOR encoding of values and of any serde type via `ciborium`
//!
//! ## Orderings
//!
//! - [`Value::natural_cmp`] only compares values of the same comparable kind
//! - [`Value::index_cmp`] is a total order used by ordered indexes
//!
//! ## Usage
//!
//! ```
//! use tuplespace_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::record([("seat", Value::Integer(10))]);
//! let bytes = to_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod path;
mod value;

pub use cbor::{decode_from_slice, encode_to_vec, from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use path::{Path, PathSegment, Resolved};
pub use value::{Value, ValueKind};

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
