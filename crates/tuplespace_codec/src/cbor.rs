//! CBOR encoding through `ciborium`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Encode a value to CBOR bytes.
///
/// Map keys are emitted in the order held by the value; maps built with
/// [`Value::map`] are sorted, so equal values encode identically.
///
/// # Errors
///
/// Returns `EncodingFailed` if the writer fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    encode_to_vec(&to_cbor_value(value))
}

/// Decode CBOR bytes into a value.
///
/// Tags are stripped and their content kept.
///
/// # Errors
///
/// Returns `DecodingFailed` for malformed input, trailing garbage or
/// integers outside the i64 range.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let raw: ciborium::Value = decode_from_slice(bytes)?;
    from_cbor_value(raw)
}

/// Encode any serializable type to CBOR bytes.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn encode_to_vec<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(format!("{e:?}")))?;
    Ok(buf)
}

/// Decode any deserializable type from CBOR bytes.
///
/// # Errors
///
/// Returns `DecodingFailed` if the bytes are not a valid encoding of `T`.
pub fn decode_from_slice<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(format!("{e:?}")))?;
    if !reader.is_empty() {
        return Err(CodecError::decoding_failed(format!(
            "{} trailing bytes",
            reader.len()
        )));
    }
    Ok(value)
}

fn to_cbor_value(value: &Value) -> ciborium::Value {
    match value {
        Value::Null => ciborium::Value::Null,
        Value::Bool(b) => ciborium::Value::Bool(*b),
        Value::Integer(n) => ciborium::Value::Integer((*n).into()),
        Value::Float(n) => ciborium::Value::Float(*n),
        Value::Bytes(b) => ciborium::Value::Bytes(b.clone()),
        Value::Text(s) => ciborium::Value::Text(s.clone()),
        Value::Array(items) => ciborium::Value::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(pairs) => ciborium::Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (to_cbor_value(k), to_cbor_value(v)))
                .collect(),
        ),
    }
}

fn from_cbor_value(raw: ciborium::Value) -> CodecResult<Value> {
    Ok(match raw {
        ciborium::Value::Null => Value::Null,
        ciborium::Value::Bool(b) => Value::Bool(b),
        ciborium::Value::Integer(n) => Value::Integer(
            i64::try_from(n)
                .map_err(|_| CodecError::decoding_failed("integer out of i64 range"))?,
        ),
        ciborium::Value::Float(n) => Value::Float(n),
        ciborium::Value::Bytes(b) => Value::Bytes(b),
        ciborium::Value::Text(s) => Value::Text(s),
        ciborium::Value::Tag(_, inner) => from_cbor_value(*inner)?,
        ciborium::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor_value)
                .collect::<CodecResult<_>>()?,
        ),
        ciborium::Value::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((from_cbor_value(k)?, from_cbor_value(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
        other => {
            return Err(CodecError::decoding_failed(format!(
                "unsupported CBOR item: {other:?}"
            )))
        }
    })
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_cbor_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = ciborium::Value::deserialize(deserializer)?;
        from_cbor_value(raw).map_err(serde::de::Error::custom)
    }
}
