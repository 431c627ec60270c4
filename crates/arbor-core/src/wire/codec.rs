//! MessagePack codec.
//!
//! Structured bodies (requests/responses) are encoded as named maps so a
//! decoder can ignore unknown keys; scalar envelope frames (timestamps,
//! flags) use the plain self-describing encoding. The lenient `frame_*`
//! readers mirror the peer contract: a frame that does not decode to the
//! expected shape reads as "absent", never as an error.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a structured body as a named map.
pub fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a structured body. Unknown keys are ignored by the serde derives.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a scalar frame (compact, self-describing).
pub fn pack_scalar<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Read a frame as a float. Integers widen; anything else, including an
/// empty or undecodable frame, is `None`.
pub fn frame_f64(frame: &[u8]) -> Option<f64> {
    let value: rmpv::Value = rmp_serde::from_slice(frame).ok()?;
    match value {
        rmpv::Value::F64(f) => Some(f),
        rmpv::Value::F32(f) => Some(f as f64),
        rmpv::Value::Integer(i) => i.as_f64(),
        _ => None,
    }
}

/// Read a frame as a boolean flag, with truthiness rules for non-boolean
/// scalars. An empty or undecodable frame is `None`.
pub fn frame_bool(frame: &[u8]) -> Option<bool> {
    let value: rmpv::Value = rmp_serde::from_slice(frame).ok()?;
    let flag = match value {
        rmpv::Value::Boolean(b) => b,
        rmpv::Value::Nil => false,
        rmpv::Value::Integer(i) => i.as_i64() != Some(0),
        _ => true,
    };
    Some(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_floats_round_trip() {
        let bytes = pack_scalar(&123.5f64).unwrap();
        assert_eq!(frame_f64(&bytes), Some(123.5));
    }

    #[test]
    fn integers_widen_to_float() {
        let bytes = pack_scalar(&7i64).unwrap();
        assert_eq!(frame_f64(&bytes), Some(7.0));
    }

    #[test]
    fn non_numeric_frames_read_as_absent() {
        assert_eq!(frame_f64(b""), None);
        let bytes = pack_scalar(&"not a number").unwrap();
        assert_eq!(frame_f64(&bytes), None);
    }

    #[test]
    fn bool_frames_and_truthiness() {
        assert_eq!(frame_bool(&pack_scalar(&false).unwrap()), Some(false));
        assert_eq!(frame_bool(&pack_scalar(&true).unwrap()), Some(true));
        // msgpack nil is falsy, a non-zero integer truthy
        assert_eq!(frame_bool(&pack_scalar(&Option::<bool>::None).unwrap()), Some(false));
        assert_eq!(frame_bool(&pack_scalar(&3i64).unwrap()), Some(true));
        assert_eq!(frame_bool(b""), None);
    }

    #[test]
    fn canonical_false_is_one_byte() {
        // The envelope's default service flag relies on this encoding.
        assert_eq!(pack_scalar(&false).unwrap(), vec![0xc2]);
    }
}
