//! MessagePack tag-value encoding using the low-level `rmp` API.
//!
//! Header and context frames are maps from short string tags to typed
//! values. The `rmp` writers are used with explicit widths (`write_i8`,
//! `write_i32`, `write_i64`) rather than the compact "smallest fitting
//! integer" form, so the wire marker always tells the decoder whether a
//! value is a byte, an int or a long.
//!
//! # Example
//!
//! ```
//! use cmwlight_client::codec::{decode_map, encode_map, FieldMap, FieldValue};
//!
//! let mut map = FieldMap::new();
//! map.insert("0".into(), FieldValue::Long(42));
//! map.insert("1".into(), FieldValue::from("GSCD001"));
//!
//! let bytes = encode_map(&map).unwrap();
//! assert_eq!(decode_map(&bytes).unwrap(), map);
//! ```

use rmp::encode::ValueWriteError;
use rmp::Marker;

use super::value::{FieldMap, FieldValue};
use crate::error::ProtocolError;

/// Maximum nesting depth of maps accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Encode a field map.
///
/// # Errors
///
/// Only fails if the underlying writer fails, which a `Vec` never does in
/// practice.
pub fn encode_map(map: &FieldMap) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    write_map(&mut buf, map).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok(buf)
}

/// Decode a field map. The whole input must be consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for truncated input, trailing bytes,
/// non-string keys or markers outside the supported value types, and
/// [`ProtocolError::InvalidUtf8`] for broken strings.
pub fn decode_map(bytes: &[u8]) -> Result<FieldMap, ProtocolError> {
    let mut rd = bytes;
    let map = read_map(&mut rd, 0)?;
    if !rd.is_empty() {
        return Err(ProtocolError::Malformed(format!(
            "{} trailing byte(s) after map",
            rd.len()
        )));
    }
    Ok(map)
}

// ============================================================================
// Encoding
// ============================================================================

fn write_map(buf: &mut Vec<u8>, map: &FieldMap) -> Result<(), ValueWriteError> {
    rmp::encode::write_map_len(buf, map.len() as u32)?;
    for (key, value) in map {
        rmp::encode::write_str(buf, key)?;
        write_value(buf, value)?;
    }
    Ok(())
}

fn write_value(buf: &mut Vec<u8>, value: &FieldValue) -> Result<(), ValueWriteError> {
    match value {
        FieldValue::Bool(v) => {
            let marker = if *v { Marker::True } else { Marker::False };
            buf.push(marker.to_u8());
        }
        FieldValue::Byte(v) => rmp::encode::write_i8(buf, *v)?,
        FieldValue::Int(v) => rmp::encode::write_i32(buf, *v)?,
        FieldValue::Long(v) => rmp::encode::write_i64(buf, *v)?,
        FieldValue::Double(v) => rmp::encode::write_f64(buf, *v)?,
        FieldValue::Str(v) => rmp::encode::write_str(buf, v)?,
        FieldValue::Map(m) => write_map(buf, m)?,
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

fn malformed(err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Malformed(err.to_string())
}

fn peek_marker(rd: &[u8]) -> Result<Marker, ProtocolError> {
    rd.first()
        .map(|b| Marker::from_u8(*b))
        .ok_or_else(|| ProtocolError::Malformed("unexpected end of input".into()))
}

fn read_map(rd: &mut &[u8], depth: usize) -> Result<FieldMap, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::Malformed(format!(
            "maps nested deeper than {MAX_NESTING_DEPTH}"
        )));
    }

    let len = rmp::decode::read_map_len(rd).map_err(malformed)?;
    let mut map = FieldMap::new();
    for _ in 0..len {
        let key = match peek_marker(rd)? {
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => read_string(rd)?,
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "map key must be a string, got {other:?}"
                )))
            }
        };
        let value = read_value(rd, depth)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn read_value(rd: &mut &[u8], depth: usize) -> Result<FieldValue, ProtocolError> {
    let value = match peek_marker(rd)? {
        Marker::True | Marker::False => {
            FieldValue::Bool(rmp::decode::read_bool(rd).map_err(malformed)?)
        }
        Marker::I8 => FieldValue::Byte(rmp::decode::read_i8(rd).map_err(malformed)?),
        Marker::I32 => FieldValue::Int(rmp::decode::read_i32(rd).map_err(malformed)?),
        Marker::I64 => FieldValue::Long(rmp::decode::read_i64(rd).map_err(malformed)?),
        Marker::F64 => FieldValue::Double(rmp::decode::read_f64(rd).map_err(malformed)?),
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
            FieldValue::Str(read_string(rd)?)
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            FieldValue::Map(read_map(rd, depth + 1)?)
        }
        other => {
            return Err(ProtocolError::Malformed(format!(
                "unsupported value marker {other:?}"
            )))
        }
    };
    Ok(value)
}

fn read_string(rd: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = rmp::decode::read_str_len(rd).map_err(malformed)? as usize;
    if rd.len() < len {
        return Err(ProtocolError::Malformed(format!(
            "string of {len} bytes truncated to {}",
            rd.len()
        )));
    }
    let (raw, rest) = rd.split_at(len);
    *rd = rest;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8("map string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FieldMap {
        let mut inner = FieldMap::new();
        inner.insert("a".into(), FieldValue::Long(-5));
        inner.insert("flag".into(), FieldValue::Bool(false));

        let mut map = FieldMap::new();
        map.insert("0".into(), FieldValue::Long(1_234_567_890_123));
        map.insert("1".into(), FieldValue::from("GSCD001"));
        map.insert("2".into(), FieldValue::Byte(5));
        map.insert("3".into(), FieldValue::Map(inner));
        map.insert("i".into(), FieldValue::Int(-70_000));
        map.insert("d".into(), FieldValue::Double(0.25));
        map.insert("t".into(), FieldValue::Bool(true));
        map
    }

    #[test]
    fn test_encode_decode_map() {
        let map = sample();
        let bytes = encode_map(&map).unwrap();
        assert_eq!(decode_map(&bytes).unwrap(), map);
    }

    #[test]
    fn test_small_values_keep_their_width() {
        let mut map = FieldMap::new();
        map.insert("l".into(), FieldValue::Long(1));
        map.insert("i".into(), FieldValue::Int(1));
        map.insert("b".into(), FieldValue::Byte(1));
        let decoded = decode_map(&encode_map(&map).unwrap()).unwrap();

        assert_eq!(decoded["l"], FieldValue::Long(1));
        assert_eq!(decoded["i"], FieldValue::Int(1));
        assert_eq!(decoded["b"], FieldValue::Byte(1));
    }

    #[test]
    fn test_empty_map() {
        let bytes = encode_map(&FieldMap::new()).unwrap();
        assert_eq!(bytes, vec![0x80]);
        assert!(decode_map(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode_map(&sample()).unwrap();
        let result = decode_map(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode_map(&sample()).unwrap();
        bytes.push(0xc0);
        assert!(matches!(decode_map(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_rejects_non_string_key() {
        // fixmap(1) { 1: 2 }
        let bytes = [0x81, 0x01, 0x02];
        assert!(matches!(decode_map(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_rejects_unsupported_marker() {
        // fixmap(1) { "a": nil }
        let bytes = [0x81, 0xa1, b'a', 0xc0];
        assert!(matches!(decode_map(&bytes), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        // fixmap(1) { "a": str(2) [0xff, 0xfe] }
        let bytes = [0x81, 0xa1, b'a', 0xa2, 0xff, 0xfe];
        assert_eq!(
            decode_map(&bytes),
            Err(ProtocolError::InvalidUtf8("map string"))
        );
    }

    #[test]
    fn test_rejects_excessive_nesting() {
        let mut map = FieldMap::new();
        for _ in 0..(MAX_NESTING_DEPTH + 2) {
            let mut outer = FieldMap::new();
            outer.insert("m".into(), FieldValue::Map(map));
            map = outer;
        }
        let bytes = encode_map(&map).unwrap();
        assert!(matches!(decode_map(&bytes), Err(ProtocolError::Malformed(_))));
    }
}
