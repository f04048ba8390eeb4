//! A minimal, deterministic dag-cbor codec.
//!
//! Only the subset of CBOR that this system's node shapes need: unsigned and
//! negative integers up to a 5-byte header (major types 0/1), byte strings
//! and text strings (major types 2/3), arrays, maps with text-string keys,
//! booleans/null, float64, and tag 42 links (`0x00` followed by a 36-byte
//! CIDv1). Map key order is preserved exactly as written; this system only
//! ever writes `"L"`/`"R"` maps, in that order.

use crate::cid::Cid;
use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
    Float(f64),
    Link(Cid),
}

impl Value {
    #[must_use]
    pub fn link_node(left: Cid, right: Cid) -> Self {
        Self::Map(vec![
            ("L".to_owned(), Self::Link(left)),
            ("R".to_owned(), Self::Link(right)),
        ])
    }

    #[must_use]
    pub fn leaf(payload: Vec<u8>) -> Self {
        Self::Bytes(payload)
    }
}

/// The three shapes an MMR node can take once decoded off the wire. A bare
/// `Cid` shape exists in the format but the MMR engine never produces one —
/// it can only arise from a self-describing block returned by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Vec<u8>),
    Link { l: Cid, r: Cid },
    BareCid(Cid),
}

pub fn node_from_value(value: &Value) -> Result<Node, CodecError> {
    match value {
        Value::Bytes(b) => Ok(Node::Leaf(b.clone())),
        Value::Link(cid) => Ok(Node::BareCid(*cid)),
        Value::Map(entries) => {
            let mut l = None;
            let mut r = None;
            for (key, val) in entries {
                let Value::Link(cid) = val else {
                    return Err(CodecError::UnexpectedShape);
                };
                match key.as_str() {
                    "L" => l = Some(*cid),
                    "R" => r = Some(*cid),
                    _ => return Err(CodecError::UnexpectedShape),
                }
            }
            match (l, r) {
                (Some(l), Some(r)) => Ok(Node::Link { l, r }),
                _ => Err(CodecError::UnexpectedShape),
            }
        }
        _ => Err(CodecError::UnexpectedShape),
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xf6),
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Int(n) if *n >= 0 => encode_head(0, *n as u64, out),
        Value::Int(n) => encode_head(1, (-1 - *n) as u64, out),
        Value::Bytes(bytes) => {
            encode_head(2, bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Text(text) => {
            encode_head(3, text.len() as u64, out);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            encode_head(4, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            encode_head(5, entries.len() as u64, out);
            for (key, val) in entries {
                encode_into(&Value::Text(key.clone()), out);
                encode_into(val, out);
            }
        }
        Value::Float(f) => {
            out.push(0xfb);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Link(cid) => {
            // tag 42, additional info 24 (1-byte tag number follows)
            out.push(0xd8);
            out.push(42);
            let bytes = cid.to_bytes();
            encode_head(2, (bytes.len() + 1) as u64, out);
            out.push(0x00);
            out.extend_from_slice(&bytes);
        }
    }
}

/// Encodes a major-type header using the minimal 1/2/3/5-byte form.
fn encode_head(major: u8, value: u64, out: &mut Vec<u8>) {
    let top = major << 5;
    if value < 24 {
        out.push(top | (value as u8));
    } else if value <= u64::from(u8::MAX) {
        out.push(top | 24);
        out.push(value as u8);
    } else if value <= u64::from(u16::MAX) {
        out.push(top | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else {
        out.push(top | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    }
}

pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let (value, consumed) = decode_value(bytes)?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(value)
}

fn decode_value(bytes: &[u8]) -> Result<(Value, usize), CodecError> {
    let &first = bytes.first().ok_or(CodecError::UnexpectedEof)?;
    let major = first >> 5;
    let info = first & 0x1f;

    match major {
        0 => {
            let (n, len) = decode_uint(bytes, info)?;
            Ok((Value::Int(n as i64), len))
        }
        1 => {
            let (n, len) = decode_uint(bytes, info)?;
            Ok((Value::Int(-1 - n as i64), len))
        }
        2 => {
            let (n, head_len) = decode_uint(bytes, info)?;
            let n = n as usize;
            let body = bytes
                .get(head_len..head_len + n)
                .ok_or(CodecError::UnexpectedEof)?;
            Ok((Value::Bytes(body.to_vec()), head_len + n))
        }
        3 => {
            let (n, head_len) = decode_uint(bytes, info)?;
            let n = n as usize;
            let body = bytes
                .get(head_len..head_len + n)
                .ok_or(CodecError::UnexpectedEof)?;
            let text = std::str::from_utf8(body)
                .map_err(|_| CodecError::UnexpectedShape)?
                .to_owned();
            Ok((Value::Text(text), head_len + n))
        }
        4 => {
            let (n, mut offset) = decode_uint(bytes, info)?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (item, len) = decode_value(&bytes[offset..])?;
                items.push(item);
                offset += len;
            }
            Ok((Value::Array(items), offset))
        }
        5 => {
            let (n, mut offset) = decode_uint(bytes, info)?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (key, klen) = decode_value(&bytes[offset..])?;
                offset += klen;
                let Value::Text(key) = key else {
                    return Err(CodecError::NonStringMapKey);
                };
                let (val, vlen) = decode_value(&bytes[offset..])?;
                offset += vlen;
                entries.push((key, val));
            }
            Ok((Value::Map(entries), offset))
        }
        6 => {
            let (tag, head_len) = decode_uint(bytes, info)?;
            if tag != 42 {
                return Err(CodecError::UnsupportedTag(tag));
            }
            let (inner, inner_len) = decode_value(&bytes[head_len..])?;
            let Value::Bytes(payload) = inner else {
                return Err(CodecError::UnexpectedShape);
            };
            let &prefix = payload.first().ok_or(CodecError::UnexpectedEof)?;
            if prefix != 0x00 {
                return Err(CodecError::BadLinkTagPrefix(prefix));
            }
            let cid = Cid::from_bytes(&payload[1..])?;
            Ok((Value::Link(cid), head_len + inner_len))
        }
        7 => match first {
            0xf4 => Ok((Value::Bool(false), 1)),
            0xf5 => Ok((Value::Bool(true), 1)),
            0xf6 => Ok((Value::Null, 1)),
            0xfb => {
                let raw = bytes.get(1..9).ok_or(CodecError::UnexpectedEof)?;
                let mut buf = [0_u8; 8];
                buf.copy_from_slice(raw);
                Ok((Value::Float(f64::from_bits(u64::from_be_bytes(buf))), 9))
            }
            _ => Err(CodecError::UnsupportedMajorType(7)),
        },
        other => Err(CodecError::UnsupportedMajorType(other)),
    }
}

/// Returns `(value, total_header_length)`.
fn decode_uint(bytes: &[u8], info: u8) -> Result<(u64, usize), CodecError> {
    match info {
        0..=23 => Ok((u64::from(info), 1)),
        24 => {
            let b = *bytes.get(1).ok_or(CodecError::UnexpectedEof)?;
            Ok((u64::from(b), 2))
        }
        25 => {
            let raw = bytes.get(1..3).ok_or(CodecError::UnexpectedEof)?;
            Ok((u64::from(u16::from_be_bytes([raw[0], raw[1]])), 3))
        }
        26 => {
            let raw = bytes.get(1..5).ok_or(CodecError::UnexpectedEof)?;
            let mut buf = [0_u8; 4];
            buf.copy_from_slice(raw);
            Ok((u64::from(u32::from_be_bytes(buf)), 5))
        }
        other => Err(CodecError::UnsupportedMajorType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip() {
        let v = Value::Bytes(vec![1, 2, 3, 4, 5]);
        let encoded = encode(&v);
        assert_eq!(decode(&encoded).unwrap(), v);
    }

    #[test]
    fn link_map_roundtrip() {
        let l = Cid::from_digest([1_u8; 32]);
        let r = Cid::from_digest([2_u8; 32]);
        let v = Value::link_node(l, r);
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, v);
        match node_from_value(&decoded).unwrap() {
            Node::Link { l: dl, r: dr } => {
                assert_eq!(dl, l);
                assert_eq!(dr, r);
            }
            _ => panic!("expected link node"),
        }
    }

    #[test]
    fn null_roundtrip() {
        let encoded = encode(&Value::Null);
        assert_eq!(encoded, vec![0xf6]);
        assert_eq!(decode(&encoded).unwrap(), Value::Null);
    }

    #[test]
    fn rejects_bad_tag42_prefix() {
        let cid = Cid::from_digest([9_u8; 32]);
        let mut bytes = cid.to_bytes().to_vec();
        bytes[0] = 0x01; // corrupt the leading 0x00 marker
        let mut encoded = vec![0xd8, 42];
        encode_head(2, bytes.len() as u64, &mut encoded);
        encoded.extend_from_slice(&bytes);
        assert!(matches!(
            decode(&encoded),
            Err(CodecError::BadLinkTagPrefix(_))
        ));
    }

    #[test]
    fn large_byte_string_length_header() {
        let payload = vec![0_u8; 300];
        let v = Value::Bytes(payload.clone());
        let encoded = encode(&v);
        assert_eq!(decode(&encoded).unwrap(), v);
    }
}
