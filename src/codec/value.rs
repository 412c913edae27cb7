//! # Value Encoding and Key Order
//!
//! `Value` is the JSON-like payload type used for keys and stored values.
//! The encoding is a one-byte tag followed by a type-specific payload; small
//! values inline their length (or the value itself) in the tag byte so the
//! common cases cost a single byte of overhead or less.
//!
//! ## Tag Table
//!
//! ```text
//! 0x00        null
//! 0x01        undefined
//! 0x02        false
//! 0x03        true
//! 0x04        f64, 8 bytes LE
//! 0x05        non-negative integer, varint
//! 0x06        negative integer, varint magnitude
//! 0x07        string, varint byte length
//! 0x08        blob, varint byte length
//! 0x09        array, varint element count
//! 0x0A        object, varint entry count
//! 0x10..0x2F  string, inline byte length 0..=31
//! 0x30..0x37  blob, inline byte length 0..=7
//! 0x38..0x3F  array, inline element count 0..=7
//! 0x40..0x47  object, inline entry count 0..=7
//! 0x49..0x4F  integers -7..=-1
//! 0x80..0xFF  integers 0..=127
//! ```
//!
//! Integers in -7..=127 therefore cost exactly one byte. Numbers that are
//! integral and within ±2^31 use the integer encodings; every other number
//! falls back to the 9-byte f64 form. Object entries are encoded sorted by
//! key, and the decoder rejects unsorted entries, so an encoded object has
//! exactly one byte representation.
//!
//! ## Key Order
//!
//! [`Value::key_cmp`] defines the total order tree keys sort in. It must be
//! reproduced exactly for range-query correctness:
//!
//! - Type rank: null < bool < number < string < blob < array < object
//!   < undefined (undefined sorts last, the JS `sort` convention)
//! - false < true
//! - Numbers by value; NaN compares equal to itself and greater than every
//!   other number
//! - Strings by Unicode code point, blobs bytewise
//! - Arrays element-wise, shorter-is-less on ties
//! - Objects by their sorted (key, value) entry lists
//!
//! ## JSON Mapping
//!
//! `to_json`/`from_json` provide the lossless mapping used by dump/import.
//! Values without a native JSON form are wrapped: `{"$undefined": true}`,
//! `{"$blob": "<hex>"}`, and `{"$number": "nan" | "inf" | "-inf"}`.

use std::cmp::Ordering;

use serde_json::json;

use crate::codec::varint::{decode_uvarint, encode_uvarint, uvarint_len};
use crate::codec::Reader;
use crate::error::Result;

const TAG_NULL: u8 = 0x00;
const TAG_UNDEFINED: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_TRUE: u8 = 0x03;
const TAG_F64: u8 = 0x04;
const TAG_POS_INT: u8 = 0x05;
const TAG_NEG_INT: u8 = 0x06;
const TAG_STRING: u8 = 0x07;
const TAG_BLOB: u8 = 0x08;
const TAG_ARRAY: u8 = 0x09;
const TAG_OBJECT: u8 = 0x0A;

const TAG_STRING_INLINE: u8 = 0x10;
const MAX_INLINE_STRING: usize = 31;
const TAG_BLOB_INLINE: u8 = 0x30;
const MAX_INLINE_BLOB: usize = 7;
const TAG_ARRAY_INLINE: u8 = 0x38;
const MAX_INLINE_ARRAY: usize = 7;
const TAG_OBJECT_INLINE: u8 = 0x40;
const MAX_INLINE_OBJECT: usize = 7;

const TAG_NEG_INLINE_BASE: u8 = 0x50;
const MIN_INLINE_INT: i64 = -7;
const TAG_POS_INLINE: u8 = 0x80;
const MAX_INLINE_INT: i64 = 127;

const INT_MAGNITUDE_LIMIT: i64 = 1 << 31;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    /// Entries sorted by key. Use [`Value::object`] to construct.
    Object(Vec<(String, Value)>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) | (Undefined, Undefined) => true,
            (Bool(a), Bool(b)) => a == b,
            // NaN equals itself here so decode(encode(v)) == v holds.
            (Number(a), Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (String(a), String(b)) => a == b,
            (Blob(a), Blob(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl Value {
    /// Builds an object value, sorting entries by key. A repeated key keeps
    /// the last occurrence.
    pub fn object<K: Into<String>>(entries: Vec<(K, Value)>) -> Value {
        let mut pairs: Vec<(String, Value)> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| {
            if a.0 == b.0 {
                std::mem::swap(&mut a.1, &mut b.1);
                true
            } else {
                false
            }
        });
        Value::Object(pairs)
    }

    pub fn blob(bytes: Vec<u8>) -> Value {
        Value::Blob(bytes)
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(values)
    }

    /// Looks up a field on an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs
                .binary_search_by(|(k, _)| k.as_str().cmp(key))
                .ok()
                .map(|i| &pairs[i].1),
            _ => None,
        }
    }

    /// Sets a field on an object value; no-op on other types.
    pub fn set_field(&mut self, key: &str, value: Value) {
        if let Value::Object(pairs) = self {
            match pairs.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
                Ok(i) => pairs[i].1 = value,
                Err(i) => pairs.insert(i, (key.to_owned(), value)),
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Blob(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
            Value::Undefined => 7,
        }
    }

    /// The total order tree keys sort in. See the module docs for the exact
    /// semantics, including the NaN and undefined edge cases.
    pub fn key_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Number(a), Number(b)) => match a.partial_cmp(b) {
                Some(ord) => ord,
                None => match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => Ordering::Equal,
                },
            },
            (String(a), String(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),
            (Array(a), Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.key_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Object(a), Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    let ord = va.key_cmp(vb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Integral numbers within ±2^31 use the compact integer encodings.
    fn as_compact_int(&self) -> Option<i64> {
        let n = self.as_f64()?;
        if !n.is_finite() || n.fract() != 0.0 {
            return None;
        }
        let i = n as i64;
        if (-INT_MAGNITUDE_LIMIT..INT_MAGNITUDE_LIMIT).contains(&i) {
            Some(i)
        } else {
            None
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(TAG_NULL),
            Value::Undefined => out.push(TAG_UNDEFINED),
            Value::Bool(false) => out.push(TAG_FALSE),
            Value::Bool(true) => out.push(TAG_TRUE),
            Value::Number(n) => match self.as_compact_int() {
                Some(i) if (0..=MAX_INLINE_INT).contains(&i) => {
                    out.push(TAG_POS_INLINE + i as u8);
                }
                Some(i) if (MIN_INLINE_INT..0).contains(&i) => {
                    out.push((TAG_NEG_INLINE_BASE as i64 + i) as u8);
                }
                Some(i) if i >= 0 => {
                    out.push(TAG_POS_INT);
                    encode_uvarint(i as u32, out);
                }
                Some(i) => {
                    out.push(TAG_NEG_INT);
                    encode_uvarint((-i) as u32, out);
                }
                None => {
                    out.push(TAG_F64);
                    out.extend_from_slice(&n.to_bits().to_le_bytes());
                }
            },
            Value::String(s) => {
                if s.len() <= MAX_INLINE_STRING {
                    out.push(TAG_STRING_INLINE + s.len() as u8);
                } else {
                    out.push(TAG_STRING);
                    encode_uvarint(s.len() as u32, out);
                }
                out.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                if b.len() <= MAX_INLINE_BLOB {
                    out.push(TAG_BLOB_INLINE + b.len() as u8);
                } else {
                    out.push(TAG_BLOB);
                    encode_uvarint(b.len() as u32, out);
                }
                out.extend_from_slice(b);
            }
            Value::Array(items) => {
                if items.len() <= MAX_INLINE_ARRAY {
                    out.push(TAG_ARRAY_INLINE + items.len() as u8);
                } else {
                    out.push(TAG_ARRAY);
                    encode_uvarint(items.len() as u32, out);
                }
                for item in items {
                    item.encode(out);
                }
            }
            Value::Object(pairs) => {
                if pairs.len() <= MAX_INLINE_OBJECT {
                    out.push(TAG_OBJECT_INLINE + pairs.len() as u8);
                } else {
                    out.push(TAG_OBJECT);
                    encode_uvarint(pairs.len() as u32, out);
                }
                for (key, val) in pairs {
                    Value::String(key.clone()).encode(out);
                    val.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Exact encoded byte length, without encoding. Used for node free-space
    /// accounting.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Null | Value::Undefined | Value::Bool(_) => 1,
            Value::Number(_) => match self.as_compact_int() {
                Some(i) if (MIN_INLINE_INT..=MAX_INLINE_INT).contains(&i) => 1,
                Some(i) => 1 + uvarint_len(i.unsigned_abs() as u32),
                None => 9,
            },
            Value::String(s) => {
                if s.len() <= MAX_INLINE_STRING {
                    1 + s.len()
                } else {
                    1 + uvarint_len(s.len() as u32) + s.len()
                }
            }
            Value::Blob(b) => {
                if b.len() <= MAX_INLINE_BLOB {
                    1 + b.len()
                } else {
                    1 + uvarint_len(b.len() as u32) + b.len()
                }
            }
            Value::Array(items) => {
                let head = if items.len() <= MAX_INLINE_ARRAY {
                    1
                } else {
                    1 + uvarint_len(items.len() as u32)
                };
                head + items.iter().map(Value::encoded_len).sum::<usize>()
            }
            Value::Object(pairs) => {
                let head = if pairs.len() <= MAX_INLINE_OBJECT {
                    1
                } else {
                    1 + uvarint_len(pairs.len() as u32)
                };
                head + pairs
                    .iter()
                    .map(|(k, v)| Value::String(k.clone()).encoded_len() + v.encoded_len())
                    .sum::<usize>()
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Value> {
        let tag = r.u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_UNDEFINED => Ok(Value::Undefined),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_F64 => {
                let bits = r.u64()?;
                Ok(Value::Number(f64::from_bits(bits)))
            }
            TAG_POS_INT => Ok(Value::Number(decode_uvarint(r)? as f64)),
            TAG_NEG_INT => Ok(Value::Number(-(decode_uvarint(r)? as f64))),
            TAG_STRING => {
                let len = decode_uvarint(r)? as usize;
                Self::decode_string(r, len)
            }
            TAG_BLOB => {
                let len = decode_uvarint(r)? as usize;
                Ok(Value::Blob(r.take(len)?.to_vec()))
            }
            TAG_ARRAY => {
                let count = decode_uvarint(r)? as usize;
                Self::decode_array(r, count)
            }
            TAG_OBJECT => {
                let count = decode_uvarint(r)? as usize;
                Self::decode_object(r, count)
            }
            t if (TAG_STRING_INLINE..=TAG_STRING_INLINE + MAX_INLINE_STRING as u8).contains(&t) => {
                Self::decode_string(r, (t - TAG_STRING_INLINE) as usize)
            }
            t if (TAG_BLOB_INLINE..=TAG_BLOB_INLINE + MAX_INLINE_BLOB as u8).contains(&t) => {
                Ok(Value::Blob(r.take((t - TAG_BLOB_INLINE) as usize)?.to_vec()))
            }
            t if (TAG_ARRAY_INLINE..=TAG_ARRAY_INLINE + MAX_INLINE_ARRAY as u8).contains(&t) => {
                Self::decode_array(r, (t - TAG_ARRAY_INLINE) as usize)
            }
            t if (TAG_OBJECT_INLINE..=TAG_OBJECT_INLINE + MAX_INLINE_OBJECT as u8).contains(&t) => {
                Self::decode_object(r, (t - TAG_OBJECT_INLINE) as usize)
            }
            t if t > TAG_NEG_INLINE_BASE - 8 && t < TAG_NEG_INLINE_BASE => {
                Ok(Value::Number((t as i64 - TAG_NEG_INLINE_BASE as i64) as f64))
            }
            t if t >= TAG_POS_INLINE => Ok(Value::Number((t - TAG_POS_INLINE) as f64)),
            t => corrupted!("unknown value tag 0x{t:02x}"),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        let mut r = Reader::new(bytes);
        let value = Value::decode(&mut r)?;
        ensure_format!(r.is_empty(), "{} trailing bytes after value", r.remaining());
        Ok(value)
    }

    fn decode_string(r: &mut Reader<'_>, len: usize) -> Result<Value> {
        let raw = r.take(len)?;
        match std::str::from_utf8(raw) {
            Ok(s) => Ok(Value::String(s.to_owned())),
            Err(_) => corrupted!("string value is not valid UTF-8"),
        }
    }

    fn decode_array(r: &mut Reader<'_>, count: usize) -> Result<Value> {
        let mut items = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            items.push(Value::decode(r)?);
        }
        Ok(Value::Array(items))
    }

    fn decode_object(r: &mut Reader<'_>, count: usize) -> Result<Value> {
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let key = match Value::decode(r)? {
                Value::String(s) => s,
                other => corrupted!("object key must be a string, got {other:?}"),
            };
            if let Some((prev, _)) = pairs.last() {
                ensure_format!(prev < &key, "object keys out of order: {prev:?} >= {key:?}");
            }
            let val = Value::decode(r)?;
            pairs.push((key, val));
        }
        Ok(Value::Object(pairs))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Undefined => json!({ "$undefined": true }),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.is_nan() {
                    json!({ "$number": "nan" })
                } else if n.is_infinite() {
                    json!({ "$number": if *n > 0.0 { "inf" } else { "-inf" } })
                } else {
                    json!(n)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => json!({ "$blob": hex_encode(b) }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(pairs) => serde_json::Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                Value::Number(n.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::Bool(true)) = map.get("$undefined") {
                        return Ok(Value::Undefined);
                    }
                    if let Some(serde_json::Value::String(hex)) = map.get("$blob") {
                        return Ok(Value::Blob(hex_decode(hex)?));
                    }
                    if let Some(serde_json::Value::String(kind)) = map.get("$number") {
                        return Ok(Value::Number(match kind.as_str() {
                            "nan" => f64::NAN,
                            "inf" => f64::INFINITY,
                            "-inf" => f64::NEG_INFINITY,
                            other => {
                                return Err(crate::error::DbError::Invalid(format!(
                                    "unknown $number marker {other:?}"
                                )))
                            }
                        }));
                    }
                }
                let mut pairs = Vec::with_capacity(map.len());
                for (k, v) in map {
                    pairs.push((k.clone(), Value::from_json(v)?));
                }
                Value::object(pairs)
            }
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(crate::error::DbError::Invalid("odd-length hex blob".into()));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let raw = s.as_bytes();
    for pair in raw.chunks(2) {
        let hi = hex_nibble(pair[0])?;
        let lo = hex_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(crate::error::DbError::Invalid(format!(
            "invalid hex digit {:?}",
            c as char
        ))),
    }
}
