//! # Variable-Width Unsigned Integers
//!
//! Lengths and counts in the value codec use a 1/3/5-byte varint keyed off a
//! marker byte:
//!
//! | Value Range       | Bytes | Format                    |
//! |-------------------|-------|---------------------------|
//! | 0 - 253           | 1     | `[value]`                 |
//! | 254 - 65535       | 3     | `[0xFE, u16 LE]`          |
//! | 65536 - u32::MAX  | 5     | `[0xFF, u32 LE]`          |
//!
//! Encoders always emit the shortest form; decoders accept a longer form for
//! a small value (the extra width is wasted, not ambiguous).
//!
//! ## Boundary Values
//!
//! Key boundary values for testing: 0, 253, 254, 65535, 65536, u32::MAX.

use crate::codec::Reader;
use crate::error::Result;

const MARKER_U16: u8 = 0xFE;
const MARKER_U32: u8 = 0xFF;
const MAX_INLINE: u32 = 0xFD;

pub fn uvarint_len(value: u32) -> usize {
    if value <= MAX_INLINE {
        1
    } else if value <= u16::MAX as u32 {
        3
    } else {
        5
    }
}

pub fn encode_uvarint(value: u32, out: &mut Vec<u8>) {
    if value <= MAX_INLINE {
        out.push(value as u8);
    } else if value <= u16::MAX as u32 {
        out.push(MARKER_U16);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else {
        out.push(MARKER_U32);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn decode_uvarint(r: &mut Reader<'_>) -> Result<u32> {
    let marker = r.u8()?;
    match marker {
        MARKER_U16 => Ok(r.u16()? as u32),
        MARKER_U32 => r.u32(),
        inline => Ok(inline as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u32) -> usize {
        let mut buf = Vec::new();
        encode_uvarint(value, &mut buf);
        assert_eq!(buf.len(), uvarint_len(value), "length for {value}");

        let mut r = Reader::new(&buf);
        assert_eq!(decode_uvarint(&mut r).unwrap(), value, "value for {value}");
        assert!(r.is_empty());
        buf.len()
    }

    #[test]
    fn one_byte_values() {
        assert_eq!(round_trip(0), 1);
        assert_eq!(round_trip(1), 1);
        assert_eq!(round_trip(127), 1);
        assert_eq!(round_trip(253), 1);
    }

    #[test]
    fn three_byte_values() {
        assert_eq!(round_trip(254), 3);
        assert_eq!(round_trip(255), 3);
        assert_eq!(round_trip(256), 3);
        assert_eq!(round_trip(65535), 3);
    }

    #[test]
    fn five_byte_values() {
        assert_eq!(round_trip(65536), 5);
        assert_eq!(round_trip(1 << 24), 5);
        assert_eq!(round_trip(u32::MAX), 5);
    }

    #[test]
    fn decode_truncated_fails() {
        let mut r = Reader::new(&[MARKER_U16, 0x01]);
        assert!(decode_uvarint(&mut r).is_err());

        let mut r = Reader::new(&[MARKER_U32, 0, 0, 0]);
        assert!(decode_uvarint(&mut r).is_err());

        let mut r = Reader::new(&[]);
        assert!(decode_uvarint(&mut r).is_err());
    }
}
