//! # Anchor and Top-of-Tree Metadata
//!
//! Three kinds of metadata ride along with node content:
//!
//! - The **SuperPage** at slot 0 — the only page ever rewritten in place.
//!   It holds the addresses of the current and previous RootPage; flipping
//!   them (fenced by fsync on either side) is what atomically switches the
//!   visible database generation.
//! - The **RootPage** header — revision counter, backward link to the
//!   previous root, the ref-count and free-space tree roots, and the
//!   allocation high-water mark. The RootPage body is the top node of the
//!   root tree (set name -> set top page).
//! - **Set-top metadata** — element count for kv sets; count, last
//!   auto-assigned id, and the secondary index table for doc sets.
//!
//! ## SuperPage Layout (28 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ------------------------------
//! 0       1     page_type (0x01)
//! 1       3     reserved, must be zero
//! 4       16    ASCII signature
//! 20      4     current_root
//! 24      4     prev_root
//! ```
//!
//! ## RootPage Header Layout (44 bytes, before node content)
//!
//! ```text
//! 0       1     page_type (0x02)
//! 1       3     reserved
//! 4       16    ASCII signature
//! 20      4     version (must be 1)
//! 24      4     revision
//! 28      4     prev_root
//! 32      4     set_count
//! 36      4     ref_tree address (0 = none)
//! 40      4     free_tree address (0 = none)
//! 44      4     alloc_size (address high-water mark)
//! ```
//!
//! (Offsets above include the 4-byte page header.)

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::codec::{self, Reader, Value};
use crate::error::Result;
use crate::page::PageType;

pub const SUPER_SIGNATURE: [u8; 16] = *b"shaledb superpg\0";
pub const ROOT_SIGNATURE: [u8; 16] = *b"shaledb rootpg\0\0";
pub const FORMAT_VERSION: u32 = 1;

pub const SUPER_HEADER_LEN: usize = 28;
/// Signature plus seven u32 fields.
pub const ROOT_META_LEN: usize = 44;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SuperHeader {
    page_type: u8,
    reserved: [u8; 3],
    signature: [u8; 16],
    current_root: U32,
    prev_root: U32,
}

impl SuperHeader {
    pub fn new(current_root: u32, prev_root: u32) -> Self {
        Self {
            page_type: PageType::Super as u8,
            reserved: [0; 3],
            signature: SUPER_SIGNATURE,
            current_root: U32::new(current_root),
            prev_root: U32::new(prev_root),
        }
    }

    zerocopy_accessors! {
        current_root: u32,
        prev_root: u32,
    }

    pub fn read_from(data: &[u8]) -> Result<Self> {
        ensure_format!(
            data.len() >= SUPER_HEADER_LEN,
            "super page too short: {} bytes",
            data.len()
        );
        let header = match Self::read_from_bytes(&data[..SUPER_HEADER_LEN]) {
            Ok(h) => h,
            Err(_) => corrupted!("super page header is malformed"),
        };
        ensure_format!(
            header.page_type == PageType::Super as u8,
            "super page has type tag 0x{:02x}",
            header.page_type
        );
        ensure_format!(
            header.reserved == [0; 3],
            "super page reserved bytes are nonzero"
        );
        ensure_format!(
            header.signature == SUPER_SIGNATURE,
            "super page signature mismatch"
        );
        Ok(header)
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[..SUPER_HEADER_LEN].copy_from_slice(self.as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootMeta {
    pub version: u32,
    pub revision: u32,
    pub prev_root: u32,
    pub set_count: u32,
    pub ref_tree: u32,
    pub free_tree: u32,
    pub alloc_size: u32,
}

impl RootMeta {
    pub fn initial() -> Self {
        Self {
            version: FORMAT_VERSION,
            revision: 0,
            prev_root: 0,
            set_count: 0,
            ref_tree: 0,
            free_tree: 0,
            alloc_size: 0,
        }
    }

    pub fn encoded_len(&self) -> usize {
        ROOT_META_LEN
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ROOT_SIGNATURE);
        codec::put_u32(out, self.version);
        codec::put_u32(out, self.revision);
        codec::put_u32(out, self.prev_root);
        codec::put_u32(out, self.set_count);
        codec::put_u32(out, self.ref_tree);
        codec::put_u32(out, self.free_tree);
        codec::put_u32(out, self.alloc_size);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let sig = r.take(16)?;
        ensure_format!(
            sig == &ROOT_SIGNATURE[..],
            "root page signature mismatch"
        );
        let version = r.u32()?;
        ensure_format!(
            version == FORMAT_VERSION,
            "unsupported format version {version} (supported: {FORMAT_VERSION})"
        );
        Ok(Self {
            version,
            revision: r.u32()?,
            prev_root: r.u32()?,
            set_count: r.u32()?,
            ref_tree: r.u32()?,
            free_tree: r.u32()?,
            alloc_size: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvMeta {
    pub count: u64,
}

impl KvMeta {
    pub fn encoded_len(&self) -> usize {
        8
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.count);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { count: r.u64()? })
    }
}

/// A stored secondary index definition. The (name, path, unique) triple is
/// the definition's identity for change detection; `top` is the index
/// tree's top page.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub path: String,
    pub unique: bool,
    pub top: u32,
}

impl IndexDef {
    pub fn encoded_len(&self) -> usize {
        Value::String(self.name.clone()).encoded_len()
            + Value::String(self.path.clone()).encoded_len()
            + 1
            + 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        Value::String(self.name.clone()).encode(out);
        Value::String(self.path.clone()).encode(out);
        out.push(self.unique as u8);
        codec::put_u32(out, self.top);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let name = decode_string(r)?;
        let path = decode_string(r)?;
        let unique = match r.u8()? {
            0 => false,
            1 => true,
            other => corrupted!("index unique flag must be 0 or 1, got {other}"),
        };
        let top = r.u32()?;
        Ok(Self {
            name,
            path,
            unique,
            top,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocMeta {
    pub count: u64,
    pub last_id: i64,
    pub indexes: Vec<IndexDef>,
}

impl DocMeta {
    pub fn encoded_len(&self) -> usize {
        8 + 8 + 1 + self.indexes.iter().map(IndexDef::encoded_len).sum::<usize>()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.count);
        codec::put_i64(out, self.last_id);
        out.push(self.indexes.len() as u8);
        for def in &self.indexes {
            def.encode(out);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u64()?;
        let last_id = r.i64()?;
        let index_count = r.u8()? as usize;
        let mut indexes = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            indexes.push(IndexDef::decode(r)?);
        }
        Ok(Self {
            count,
            last_id,
            indexes,
        })
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|def| def.name == name)
    }
}

fn decode_string(r: &mut Reader<'_>) -> Result<String> {
    match Value::decode(r)? {
        Value::String(s) => Ok(s),
        other => corrupted!("expected string in metadata, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_header_is_28_bytes() {
        assert_eq!(size_of::<SuperHeader>(), SUPER_HEADER_LEN);
    }

    #[test]
    fn super_header_round_trips() {
        let header = SuperHeader::new(7, 3);
        let mut buf = [0u8; 64];
        header.write_to(&mut buf);

        let back = SuperHeader::read_from(&buf).unwrap();
        assert_eq!(back.current_root(), 7);
        assert_eq!(back.prev_root(), 3);
    }

    #[test]
    fn super_header_rejects_bad_signature() {
        let header = SuperHeader::new(7, 3);
        let mut buf = [0u8; 64];
        header.write_to(&mut buf);
        buf[4] ^= 0xFF;
        assert!(SuperHeader::read_from(&buf).is_err());
    }

    #[test]
    fn root_meta_round_trips() {
        let meta = RootMeta {
            version: FORMAT_VERSION,
            revision: 12,
            prev_root: 5,
            set_count: 3,
            ref_tree: 40,
            free_tree: 41,
            alloc_size: 99,
        };
        let mut out = Vec::new();
        meta.encode(&mut out);
        assert_eq!(out.len(), meta.encoded_len());

        let mut r = Reader::new(&out);
        assert_eq!(RootMeta::decode(&mut r).unwrap(), meta);
    }

    #[test]
    fn root_meta_rejects_unsupported_version() {
        let meta = RootMeta {
            version: FORMAT_VERSION + 1,
            ..RootMeta::initial()
        };
        let mut out = Vec::new();
        meta.encode(&mut out);
        let mut r = Reader::new(&out);
        assert!(RootMeta::decode(&mut r).is_err());
    }

    #[test]
    fn doc_meta_round_trips_with_indexes() {
        let meta = DocMeta {
            count: 10,
            last_id: 42,
            indexes: vec![
                IndexDef {
                    name: "status".into(),
                    path: "status".into(),
                    unique: false,
                    top: 17,
                },
                IndexDef {
                    name: "email".into(),
                    path: "contact.email".into(),
                    unique: true,
                    top: 18,
                },
            ],
        };
        let mut out = Vec::new();
        meta.encode(&mut out);
        assert_eq!(out.len(), meta.encoded_len());

        let mut r = Reader::new(&out);
        let back = DocMeta::decode(&mut r).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.index("email").unwrap().top, 18);
        assert!(back.index("missing").is_none());
    }
}
