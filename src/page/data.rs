//! # Data Pages
//!
//! Variable-length values (documents, kv values, blobs, long strings) do not
//! live inside tree nodes; the node stores a 4-byte data pointer to the head
//! of a DataPage chain. Each data page holds a `next` pointer and payload
//! bytes filling the rest of the page:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------
//! 0       4     page header (type 0x0A)
//! 4       4     next page in chain (0 = end)
//! 8       ...   payload bytes
//! ```
//!
//! The payload stream of a chain begins with a varint total byte length, so
//! a reader knows exactly where the value ends regardless of trailing page
//! padding. Chains reference their tail through `next`, which means freeing
//! a chain's head cascades down the whole chain via the refcount GC.

use crate::codec::{self, Reader};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DataPage {
    pub next: u32,
    pub bytes: Vec<u8>,
}

impl DataPage {
    pub fn content_len(&self) -> usize {
        4 + self.bytes.len()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u32(out, self.next);
        out.extend_from_slice(&self.bytes);
    }

    /// Consumes the rest of the reader: a clean page's payload spans the
    /// whole remainder (including padding; the chain's length prefix bounds
    /// the real bytes).
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let next = r.u32()?;
        let bytes = r.take(r.remaining())?.to_vec();
        Ok(Self { next, bytes })
    }
}
