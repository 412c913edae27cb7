//! # Page Model
//!
//! The unit of durable storage is a fixed-size page (default 8192 bytes).
//! Every page begins with a 4-byte header — a one-byte type tag and three
//! reserved zero bytes — followed by type-specific content. A page is
//! identified by its `u32` address: its slot number in the file (byte offset
//! = address × page size). Address 0 is the SuperPage slot, which lets 0
//! double as "absent" for child pointers.
//!
//! ## Page Types
//!
//! | Tag  | Type       | Content                                       |
//! |------|------------|-----------------------------------------------|
//! | 0x01 | Super      | anchor: current/previous root addresses       |
//! | 0x02 | Root       | root meta + Name node (the root tree top)     |
//! | 0x03 | KvTop      | kv meta + Record node (a kv set's tree top)   |
//! | 0x04 | DocTop     | doc meta + Record node (a doc set's tree top) |
//! | 0x05 | RecordNode | plain Record node                             |
//! | 0x06 | IndexNode  | plain Index node (also index tree tops)       |
//! | 0x07 | RefNode    | refcount bookkeeping node                     |
//! | 0x08 | FreeNode   | free-address bookkeeping node                 |
//! | 0x09 | NameNode   | plain Name node (root tree interior)          |
//! | 0x0A | Data       | overflow chain page                           |
//!
//! ## Clean vs. Dirty
//!
//! A page is either clean (on disk, immutable) or dirty (in memory, not yet
//! durable). A clean page is never mutated in place: any change clones it
//! into a fresh dirty page at a fresh address (copy-on-write). `PageContent`
//! is the parsed in-memory form; the store keeps clean pages as shared
//! `Arc<PageContent>` and owns the dirty set, so there is no way to write
//! through a stale handle — all structural changes route through the store.

pub mod data;
pub mod meta;
pub mod node;

pub use data::DataPage;
pub use meta::{DocMeta, IndexDef, KvMeta, RootMeta, SuperHeader};
pub use node::{Entry, EntryKey, NodeKind, NodePage};

use smallvec::SmallVec;

use crate::codec::Reader;
use crate::error::Result;

pub const PAGE_HEADER_SIZE: usize = 4;

/// Scratch buffer for a page's referenced addresses; most pages reference
/// only a handful, so this stays on the stack.
pub type RefVec = SmallVec<[u32; 16]>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    Super = 0x01,
    Root = 0x02,
    KvTop = 0x03,
    DocTop = 0x04,
    RecordNode = 0x05,
    IndexNode = 0x06,
    RefNode = 0x07,
    FreeNode = 0x08,
    NameNode = 0x09,
    Data = 0x0A,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Super,
            0x02 => PageType::Root,
            0x03 => PageType::KvTop,
            0x04 => PageType::DocTop,
            0x05 => PageType::RecordNode,
            0x06 => PageType::IndexNode,
            0x07 => PageType::RefNode,
            0x08 => PageType::FreeNode,
            0x09 => PageType::NameNode,
            0x0A => PageType::Data,
            _ => PageType::Unknown,
        }
    }
}

pub fn write_header(out: &mut Vec<u8>, page_type: PageType) {
    out.push(page_type as u8);
    out.extend_from_slice(&[0, 0, 0]);
}

pub fn read_header(r: &mut Reader<'_>) -> Result<PageType> {
    let tag = r.u8()?;
    let page_type = PageType::from_byte(tag);
    ensure_format!(
        page_type != PageType::Unknown,
        "unknown page type tag 0x{tag:02x}"
    );
    let reserved = r.take(3)?;
    ensure_format!(
        reserved.iter().all(|&b| b == 0),
        "page header reserved bytes are nonzero"
    );
    Ok(page_type)
}

/// Parsed content of an addressable page. The SuperPage is not represented
/// here — it is not part of the copy-on-write address space.
#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Root { meta: RootMeta, node: NodePage },
    KvTop { meta: KvMeta, node: NodePage },
    DocTop { meta: DocMeta, node: NodePage },
    Node(NodePage),
    Data(DataPage),
}

impl PageContent {
    pub fn page_type(&self) -> PageType {
        match self {
            PageContent::Root { .. } => PageType::Root,
            PageContent::KvTop { .. } => PageType::KvTop,
            PageContent::DocTop { .. } => PageType::DocTop,
            PageContent::Node(node) => match node.kind {
                NodeKind::Name => PageType::NameNode,
                NodeKind::Record => PageType::RecordNode,
                NodeKind::Index => PageType::IndexNode,
                NodeKind::Ref => PageType::RefNode,
                NodeKind::Free => PageType::FreeNode,
            },
            PageContent::Data(_) => PageType::Data,
        }
    }

    pub fn node(&self) -> Option<&NodePage> {
        match self {
            PageContent::Root { node, .. }
            | PageContent::KvTop { node, .. }
            | PageContent::DocTop { node, .. }
            | PageContent::Node(node) => Some(node),
            PageContent::Data(_) => None,
        }
    }

    pub fn node_mut(&mut self) -> Option<&mut NodePage> {
        match self {
            PageContent::Root { node, .. }
            | PageContent::KvTop { node, .. }
            | PageContent::DocTop { node, .. }
            | PageContent::Node(node) => Some(node),
            PageContent::Data(_) => None,
        }
    }

    /// Bytes this page occupies when serialized. The page's free space is
    /// `page_size - used_bytes()`; the tree layer splits a node when this
    /// goes past the page size.
    pub fn used_bytes(&self) -> usize {
        PAGE_HEADER_SIZE
            + match self {
                PageContent::Root { meta, node } => meta.encoded_len() + node.content_len(),
                PageContent::KvTop { meta, node } => meta.encoded_len() + node.content_len(),
                PageContent::DocTop { meta, node } => meta.encoded_len() + node.content_len(),
                PageContent::Node(node) => node.content_len(),
                PageContent::Data(page) => page.content_len(),
            }
    }

    /// Every page address this page references. This is the single source of
    /// truth the store's refcount deltas are derived from: node children,
    /// entry payload targets, data chain links, and for the root the
    /// ref/free tree tops and index tops for doc sets. The previous-root
    /// backward link is deliberately not a counted reference.
    pub fn collect_refs(&self, out: &mut RefVec) {
        match self {
            PageContent::Root { meta, node } => {
                node.collect_refs(out);
                if meta.ref_tree != 0 {
                    out.push(meta.ref_tree);
                }
                if meta.free_tree != 0 {
                    out.push(meta.free_tree);
                }
            }
            PageContent::KvTop { node, .. } => node.collect_refs(out),
            PageContent::DocTop { meta, node } => {
                node.collect_refs(out);
                for def in &meta.indexes {
                    if def.top != 0 {
                        out.push(def.top);
                    }
                }
            }
            PageContent::Node(node) => node.collect_refs(out),
            PageContent::Data(page) => {
                if page.next != 0 {
                    out.push(page.next);
                }
            }
        }
    }

    /// Serializes into a full zero-padded page image.
    pub fn serialize(&self, page_size: usize) -> Result<Vec<u8>> {
        let used = self.used_bytes();
        ensure_bug!(
            used <= page_size,
            "page overflows: {used} bytes into {page_size}-byte page ({:?})",
            self.page_type()
        );
        let mut out = Vec::with_capacity(page_size);
        write_header(&mut out, self.page_type());
        match self {
            PageContent::Root { meta, node } => {
                meta.encode(&mut out);
                node.encode(&mut out);
            }
            PageContent::KvTop { meta, node } => {
                meta.encode(&mut out);
                node.encode(&mut out);
            }
            PageContent::DocTop { meta, node } => {
                meta.encode(&mut out);
                node.encode(&mut out);
            }
            PageContent::Node(node) => node.encode(&mut out),
            PageContent::Data(page) => page.encode(&mut out),
        }
        debug_assert_eq!(out.len(), used);
        out.resize(page_size, 0);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<PageContent> {
        let mut r = Reader::new(bytes);
        let page_type = read_header(&mut r)?;
        Ok(match page_type {
            PageType::Root => {
                let meta = RootMeta::decode(&mut r)?;
                let node = NodePage::decode(&mut r, NodeKind::Name)?;
                PageContent::Root { meta, node }
            }
            PageType::KvTop => {
                let meta = KvMeta::decode(&mut r)?;
                let node = NodePage::decode(&mut r, NodeKind::Record)?;
                PageContent::KvTop { meta, node }
            }
            PageType::DocTop => {
                let meta = DocMeta::decode(&mut r)?;
                let node = NodePage::decode(&mut r, NodeKind::Record)?;
                PageContent::DocTop { meta, node }
            }
            PageType::RecordNode => {
                PageContent::Node(NodePage::decode(&mut r, NodeKind::Record)?)
            }
            PageType::IndexNode => PageContent::Node(NodePage::decode(&mut r, NodeKind::Index)?),
            PageType::RefNode => PageContent::Node(NodePage::decode(&mut r, NodeKind::Ref)?),
            PageType::FreeNode => PageContent::Node(NodePage::decode(&mut r, NodeKind::Free)?),
            PageType::NameNode => PageContent::Node(NodePage::decode(&mut r, NodeKind::Name)?),
            PageType::Data => PageContent::Data(DataPage::decode(&mut r)?),
            PageType::Super => corrupted!("super page read through the content path"),
            PageType::Unknown => corrupted!("unknown page type"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    const PAGE: usize = 512;

    #[test]
    fn page_type_from_byte_round_trips() {
        for t in [
            PageType::Super,
            PageType::Root,
            PageType::KvTop,
            PageType::DocTop,
            PageType::RecordNode,
            PageType::IndexNode,
            PageType::RefNode,
            PageType::FreeNode,
            PageType::NameNode,
            PageType::Data,
        ] {
            assert_eq!(PageType::from_byte(t as u8), t);
        }
        assert_eq!(PageType::from_byte(0xEE), PageType::Unknown);
    }

    #[test]
    fn header_rejects_nonzero_reserved_bytes() {
        let bytes = [PageType::Data as u8, 0, 1, 0];
        let mut r = Reader::new(&bytes);
        assert!(read_header(&mut r).is_err());
    }

    fn round_trip(content: PageContent) {
        let bytes = content.serialize(PAGE).unwrap();
        assert_eq!(bytes.len(), PAGE);
        let back = PageContent::deserialize(&bytes).unwrap();
        // Data pages absorb padding on decode; compare the meaningful prefix.
        match (&back, &content) {
            (PageContent::Data(b), PageContent::Data(a)) => {
                assert_eq!(b.next, a.next);
                assert_eq!(&b.bytes[..a.bytes.len()], &a.bytes[..]);
                assert!(b.bytes[a.bytes.len()..].iter().all(|&x| x == 0));
            }
            _ => assert_eq!(back, content),
        }
    }

    #[test]
    fn root_page_round_trips() {
        let mut node = NodePage::empty(NodeKind::Name);
        node.entries.push(Entry::Name {
            name: "k!settings".into(),
            addr: 9,
        });
        node.children.push(0);
        round_trip(PageContent::Root {
            meta: RootMeta {
                revision: 3,
                prev_root: 1,
                set_count: 1,
                ref_tree: 12,
                free_tree: 13,
                alloc_size: 20,
                ..RootMeta::initial()
            },
            node,
        });
    }

    #[test]
    fn top_pages_round_trip() {
        let mut node = NodePage::empty(NodeKind::Record);
        node.entries.push(Entry::Record {
            key: Value::from(1i64),
            data: 30,
        });
        node.children.push(0);

        round_trip(PageContent::KvTop {
            meta: KvMeta { count: 1 },
            node: node.clone(),
        });
        round_trip(PageContent::DocTop {
            meta: DocMeta {
                count: 1,
                last_id: 1,
                indexes: vec![IndexDef {
                    name: "status".into(),
                    path: "status".into(),
                    unique: false,
                    top: 31,
                }],
            },
            node,
        });
    }

    #[test]
    fn plain_nodes_round_trip() {
        for kind in [
            NodeKind::Record,
            NodeKind::Index,
            NodeKind::Ref,
            NodeKind::Free,
            NodeKind::Name,
        ] {
            round_trip(PageContent::Node(NodePage::empty(kind)));
        }
    }

    #[test]
    fn data_page_round_trips() {
        round_trip(PageContent::Data(DataPage {
            next: 5,
            bytes: vec![1, 2, 3],
        }));
    }

    #[test]
    fn serialize_rejects_overflowing_page() {
        let content = PageContent::Data(DataPage {
            next: 0,
            bytes: vec![0xAA; PAGE],
        });
        assert!(content.serialize(PAGE).is_err());
    }

    #[test]
    fn root_refs_include_bookkeeping_trees() {
        let mut node = NodePage::empty(NodeKind::Name);
        node.entries.push(Entry::Name {
            name: "d!users".into(),
            addr: 9,
        });
        node.children.push(0);
        let content = PageContent::Root {
            meta: RootMeta {
                ref_tree: 12,
                free_tree: 13,
                prev_root: 77,
                ..RootMeta::initial()
            },
            node,
        };
        let mut refs = RefVec::new();
        content.collect_refs(&mut refs);
        refs.sort_unstable();
        assert_eq!(refs.as_slice(), &[9, 12, 13]);
    }

    #[test]
    fn doc_top_refs_include_index_tops() {
        let content = PageContent::DocTop {
            meta: DocMeta {
                count: 0,
                last_id: 0,
                indexes: vec![IndexDef {
                    name: "role".into(),
                    path: "role".into(),
                    unique: false,
                    top: 55,
                }],
            },
            node: NodePage::empty(NodeKind::Record),
        };
        let mut refs = RefVec::new();
        content.collect_refs(&mut refs);
        assert_eq!(refs.as_slice(), &[55]);
    }
}
