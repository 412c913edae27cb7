//! # Index Definitions and Key Extraction
//!
//! A secondary index is declared as an [`IndexSpec`]: a name, a typed key
//! extraction expression, and a uniqueness flag. The extraction expression
//! is a dot-separated field path (`"status"`, `"contact.email"`) evaluated
//! against the document; a missing field extracts `Undefined`, which is
//! indexed like any other key.
//!
//! A definition's identity for change detection is its serialized
//! `(name, path, unique)` triple: `use_indexes` compares declared specs
//! against stored definitions by that identity, builds the added ones by
//! walking existing documents, and drops the removed ones (their trees are
//! reclaimed by the refcount GC).

use crate::codec::Value;
use crate::error::{DbError, Result};
use crate::page::IndexDef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub path: String,
    pub unique: bool,
}

impl IndexSpec {
    /// A non-unique index named after its path.
    pub fn on(path: &str) -> Self {
        Self {
            name: path.to_owned(),
            path: path.to_owned(),
            unique: false,
        }
    }

    pub fn unique(path: &str) -> Self {
        Self {
            name: path.to_owned(),
            path: path.to_owned(),
            unique: true,
        }
    }

    pub fn named(name: &str, path: &str, unique: bool) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            unique,
        }
    }

    /// Identity match against a stored definition.
    pub(crate) fn matches(&self, def: &IndexDef) -> bool {
        self.name == def.name && self.path == def.path && self.unique == def.unique
    }
}

#[derive(Debug, Clone)]
pub(crate) struct KeyExpr {
    segments: Vec<String>,
}

impl KeyExpr {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(DbError::Invalid(format!("bad index key path {path:?}")));
        }
        Ok(Self { segments })
    }

    pub fn extract(&self, doc: &Value) -> Value {
        let mut current = doc;
        for segment in &self.segments {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Value::Undefined,
            }
        }
        current.clone()
    }
}
