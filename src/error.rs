//! # Error Taxonomy
//!
//! ShaleDB distinguishes caller errors from engine failures:
//!
//! - [`DbError::AlreadyExists`]: a duplicate key under a no-duplicates policy
//!   (unique index violation, `insert` on an existing id).
//! - [`DbError::NotExist`]: an update targeting a missing key or set.
//! - [`DbError::Bug`]: an internal invariant violation (stale page address,
//!   impossible refcount, malformed in-memory state). These indicate a defect
//!   in the engine itself and are fatal to the current operation.
//! - [`DbError::Corrupted`]: an on-disk page that fails validation (signature
//!   mismatch, unsupported version, truncated or over-long content). Hard
//!   errors everywhere except the super/root recovery path, which makes one
//!   fallback attempt against the previous root before giving up.
//! - [`DbError::KeyTooLarge`]: a key whose encoded form exceeds a quarter of
//!   the page size, rejected before any structural mutation.
//!
//! All errors propagate to the caller; nothing is silently swallowed.
//! Transaction-cycle failures propagate to the specific failing caller after
//! the whole cycle has been replayed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("does not exist: {0}")]
    NotExist(String),

    #[error("bug: {0}")]
    Bug(String),

    #[error("corrupted page: {0}")]
    Corrupted(String),

    #[error("key too large: {size} bytes encoded (limit {limit})")]
    KeyTooLarge { size: usize, limit: usize },

    #[error("id generator produced {0} colliding ids in a row")]
    IdCollisions(u32),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DbError::AlreadyExists(_))
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, DbError::NotExist(_))
    }
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_predicates_match_variants() {
        assert!(DbError::AlreadyExists("k".into()).is_already_exists());
        assert!(DbError::NotExist("k".into()).is_not_exist());
        assert!(!DbError::Bug("b".into()).is_already_exists());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: DbError = io.into();
        assert!(matches!(err, DbError::Io(_)));
    }
}
