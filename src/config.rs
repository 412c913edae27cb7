//! # Engine Configuration
//!
//! Tunables for a ShaleDB instance. The defaults match the on-disk format's
//! reference parameters:
//!
//! | Knob                  | Default | Notes                                   |
//! |-----------------------|---------|-----------------------------------------|
//! | `page_size`           | 8192    | fixed per file; legacy files may use 4096 |
//! | `meta_cache_bytes`    | 8 MiB   | LRU tier for tree/meta pages            |
//! | `data_cache_bytes`    | 8 MiB   | LRU tier for data (overflow) pages      |
//! | `write_batch_pages`   | 32      | max pages per contiguous write run      |
//! | `max_concurrent_txns` | 10      | transaction bodies per commit cycle     |
//!
//! The page size can be overridden at open time through the
//! `SHALEDB_PAGE_SIZE` environment variable. The override applies to newly
//! created files only; an existing file is always opened with the size it was
//! created with, and content validation rejects a mismatch.

use crate::error::{DbError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 8192;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const DEFAULT_CACHE_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_WRITE_BATCH_PAGES: usize = 32;
pub const DEFAULT_MAX_CONCURRENT_TXNS: usize = 10;

/// Environment variable consulted at open time for the page size.
pub const PAGE_SIZE_ENV: &str = "SHALEDB_PAGE_SIZE";

#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: usize,
    pub meta_cache_bytes: usize,
    pub data_cache_bytes: usize,
    pub write_batch_pages: usize,
    pub max_concurrent_txns: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            meta_cache_bytes: DEFAULT_CACHE_BYTES,
            data_cache_bytes: DEFAULT_CACHE_BYTES,
            write_batch_pages: DEFAULT_WRITE_BATCH_PAGES,
            max_concurrent_txns: DEFAULT_MAX_CONCURRENT_TXNS,
        }
    }
}

impl Config {
    /// Applies the `SHALEDB_PAGE_SIZE` override, if present and parseable.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(PAGE_SIZE_ENV) {
            if let Ok(size) = raw.trim().parse::<usize>() {
                self.page_size = size;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
            || !self.page_size.is_power_of_two()
        {
            return Err(DbError::Invalid(format!(
                "page size {} not a power of two in {}..={}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.write_batch_pages == 0 {
            return Err(DbError::Invalid("write batch must be at least 1".into()));
        }
        if self.max_concurrent_txns == 0 {
            return Err(DbError::Invalid(
                "max concurrent transactions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Largest encoded key accepted by the tree layer: a quarter of the page,
    /// so a node can always hold a handful of entries before splitting.
    pub fn max_key_bytes(&self) -> usize {
        self.page_size / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let cfg = Config {
            page_size: 5000,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let cfg = Config {
            page_size: 256,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            page_size: 1 << 20,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn key_limit_is_quarter_page() {
        let cfg = Config::default();
        assert_eq!(cfg.max_key_bytes(), DEFAULT_PAGE_SIZE / 4);
    }
}
