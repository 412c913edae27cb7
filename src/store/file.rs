//! # Paged File Access
//!
//! A thin shim over the platform's random-access file primitives: open or
//! create, positioned exact reads, positioned writes, fsync, and size. The
//! commit protocol depends on explicit write ordering — batch page writes,
//! fsync, overwrite the SuperPage slot, fsync — so this shim uses
//! pread/pwrite (`FileExt`) rather than memory mapping: every durability
//! fence is a visible call.
//!
//! All addressing is in page slots: byte offset = `addr * page_size`. A
//! positioned write may carry several contiguous pages at once (a write
//! run); reads are always a single page.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::Result;

#[derive(Debug)]
pub struct PagedFile {
    file: File,
    page_size: usize,
}

impl PagedFile {
    pub fn open_or_create(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read_page(&self, addr: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        let offset = addr as u64 * self.page_size as u64;
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Writes one or more contiguous pages starting at `addr`.
    pub fn write_at(&self, addr: u32, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len() % self.page_size, 0);
        let offset = addr as u64 * self.page_size as u64;
        self.file.write_all_at(bytes, offset)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 512;

    #[test]
    fn pages_round_trip_at_their_slots() {
        let dir = tempfile::tempdir().unwrap();
        let file = PagedFile::open_or_create(&dir.path().join("t.shale"), PAGE).unwrap();

        let page_a = vec![0xAAu8; PAGE];
        let page_b = vec![0xBBu8; PAGE];
        file.write_at(0, &page_a).unwrap();
        file.write_at(3, &page_b).unwrap();
        file.sync().unwrap();

        assert_eq!(file.read_page(0).unwrap(), page_a);
        assert_eq!(file.read_page(3).unwrap(), page_b);
        assert_eq!(file.len().unwrap(), 4 * PAGE as u64);
    }

    #[test]
    fn multi_page_run_lands_contiguously() {
        let dir = tempfile::tempdir().unwrap();
        let file = PagedFile::open_or_create(&dir.path().join("t.shale"), PAGE).unwrap();

        let mut run = vec![0x11u8; PAGE];
        run.extend_from_slice(&vec![0x22u8; PAGE]);
        file.write_at(2, &run).unwrap();

        assert_eq!(file.read_page(2).unwrap(), vec![0x11u8; PAGE]);
        assert_eq!(file.read_page(3).unwrap(), vec![0x22u8; PAGE]);
    }

    #[test]
    fn short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = PagedFile::open_or_create(&dir.path().join("t.shale"), PAGE).unwrap();
        assert!(file.read_page(9).is_err());
    }
}
