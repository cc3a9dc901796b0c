//! The paged file itself: fixed-size page I/O, the free-list, and growth
//! (§4.B). Grounded on the segment/footer persistence style used for
//! `SegmentFile` in the teacher's recovery engine: plain positional
//! `File::read_exact`/`write_all_at` plus an explicit `sync_data()` for
//! durability, rather than a buffered-writer abstraction.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::errors::{DbError, Result};
use crate::page::header::{
    FILE_HEADER_LEN, FileHeader, PageHeader, PageType, page_checksum, verify_checksum,
    write_checksum,
};
use crate::types::PageId;

/// First page id available for allocation; page 0 is the file header.
pub const FIRST_DATA_PAGE: PageId = 1;

/// A free page's payload stores, at offset 0, the page id of the next free
/// page (or `NONE` if it is the tail of the free-list), as a little-endian
/// `u32` immediately following the generic page header.
const FREE_LIST_NEXT_OFFSET: usize = super::header::PAGE_HEADER_LEN;
const NONE_PAGE: PageId = 0;

/// Fixed-size paged file with an in-memory mirror of the file header,
/// guarded by a single mutex: every physical read/write takes the lock, so
/// callers above this layer (the cache, the WAL) are responsible for
/// concurrency policy, not this one.
pub struct PageFile {
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    header: FileHeader,
}

impl PageFile {
    /// Creates a new page file at `path`, failing if one already exists.
    pub fn create(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create_new(true).open(path)?;
        let header = FileHeader::new(page_size);
        let mut buf = vec![0u8; page_size as usize];
        header.write_into(&mut buf);
        let mut file = file;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(Self { inner: Mutex::new(Inner { file, header }) })
    }

    /// Opens an existing page file, validating the header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut probe = vec![0u8; FILE_HEADER_LEN];
        file.read_exact(&mut probe)?;
        let header = FileHeader::read_from(&probe)?;
        Ok(Self { inner: Mutex::new(Inner { file, header }) })
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.lock().header.page_size
    }

    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.inner.lock().header.page_count
    }

    #[must_use]
    pub fn catalog_root_page(&self) -> PageId {
        self.inner.lock().header.catalog_root_page
    }

    pub fn set_catalog_root_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.header.catalog_root_page = page_id;
        Self::flush_header(&mut inner)
    }

    #[must_use]
    pub fn key_dictionary_root_page(&self) -> PageId {
        self.inner.lock().header.key_dictionary_root_page
    }

    pub fn set_key_dictionary_root_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.header.key_dictionary_root_page = page_id;
        Self::flush_header(&mut inner)
    }

    #[must_use]
    pub fn last_checkpoint_lsn(&self) -> crate::types::Lsn {
        self.inner.lock().header.last_checkpoint_lsn
    }

    pub fn set_last_checkpoint_lsn(&self, lsn: crate::types::Lsn) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.header.last_checkpoint_lsn = lsn;
        Self::flush_header(&mut inner)
    }

    fn flush_header(inner: &mut Inner) -> Result<()> {
        let page_size = inner.header.page_size as usize;
        let mut buf = vec![0u8; page_size];
        inner.header.write_into(&mut buf);
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Allocates a page: reuses the head of the free-list if non-empty,
    /// otherwise grows the file by one page.
    pub fn allocate_page(&self, page_type: PageType) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_id = if inner.header.first_free_page != NONE_PAGE {
            let reused = inner.header.first_free_page;
            let page_size = inner.header.page_size as usize;
            let mut buf = vec![0u8; page_size];
            Self::read_raw_locked(&mut inner, reused, &mut buf)?;
            let next =
                u32::from_le_bytes(buf[FREE_LIST_NEXT_OFFSET..FREE_LIST_NEXT_OFFSET + 4].try_into().unwrap());
            inner.header.first_free_page = next;
            reused
        } else {
            let id = inner.header.page_count as PageId;
            inner.header.page_count += 1;
            id
        };
        Self::flush_header(&mut inner)?;

        let page_size = inner.header.page_size as usize;
        let mut buf = vec![0u8; page_size];
        PageHeader::new(page_type, page_id).write_into(&mut buf);
        write_checksum(&mut buf);
        Self::write_raw_locked(&mut inner, page_id, &buf)?;
        Ok(page_id)
    }

    /// Pushes `page_id` onto the head of the free-list; its contents are
    /// overwritten with a free-list node pointing at the prior head.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        let page_size = inner.header.page_size as usize;
        let mut buf = vec![0u8; page_size];
        PageHeader::new(PageType::FreeList, page_id).write_into(&mut buf);
        let prior_head = inner.header.first_free_page;
        buf[FREE_LIST_NEXT_OFFSET..FREE_LIST_NEXT_OFFSET + 4]
            .copy_from_slice(&prior_head.to_le_bytes());
        write_checksum(&mut buf);
        Self::write_raw_locked(&mut inner, page_id, &buf)?;
        inner.header.first_free_page = page_id;
        Self::flush_header(&mut inner)
    }

    /// Reads the full raw bytes of `page_id` into a freshly allocated buffer,
    /// verifying its checksum.
    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let page_size = inner.header.page_size as usize;
        let mut buf = vec![0u8; page_size];
        Self::read_raw_locked(&mut inner, page_id, &mut buf)?;
        verify_checksum(&buf)?;
        Ok(buf)
    }

    /// Overwrites `page_id` with `buf`, patching the checksum first.
    pub fn write_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        write_checksum(buf);
        let mut inner = self.inner.lock();
        Self::write_raw_locked(&mut inner, page_id, buf)
    }

    pub fn fsync(&self) -> Result<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }

    fn read_raw_locked(inner: &mut Inner, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let offset = u64::from(page_id) * u64::from(inner.header.page_size);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_raw_locked(inner: &mut Inner, page_id: PageId, buf: &[u8]) -> Result<()> {
        let offset = u64::from(page_id) * u64::from(inner.header.page_size);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;
        inner.file.sync_data()?;
        Ok(())
    }
}

/// Validates that a raw page buffer's stored checksum still matches its
/// contents; used by recovery when scanning pages independent of the cache.
pub fn validate_page(buf: &[u8]) -> Result<()> {
    if page_checksum(buf) != u32::from_le_bytes(buf[20..24].try_into().unwrap()) {
        return Err(DbError::Corrupt("page checksum mismatch".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.blite");
        let pf = PageFile::create(&path, 512).unwrap();
        let id = pf.allocate_page(PageType::Data).unwrap();
        assert_eq!(id, FIRST_DATA_PAGE);
        let buf = pf.read_page(id).unwrap();
        let header = PageHeader::read_from(&buf).unwrap();
        assert_eq!(header.page_type, PageType::Data);
    }

    #[test]
    fn free_then_reallocate_reuses_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.blite");
        let pf = PageFile::create(&path, 512).unwrap();
        let a = pf.allocate_page(PageType::Data).unwrap();
        let b = pf.allocate_page(PageType::Data).unwrap();
        pf.free_page(a).unwrap();
        let c = pf.allocate_page(PageType::Data).unwrap();
        assert_eq!(c, a, "freed page should be reused before growing the file");
        assert_ne!(b, a);
    }

    #[test]
    fn reopen_preserves_header_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.blite");
        {
            let pf = PageFile::create(&path, 512).unwrap();
            pf.set_catalog_root_page(7).unwrap();
        }
        let pf = PageFile::open(&path).unwrap();
        assert_eq!(pf.catalog_root_page(), 7);
        assert_eq!(pf.page_size(), 512);
    }

    #[test]
    fn tampered_checksum_rejected_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.blite");
        let pf = PageFile::create(&path, 512).unwrap();
        let id = pf.allocate_page(PageType::Data).unwrap();
        let mut raw = pf.read_page(id).unwrap();
        raw[20] ^= 0xFF;
        assert!(validate_page(&raw).is_err());
    }
}
