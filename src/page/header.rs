//! Page header and file header layouts (§3, §6.2).

use crate::errors::{DbError, Result};
use crate::types::{Lsn, PageId};

/// Per-page magic distinguishing a generic page from raw garbage. Distinct
/// from the file-level magic, which only appears once, at page 0.
pub const PAGE_MAGIC: u32 = 0x4254_4C50; // "BLTP" read as a little-endian u32

/// Size, in bytes, of the generic page header present on every page except
/// page 0 (which carries the file header instead, per §6.2).
pub const PAGE_HEADER_LEN: usize = 32;

/// File-level magic: the literal bytes `"BLITEDB1"`.
pub const FILE_MAGIC: [u8; 8] = *b"BLITEDB1";

pub const FORMAT_VERSION: u32 = 1;

/// Size, in bytes, of the file header occupying page 0.
pub const FILE_HEADER_LEN: usize = 8 + 4 + 4 + 8 + 4 + 4 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Header = 0,
    FreeList = 1,
    Catalog = 2,
    Data = 3,
    IndexInternal = 4,
    IndexLeaf = 5,
    Overflow = 6,
    IndexMeta = 7,
}

impl PageType {
    #[must_use]
    pub const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Header,
            1 => Self::FreeList,
            2 => Self::Catalog,
            3 => Self::Data,
            4 => Self::IndexInternal,
            5 => Self::IndexLeaf,
            6 => Self::Overflow,
            7 => Self::IndexMeta,
            _ => return None,
        })
    }
}

/// Bit 0 of a page header's flags byte: set while the page has unflushed
/// in-memory changes.
pub const FLAG_DIRTY: u8 = 0b0000_0001;

/// The 32-byte header present at the start of every page other than page 0.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub page_id: PageId,
    pub lsn: Lsn,
    pub checksum: u32,
    pub flags: u8,
}

impl PageHeader {
    #[must_use]
    pub fn new(page_type: PageType, page_id: PageId) -> Self {
        Self { page_type, page_id, lsn: 0, checksum: 0, flags: 0 }
    }

    /// Serializes the header into the first `PAGE_HEADER_LEN` bytes of `buf`.
    /// The checksum field itself is zeroed; callers compute and patch the
    /// whole-page checksum separately (it covers the header-with-zeroed-
    /// checksum plus the payload).
    pub fn write_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= PAGE_HEADER_LEN);
        buf[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        buf[4] = self.page_type as u8;
        buf[5] = self.flags;
        buf[6..8].copy_from_slice(&[0, 0]);
        buf[8..12].copy_from_slice(&self.page_id.to_le_bytes());
        buf[12..20].copy_from_slice(&self.lsn.to_le_bytes());
        buf[20..24].copy_from_slice(&0u32.to_le_bytes()); // checksum patched later
        buf[24..32].copy_from_slice(&[0u8; 8]);
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_LEN {
            return Err(DbError::Corrupt("page shorter than header".into()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != PAGE_MAGIC {
            return Err(DbError::Corrupt("bad page magic".into()));
        }
        let page_type = PageType::from_u8(buf[4])
            .ok_or_else(|| DbError::Corrupt(format!("unknown page type byte {}", buf[4])))?;
        let flags = buf[5];
        let page_id = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let lsn = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        Ok(Self { page_type, page_id, lsn, checksum, flags })
    }
}

/// Computes the CRC32 checksum over a full page buffer with the checksum
/// field (bytes 20..24) zeroed, matching what `write_checksum` stores.
#[must_use]
pub fn page_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[0..20]);
    hasher.update(&[0, 0, 0, 0]);
    hasher.update(&buf[24..]);
    hasher.finalize()
}

/// Recomputes and patches the checksum field of a page buffer in place.
pub fn write_checksum(buf: &mut [u8]) {
    let sum = page_checksum(buf);
    buf[20..24].copy_from_slice(&sum.to_le_bytes());
}

/// Verifies a page's stored checksum against its contents.
pub fn verify_checksum(buf: &[u8]) -> Result<()> {
    let stored = u32::from_le_bytes(buf[20..24].try_into().unwrap());
    let computed = page_checksum(buf);
    if stored != computed {
        return Err(DbError::Corrupt("page checksum mismatch".into()));
    }
    Ok(())
}

/// The file-level header occupying page 0 (§6.2). Distinct from the generic
/// per-page header: page 0 is special-cased and carries this layout
/// starting at byte 0, with no generic `PageHeader` wrapping it.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub format_version: u32,
    pub page_size: u32,
    pub page_count: u64,
    pub first_free_page: PageId,
    pub catalog_root_page: PageId,
    pub key_dictionary_root_page: PageId,
    pub last_checkpoint_lsn: Lsn,
}

impl FileHeader {
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size,
            page_count: 1,
            first_free_page: 0,
            catalog_root_page: 0,
            key_dictionary_root_page: 0,
            last_checkpoint_lsn: 0,
        }
    }

    pub fn write_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= FILE_HEADER_LEN);
        buf[0..8].copy_from_slice(&FILE_MAGIC);
        buf[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.page_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf[28..32].copy_from_slice(&self.catalog_root_page.to_le_bytes());
        buf[32..36].copy_from_slice(&self.key_dictionary_root_page.to_le_bytes());
        buf[36..44].copy_from_slice(&self.last_checkpoint_lsn.to_le_bytes());
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(DbError::Corrupt("file shorter than file header".into()));
        }
        if buf[0..8] != FILE_MAGIC {
            return Err(DbError::Incompatible("bad file magic".into()));
        }
        let format_version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if format_version != FORMAT_VERSION {
            return Err(DbError::Incompatible(format!(
                "unsupported format version {format_version}"
            )));
        }
        let page_size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let page_count = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let first_free_page = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        let catalog_root_page = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        let key_dictionary_root_page = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let last_checkpoint_lsn = u64::from_le_bytes(buf[36..44].try_into().unwrap());
        Ok(Self {
            format_version,
            page_size,
            page_count,
            first_free_page,
            catalog_root_page,
            key_dictionary_root_page,
            last_checkpoint_lsn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_round_trips() {
        let mut buf = vec![0u8; 64];
        let mut h = PageHeader::new(PageType::Data, 7);
        h.lsn = 99;
        h.write_into(&mut buf);
        write_checksum(&mut buf);
        verify_checksum(&buf).unwrap();
        let read = PageHeader::read_from(&buf).unwrap();
        assert_eq!(read.page_id, 7);
        assert_eq!(read.lsn, 99);
        assert_eq!(read.page_type, PageType::Data);
    }

    #[test]
    fn tampered_page_fails_checksum() {
        let mut buf = vec![0u8; 64];
        PageHeader::new(PageType::Data, 1).write_into(&mut buf);
        write_checksum(&mut buf);
        buf[40] ^= 0xFF;
        assert!(verify_checksum(&buf).is_err());
    }

    #[test]
    fn file_header_round_trips() {
        let mut buf = vec![0u8; 128];
        let mut fh = FileHeader::new(8192);
        fh.catalog_root_page = 2;
        fh.write_into(&mut buf);
        let read = FileHeader::read_from(&buf).unwrap();
        assert_eq!(read.page_size, 8192);
        assert_eq!(read.catalog_root_page, 2);
    }

    #[test]
    fn bad_magic_is_incompatible() {
        let buf = vec![0u8; 64];
        assert!(matches!(FileHeader::read_from(&buf), Err(DbError::Incompatible(_))));
    }
}
