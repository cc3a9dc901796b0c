//! Slotted document pages (§3, §4.F): a slot directory growing down from the
//! end of the page and a record heap growing up from after the page header,
//! the classic layout also used for the index leaf/internal pages.

use crate::errors::{DbError, Result};
use crate::page::header::PAGE_HEADER_LEN;

/// Slot directory entry: 8 bytes, `(offset: u32, length: u32)`. A tombstoned
/// slot keeps its offset but stores length `TOMBSTONE_LEN`.
const SLOT_LEN: usize = 8;
const TOMBSTONE_LEN: u32 = u32::MAX;

/// Page-local accessor for the slotted layout. Does not own the buffer; all
/// mutating operations take `&mut [u8]` sized exactly one page. Layout,
/// after the 32-byte generic header:
///
/// ```text
/// [ header (32) | record heap, growing up | ... free space ... | slot directory, growing down ]
/// ```
///
/// The page trailer stores `slot_count: u16` and `heap_end: u16` (the high
///-water mark of the record heap) in the last 4 bytes of the page.
pub struct SlottedPage;

impl SlottedPage {
    const TRAILER_LEN: usize = 4;

    fn slot_count(buf: &[u8]) -> u16 {
        let at = buf.len() - Self::TRAILER_LEN;
        u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())
    }

    fn set_slot_count(buf: &mut [u8], n: u16) {
        let at = buf.len() - Self::TRAILER_LEN;
        buf[at..at + 2].copy_from_slice(&n.to_le_bytes());
    }

    fn heap_end(buf: &[u8]) -> u16 {
        let at = buf.len() - Self::TRAILER_LEN + 2;
        u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())
    }

    fn set_heap_end(buf: &mut [u8], end: u16) {
        let at = buf.len() - Self::TRAILER_LEN + 2;
        buf[at..at + 2].copy_from_slice(&end.to_le_bytes());
    }

    /// Initializes a freshly allocated page buffer as an empty slotted page.
    /// Caller is expected to have already written the generic page header.
    pub fn init(buf: &mut [u8]) {
        Self::set_slot_count(buf, 0);
        Self::set_heap_end(buf, PAGE_HEADER_LEN as u16);
    }

    fn slot_dir_offset(buf: &[u8], slot: u16) -> usize {
        buf.len() - Self::TRAILER_LEN - (usize::from(slot) + 1) * SLOT_LEN
    }

    fn read_slot(buf: &[u8], slot: u16) -> (u32, u32) {
        let at = Self::slot_dir_offset(buf, slot);
        let offset = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let len = u32::from_le_bytes(buf[at + 4..at + 8].try_into().unwrap());
        (offset, len)
    }

    fn write_slot(buf: &mut [u8], slot: u16, offset: u32, len: u32) {
        let at = Self::slot_dir_offset(buf, slot);
        buf[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        buf[at + 4..at + 8].copy_from_slice(&len.to_le_bytes());
    }

    /// Bytes free for a new record plus its slot entry, without compaction.
    #[must_use]
    pub fn free_space(buf: &[u8]) -> usize {
        let slot_count = Self::slot_count(buf);
        let slot_dir_start = if slot_count == 0 {
            buf.len() - Self::TRAILER_LEN
        } else {
            Self::slot_dir_offset(buf, slot_count - 1)
        };
        let heap_end = usize::from(Self::heap_end(buf));
        slot_dir_start.saturating_sub(heap_end)
    }

    /// Inserts `record` into the first slot with enough room (reusing a
    /// tombstone if available), else appends a new slot. Returns the slot
    /// index. Errors with `TooLarge` if the record plus a slot entry can
    /// never fit on an empty page of this size — overflow pages are not
    /// implemented.
    pub fn insert(buf: &mut [u8], record: &[u8]) -> Result<u16> {
        let max_capacity = buf.len() - PAGE_HEADER_LEN - Self::TRAILER_LEN - SLOT_LEN;
        if record.len() > max_capacity {
            return Err(DbError::TooLarge(record.len()));
        }
        if Self::free_space(buf) < record.len() + SLOT_LEN {
            return Err(DbError::TooLarge(record.len()));
        }

        let slot_count = Self::slot_count(buf);
        let reusable = (0..slot_count).find(|&s| Self::read_slot(buf, s).1 == TOMBSTONE_LEN);

        let heap_end = Self::heap_end(buf);
        let offset = heap_end;
        buf[usize::from(offset)..usize::from(offset) + record.len()].copy_from_slice(record);
        Self::set_heap_end(buf, offset + record.len() as u16);

        let slot = match reusable {
            Some(s) => s,
            None => {
                let s = slot_count;
                Self::set_slot_count(buf, slot_count + 1);
                s
            }
        };
        Self::write_slot(buf, slot, u32::from(offset), record.len() as u32);
        Ok(slot)
    }

    /// Reads the record stored at `slot`, or `None` if the slot is out of
    /// range or tombstoned.
    #[must_use]
    pub fn get(buf: &[u8], slot: u16) -> Option<&[u8]> {
        if slot >= Self::slot_count(buf) {
            return None;
        }
        let (offset, len) = Self::read_slot(buf, slot);
        if len == TOMBSTONE_LEN {
            return None;
        }
        let offset = offset as usize;
        Some(&buf[offset..offset + len as usize])
    }

    /// Tombstones `slot`. The record bytes are left in place (reclaimed on
    /// the next `compact`); only the slot directory entry is marked dead.
    pub fn delete(buf: &mut [u8], slot: u16) -> Result<()> {
        if slot >= Self::slot_count(buf) {
            return Err(DbError::NotFound);
        }
        let (offset, _) = Self::read_slot(buf, slot);
        Self::write_slot(buf, slot, offset, TOMBSTONE_LEN);
        Ok(())
    }

    /// Replaces the record at `slot` in place. Only valid when `record` is no
    /// larger than the slot's current length — callers must check
    /// `fits_in_place` first; a record that has grown past its slot needs a
    /// fresh slot (possibly on another page) via `delete` + `insert` instead.
    pub fn update(buf: &mut [u8], slot: u16, record: &[u8]) -> Result<()> {
        let (offset, len) = Self::read_slot(buf, slot);
        if len == TOMBSTONE_LEN || record.len() as u32 > len {
            return Err(DbError::Corrupt("update record does not fit in its existing slot".into()));
        }
        let offset = offset as usize;
        buf[offset..offset + record.len()].copy_from_slice(record);
        Self::write_slot(buf, slot, offset as u32, record.len() as u32);
        Ok(())
    }

    /// Whether `record` can replace `slot`'s current contents without
    /// growing past the space already reserved for it.
    #[must_use]
    pub fn fits_in_place(buf: &[u8], slot: u16, record_len: usize) -> bool {
        let (_, len) = Self::read_slot(buf, slot);
        len != TOMBSTONE_LEN && record_len as u32 <= len
    }

    /// Iterates all live (non-tombstoned) slots as `(slot_index, bytes)`.
    pub fn iter(buf: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
        (0..Self::slot_count(buf)).filter_map(move |s| Self::get(buf, s).map(|rec| (s, rec)))
    }

    /// Rewrites the heap, dropping tombstoned records and compacting live
    /// ones contiguously from `PAGE_HEADER_LEN`. Slot indices are preserved;
    /// only their offsets change.
    pub fn compact(buf: &mut [u8]) {
        let slot_count = Self::slot_count(buf);
        let mut live: Vec<(u16, Vec<u8>)> = Vec::new();
        for s in 0..slot_count {
            if let Some(rec) = Self::get(buf, s) {
                live.push((s, rec.to_vec()));
            }
        }
        let mut cursor = PAGE_HEADER_LEN as u16;
        for (s, rec) in &live {
            let start = usize::from(cursor);
            buf[start..start + rec.len()].copy_from_slice(rec);
            Self::write_slot(buf, *s, cursor as u32, rec.len() as u32);
            cursor += rec.len() as u16;
        }
        Self::set_heap_end(buf, cursor);
    }
}
