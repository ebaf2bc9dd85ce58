//! Slotted page layout shared by every table heap page (spec §3:
//! "Slotted table page"). A thin view over a buffer-pool page's raw
//! bytes; generalized from the teacher's `BTreeLeafPage` slot/bitmap
//! idiom (`src/btree/page.rs`) to variable-length tuples.

use std::convert::TryInto;

use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE, SLOT_SIZE, TABLE_PAGE_HEADER_SIZE, TOMBSTONE_BIT};

pub struct TablePage<'a> {
    buf: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        Self { buf }
    }

    pub fn init(&mut self, prev_page_id: PageId, next_page_id: PageId) {
        self.set_prev_page_id(prev_page_id);
        self.set_next_page_id(next_page_id);
        self.set_free_space_pointer(PAGE_SIZE as u32);
        self.set_tuple_count(0);
    }

    fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.buf[offset..offset + 4].try_into().unwrap())
    }

    fn write_i32(&mut self, offset: usize, v: i32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.buf[offset..offset + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn prev_page_id(&self) -> PageId {
        self.read_i32(0)
    }

    pub fn set_prev_page_id(&mut self, v: PageId) {
        self.write_i32(0, v);
    }

    pub fn next_page_id(&self) -> PageId {
        self.read_i32(4)
    }

    pub fn set_next_page_id(&mut self, v: PageId) {
        self.write_i32(4, v);
    }

    pub fn free_space_pointer(&self) -> u32 {
        self.read_u32(8)
    }

    fn set_free_space_pointer(&mut self, v: u32) {
        self.write_u32(8, v);
    }

    pub fn tuple_count(&self) -> u32 {
        self.read_u32(12)
    }

    fn set_tuple_count(&mut self, v: u32) {
        self.write_u32(12, v);
    }

    fn slot_offset(slot: u32) -> usize {
        TABLE_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE
    }

    fn slot_raw(&self, slot: u32) -> (u32, u32) {
        let o = Self::slot_offset(slot);
        (self.read_u32(o), self.read_u32(o + 4))
    }

    fn set_slot_raw(&mut self, slot: u32, offset: u32, size: u32) {
        let o = Self::slot_offset(slot);
        self.write_u32(o, offset);
        self.write_u32(o + 4, size);
    }

    pub fn is_deleted(&self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return true;
        }
        self.slot_raw(slot).1 & TOMBSTONE_BIT != 0
    }

    pub fn tuple_size(&self, slot: u32) -> u32 {
        self.slot_raw(slot).1 & !TOMBSTONE_BIT
    }

    pub fn tuple_bytes(&self, slot: u32) -> Option<&[u8]> {
        if self.is_deleted(slot) {
            return None;
        }
        let (offset, raw_size) = self.slot_raw(slot);
        let size = (raw_size & !TOMBSTONE_BIT) as usize;
        Some(&self.buf[offset as usize..offset as usize + size])
    }

    /// Bytes available for a new tuple, accounting for the extra slot
    /// directory entry a brand-new insert would need.
    pub fn free_space_remaining(&self) -> usize {
        let slot_dir_end = TABLE_PAGE_HEADER_SIZE + self.tuple_count() as usize * SLOT_SIZE;
        let fsp = self.free_space_pointer() as usize;
        fsp.saturating_sub(slot_dir_end)
    }

    /// Inserts a new tuple, allocating a fresh slot. Returns `None` if
    /// the page lacks room for the tuple plus its slot entry.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Option<u32> {
        let size = data.len() as u32;
        if self.free_space_remaining() < size as usize + SLOT_SIZE {
            return None;
        }

        let fsp = self.free_space_pointer() - size;
        self.buf[fsp as usize..fsp as usize + size as usize].copy_from_slice(data);

        let slot = self.tuple_count();
        self.set_slot_raw(slot, fsp, size);
        self.set_free_space_pointer(fsp);
        self.set_tuple_count(slot + 1);
        Some(slot)
    }

    /// Overwrites an existing live tuple in place. Only possible when
    /// the new payload is no larger than the slot's current size; larger
    /// updates go through mark-delete + reinsert instead.
    pub fn update_tuple_in_place(&mut self, slot: u32, data: &[u8]) -> bool {
        if self.is_deleted(slot) {
            return false;
        }
        let (offset, raw_size) = self.slot_raw(slot);
        let old_size = (raw_size & !TOMBSTONE_BIT) as usize;
        if data.len() > old_size {
            return false;
        }
        self.buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.set_slot_raw(slot, offset, data.len() as u32);
        true
    }

    /// Sets the tombstone bit without reclaiming space.
    pub fn mark_delete(&mut self, slot: u32) -> bool {
        if self.is_deleted(slot) {
            return false;
        }
        let (offset, size) = self.slot_raw(slot);
        self.set_slot_raw(slot, offset, size | TOMBSTONE_BIT);
        true
    }

    /// Clears the tombstone bit, restoring visibility.
    pub fn rollback_delete(&mut self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot_raw(slot);
        if size & TOMBSTONE_BIT == 0 {
            return false;
        }
        self.set_slot_raw(slot, offset, size & !TOMBSTONE_BIT);
        true
    }

    /// Reclaims a tombstoned slot's space bookkeeping. The slot number
    /// itself is preserved (row ids stay stable) but its payload is
    /// considered gone.
    pub fn apply_delete(&mut self, slot: u32) {
        if slot >= self.tuple_count() {
            return;
        }
        let (offset, _) = self.slot_raw(slot);
        self.set_slot_raw(slot, offset, TOMBSTONE_BIT);
    }

    pub fn is_empty(&self) -> bool {
        (0..self.tuple_count()).all(|s| self.is_deleted(s))
    }

    /// First live slot at or after `start`, if any.
    pub fn next_live_slot(&self, start: u32) -> Option<u32> {
        (start..self.tuple_count()).find(|&s| !self.is_deleted(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_delete_rollback() {
        let mut raw = vec![0u8; PAGE_SIZE];
        let mut page = TablePage::new(&mut raw);
        page.init(INVALID_PAGE_ID, INVALID_PAGE_ID);

        let slot = page.insert_tuple(b"hello").unwrap();
        assert_eq!(page.tuple_bytes(slot), Some(&b"hello"[..]));

        assert!(page.mark_delete(slot));
        assert_eq!(page.tuple_bytes(slot), None);

        assert!(page.rollback_delete(slot));
        assert_eq!(page.tuple_bytes(slot), Some(&b"hello"[..]));
    }

    #[test]
    fn rejects_insert_when_out_of_space() {
        let mut raw = vec![0u8; PAGE_SIZE];
        let mut page = TablePage::new(&mut raw);
        page.init(INVALID_PAGE_ID, INVALID_PAGE_ID);

        let big = vec![7u8; PAGE_SIZE];
        assert_eq!(page.insert_tuple(&big), None);
    }
}
