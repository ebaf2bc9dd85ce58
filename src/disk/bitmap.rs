//! One bitmap page per extent, tracking which of its data pages are free.
//!
//! Grounded on `original_source/src/page/bitmap_page.cpp`: a bit set means
//! the page is allocated, and a "next free hint" is walked circularly to
//! make repeated allocation cheap.

use bit_vec::BitVec;

use crate::config::{INVALID_BITMAP_HINT, PAGE_SIZE};
use crate::io::{Decodeable, Encodeable, SmallWriter};

pub struct BitmapPage {
    bits: BitVec,
    next_free_hint: u32,
}

impl BitmapPage {
    pub fn new(page_count: usize) -> Self {
        Self {
            bits: BitVec::from_elem(page_count, false),
            next_free_hint: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// Returns the offset (within this extent) of the page it allocated,
    /// or `None` if the extent is full.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.next_free_hint == INVALID_BITMAP_HINT {
            return None;
        }

        let n = self.bits.len();
        let start = self.next_free_hint as usize;
        for step in 0..n {
            let idx = (start + step) % n;
            if !self.bits[idx] {
                self.bits.set(idx, true);
                self.next_free_hint = self.find_free_from((idx + 1) % n);
                return Some(idx as u32);
            }
        }
        None
    }

    pub fn deallocate_page(&mut self, offset: u32) {
        self.bits.set(offset as usize, false);
        if self.next_free_hint == INVALID_BITMAP_HINT {
            self.next_free_hint = offset;
        }
    }

    pub fn is_page_free(&self, offset: u32) -> bool {
        !self.bits[offset as usize]
    }

    fn find_free_from(&self, start: usize) -> u32 {
        let n = self.bits.len();
        for step in 0..n {
            let idx = (start + step) % n;
            if !self.bits[idx] {
                return idx as u32;
            }
        }
        INVALID_BITMAP_HINT
    }

    pub fn to_page_bytes(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&self.next_free_hint);
        w.write(&self.bits);
        w.to_padded_bytes(PAGE_SIZE)
    }

    pub fn from_page_bytes(buf: &[u8], page_count: usize) -> Self {
        let mut cursor = std::io::Cursor::new(buf);
        let next_free_hint = u32::decode_from(&mut cursor);
        let mut bits = BitVec::decode_from(&mut cursor);
        bits.truncate(page_count);
        if bits.len() < page_count {
            bits.grow(page_count - bits.len(), false);
        }
        Self { bits, next_free_hint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_offsets_in_order() {
        let mut bitmap = BitmapPage::new(8);
        for expected in 0..8u32 {
            assert_eq!(bitmap.allocate_page(), Some(expected));
        }
        assert_eq!(bitmap.allocate_page(), None);
    }

    #[test]
    fn deallocate_resets_hint_only_when_full() {
        let mut bitmap = BitmapPage::new(4);
        for _ in 0..4 {
            bitmap.allocate_page().unwrap();
        }
        assert_eq!(bitmap.allocate_page(), None);

        bitmap.deallocate_page(2);
        assert_eq!(bitmap.allocate_page(), Some(2));
    }

    #[test]
    fn roundtrips_through_page_bytes() {
        let mut bitmap = BitmapPage::new(16);
        bitmap.allocate_page();
        bitmap.allocate_page();
        bitmap.deallocate_page(0);

        let bytes = bitmap.to_page_bytes();
        let restored = BitmapPage::from_page_bytes(&bytes, 16);
        assert_eq!(restored.is_page_free(0), true);
        assert_eq!(restored.is_page_free(1), false);
    }
}
