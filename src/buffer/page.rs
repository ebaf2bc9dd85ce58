//! In-memory representation of one cached page, owned by a buffer pool
//! frame (spec §3: "Page").

use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

pub struct Page {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
    data: Vec<u8>,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            pin_count: 0,
            is_dirty: false,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn empty() -> Self {
        Self::new(INVALID_PAGE_ID)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Decrements the pin count, saturating at zero. Returns whether the
    /// frame reached zero as a result of this call.
    pub fn unpin(&mut self) -> bool {
        if self.pin_count > 0 {
            self.pin_count -= 1;
        }
        self.pin_count == 0
    }

    /// A dirty page cannot become clean via unpin; this only ever turns
    /// the flag on.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.is_dirty = false;
    }

    /// Reinitializes the frame to hold a different page id, zeroing the
    /// backing bytes. Used both when loading a page from disk and when
    /// handing back a brand-new page.
    pub fn reset(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.pin_count = 0;
        self.is_dirty = false;
        for b in self.data.iter_mut() {
            *b = 0;
        }
    }
}
