//! Fixed-capacity page cache sitting between every other subsystem and
//! the disk manager. Grounded on
//! `original_source/src/buffer/buffer_pool_manager.cpp` for exact
//! fetch/new/unpin/delete/flush semantics.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::buffer::page::Page;
use crate::buffer::replacer::Replacer;
use crate::buffer::FrameId;
use crate::config::{PageId, ReplacerKind, INVALID_PAGE_ID};
use crate::disk::DiskManager;

pub struct BufferPoolManager {
    frames: Vec<Page>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Replacer,
    disk_manager: DiskManager,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_kind: ReplacerKind, disk_manager: DiskManager) -> Self {
        let frames = (0..pool_size).map(|_| Page::empty()).collect();
        let free_list = (0..pool_size).collect();

        Self {
            frames,
            page_table: HashMap::new(),
            free_list,
            replacer: Replacer::new(replacer_kind, pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk_manager(&mut self) -> &mut DiskManager {
        &mut self.disk_manager
    }

    /// Resident, pinned page + free-list slot count is always the pool
    /// size at any quiescent point (spec §8 property 2).
    pub fn resident_count(&self) -> usize {
        self.page_table.len()
    }

    fn victim_frame(&mut self) -> Option<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Some(frame_id);
        }
        self.replacer.victim()
    }

    /// Flushes the old occupant of `frame_id` (if any and dirty), loads
    /// `page_id` into it (unless `is_new`, in which case the frame is
    /// just zeroed), pins it once, and registers it in the page table.
    fn evict_and_load(&mut self, frame_id: FrameId, page_id: PageId, is_new: bool) -> bool {
        let old_id = self.frames[frame_id].page_id();
        if old_id != INVALID_PAGE_ID {
            if self.frames[frame_id].is_dirty() {
                let data = self.frames[frame_id].data().to_vec();
                if self.disk_manager.write_page(old_id, &data).is_err() {
                    debug!("buffer pool: failed to flush page {} on eviction", old_id);
                }
            }
            self.page_table.remove(&old_id);
        }

        self.frames[frame_id].reset(page_id);

        if !is_new {
            match self.disk_manager.read_page(page_id) {
                Ok(data) => self.frames[frame_id].data_mut().copy_from_slice(&data),
                Err(_) => return false,
            }
        }

        self.frames[frame_id].pin();
        self.page_table.insert(page_id, frame_id);
        true
    }

    /// Returns `None` when the page is not cached and the pool has no
    /// free or evictable frame (every frame is pinned).
    pub fn fetch_page(&mut self, page_id: PageId) -> Option<&mut Page> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            let page = &mut self.frames[frame_id];
            if page.pin_count() == 0 {
                self.replacer.pin(frame_id);
            }
            page.pin();
            return Some(&mut self.frames[frame_id]);
        }

        let frame_id = self.victim_frame()?;
        if !self.evict_and_load(frame_id, page_id, false) {
            self.free_list.push_back(frame_id);
            return None;
        }
        Some(&mut self.frames[frame_id])
    }

    /// Allocates a brand-new page from the disk manager and pins it.
    pub fn new_page(&mut self) -> Option<(PageId, &mut Page)> {
        let frame_id = self.victim_frame()?;
        let page_id = self.disk_manager.allocate_page().ok()?;
        if !self.evict_and_load(frame_id, page_id, true) {
            self.free_list.push_back(frame_id);
            return None;
        }
        Some((page_id, &mut self.frames[frame_id]))
    }

    /// Requires `pin_count > 0`. ORs `is_dirty` into the page's dirty
    /// flag: a dirty page cannot become clean via unpin.
    pub fn unpin_page(&mut self, page_id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.get(&page_id) {
            Some(&f) => f,
            None => return false,
        };

        let page = &mut self.frames[frame_id];
        if page.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            page.mark_dirty();
        }
        if page.unpin() {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// True when the page is absent or resident-and-unpinned; false when
    /// pinned. Deallocates the page on disk as a side effect of success.
    pub fn delete_page(&mut self, page_id: PageId) -> bool {
        match self.page_table.get(&page_id).copied() {
            None => {
                let _ = self.disk_manager.deallocate_page(page_id);
                true
            }
            Some(frame_id) => {
                if self.frames[frame_id].pin_count() > 0 {
                    return false;
                }
                self.replacer.pin(frame_id);
                self.page_table.remove(&page_id);
                self.frames[frame_id].reset(INVALID_PAGE_ID);
                self.free_list.push_back(frame_id);
                let _ = self.disk_manager.deallocate_page(page_id);
                true
            }
        }
    }

    pub fn flush_page(&mut self, page_id: PageId) -> bool {
        let frame_id = match self.page_table.get(&page_id) {
            Some(&f) => f,
            None => return false,
        };
        let page = &mut self.frames[frame_id];
        if page.is_dirty() {
            if self.disk_manager.write_page(page_id, page.data()).is_err() {
                return false;
            }
            page.clear_dirty();
        }
        true
    }

    pub fn flush_all_pages(&mut self) {
        let ids: Vec<PageId> = self.page_table.keys().copied().collect();
        for id in ids {
            self.flush_page(id);
        }
    }

    pub fn check_all_unpinned(&self) -> bool {
        self.frames.iter().all(|p| p.pin_count() == 0)
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        self.flush_all_pages();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_pool(pool_size: usize) -> BufferPoolManager {
        let dir = tempdir().unwrap();
        // leak the tempdir so the backing file survives the test
        let path = dir.into_path().join("db");
        let disk_manager = DiskManager::open(path, true).unwrap();
        BufferPoolManager::new(pool_size, ReplacerKind::Lru, disk_manager)
    }

    #[test]
    fn new_page_fails_once_pool_is_full_of_pinned_frames() {
        let mut pool = new_pool(10);
        let mut ids = Vec::new();
        for _ in 0..10 {
            let (id, _) = pool.new_page().unwrap();
            ids.push(id);
        }
        assert!(pool.new_page().is_none());

        for id in &ids[0..5] {
            assert!(pool.unpin_page(*id, true));
        }
        for _ in 0..5 {
            assert!(pool.new_page().is_some());
        }
    }

    #[test]
    fn fetch_returns_previously_written_bytes() {
        let mut pool = new_pool(4);
        let (id, page) = pool.new_page().unwrap();
        page.data_mut()[0] = 0xAB;
        pool.unpin_page(id, true);
        pool.flush_page(id);

        // evict by cycling through more pages than the pool can hold
        for _ in 0..4 {
            let (new_id, _) = pool.new_page().unwrap();
            pool.unpin_page(new_id, false);
        }

        let fetched = pool.fetch_page(id).unwrap();
        assert_eq!(fetched.data()[0], 0xAB);
    }

    #[test]
    fn delete_page_fails_while_pinned() {
        let mut pool = new_pool(2);
        let (id, _) = pool.new_page().unwrap();
        assert!(!pool.delete_page(id));
        pool.unpin_page(id, false);
        assert!(pool.delete_page(id));
    }
}
