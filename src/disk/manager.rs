//! Translates logical page ids to file offsets and owns the single flat
//! file backing an engine instance. No caching happens here; the buffer
//! pool is the only cache in the system (spec §4.2).
//!
//! File layout: page 0 is the file meta; every following extent is one
//! bitmap page plus [`BITMAP_SIZE`] contiguous data pages. Grounded on
//! `original_source/src/buffer/buffer_pool_manager.cpp`'s
//! `AllocatePage`/`DeallocatePage`/`IsPageFree`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::config::{
    PageId, BITMAP_SIZE, DISK_META_MAGIC, FILE_META_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
    RESERVED_PAGE_COUNT,
};
use crate::disk::bitmap::BitmapPage;
use crate::error::{Error, Result};
use crate::io::{Decodeable, Encodeable, SmallWriter};

struct DiskMeta {
    extent_count: u32,
    allocated_pages: u32,
    per_extent_used: Vec<u32>,
}

impl DiskMeta {
    fn empty() -> Self {
        Self {
            extent_count: 0,
            allocated_pages: 0,
            per_extent_used: Vec::new(),
        }
    }

    fn to_page_bytes(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&DISK_META_MAGIC);
        w.write(&self.extent_count);
        w.write(&self.allocated_pages);
        for used in &self.per_extent_used {
            w.write(used);
        }
        w.to_padded_bytes(PAGE_SIZE)
    }

    fn from_page_bytes(buf: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(buf);
        let magic = u32::decode_from(&mut cursor);
        if magic != DISK_META_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let extent_count = u32::decode_from(&mut cursor);
        let allocated_pages = u32::decode_from(&mut cursor);
        let per_extent_used = (0..extent_count)
            .map(|_| u32::decode_from(&mut cursor))
            .collect();
        Ok(Self {
            extent_count,
            allocated_pages,
            per_extent_used,
        })
    }
}

pub struct DiskManager {
    file: File,
    meta: DiskMeta,
    bitmaps: Vec<BitmapPage>,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P, init: bool) -> Result<Self> {
        let fresh = init || !path.as_ref().exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut manager = Self {
            file,
            meta: DiskMeta::empty(),
            bitmaps: Vec::new(),
        };

        if fresh {
            manager.file.set_len(PAGE_SIZE as u64)?;
            manager.flush_meta()?;
            manager.reserve_leading_pages()?;
        } else {
            manager.load()?;
        }

        Ok(manager)
    }

    /// Carves the first extent out and allocates its first
    /// [`RESERVED_PAGE_COUNT`] pages, so the reserved logical ids (spec
    /// §6: "Reserved ids") back a real extent before the catalog or the
    /// B+-tree roots directory ever fetches them, and ordinary
    /// `allocate_page` calls start above the reserved range instead of
    /// colliding with it.
    fn reserve_leading_pages(&mut self) -> Result<()> {
        for _ in 0..RESERVED_PAGE_COUNT {
            self.allocate_page()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let buf = self.read_raw(FILE_META_PAGE_ID as u64)?;
        self.meta = DiskMeta::from_page_bytes(&buf)?;
        self.bitmaps = Vec::with_capacity(self.meta.extent_count as usize);
        for extent in 0..self.meta.extent_count {
            let buf = self.read_raw(self.bitmap_page_offset_id(extent))?;
            self.bitmaps.push(BitmapPage::from_page_bytes(&buf, BITMAP_SIZE));
        }
        Ok(())
    }

    /// Allocates a page from the first extent with free space, appending
    /// a brand-new extent when every existing one is full.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        for extent in 0..self.bitmaps.len() {
            if let Some(offset) = self.bitmaps[extent].allocate_page() {
                self.meta.per_extent_used[extent] += 1;
                self.meta.allocated_pages += 1;
                self.flush_bitmap(extent)?;
                self.flush_meta()?;
                return Ok(self.logical_page_id(extent, offset));
            }
        }

        let extent = self.append_extent()?;
        let offset = self.bitmaps[extent]
            .allocate_page()
            .ok_or(Error::OutOfMemory)?;
        self.meta.per_extent_used[extent] += 1;
        self.meta.allocated_pages += 1;
        self.flush_bitmap(extent)?;
        self.flush_meta()?;
        Ok(self.logical_page_id(extent, offset))
    }

    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        let (extent, offset) = self.split_page_id(page_id)?;
        self.bitmaps[extent].deallocate_page(offset);
        self.meta.per_extent_used[extent] -= 1;
        self.meta.allocated_pages -= 1;
        self.flush_bitmap(extent)?;
        self.flush_meta()?;
        Ok(())
    }

    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        let (extent, offset) = self.split_page_id(page_id)?;
        Ok(self.bitmaps[extent].is_page_free(offset))
    }

    pub fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>> {
        let (extent, offset) = self.split_page_id(page_id)?;
        let file_page_id = self.data_page_offset_id(extent, offset);
        self.read_raw(file_page_id)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let (extent, offset) = self.split_page_id(page_id)?;
        let file_page_id = self.data_page_offset_id(extent, offset);
        self.write_raw(file_page_id, data)
    }

    pub fn allocated_pages(&self) -> u32 {
        self.meta.allocated_pages
    }

    fn append_extent(&mut self) -> Result<usize> {
        let extent = self.bitmaps.len();
        self.bitmaps.push(BitmapPage::new(BITMAP_SIZE));
        self.meta.per_extent_used.push(0);
        self.meta.extent_count += 1;

        let new_len = self.file_page_count_for(extent + 1) as u64 * PAGE_SIZE as u64;
        self.file.set_len(new_len)?;
        self.flush_bitmap(extent)?;
        debug!("disk manager: appended extent {}", extent);
        Ok(extent)
    }

    fn flush_meta(&mut self) -> Result<()> {
        let bytes = self.meta.to_page_bytes();
        self.write_raw(FILE_META_PAGE_ID as u64, &bytes)
    }

    fn flush_bitmap(&mut self, extent: usize) -> Result<()> {
        let bytes = self.bitmaps[extent].to_page_bytes();
        let page_id = self.bitmap_page_offset_id(extent as u32);
        self.write_raw(page_id, &bytes)
    }

    fn logical_page_id(&self, extent: usize, offset: u32) -> PageId {
        (extent as i64 * BITMAP_SIZE as i64 + offset as i64) as PageId
    }

    fn split_page_id(&self, page_id: PageId) -> Result<(usize, u32)> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(Error::Failed(format!("invalid page id {}", page_id)));
        }
        let extent = page_id as usize / BITMAP_SIZE;
        let offset = (page_id as usize % BITMAP_SIZE) as u32;
        if extent >= self.bitmaps.len() {
            return Err(Error::Failed(format!(
                "page {} is outside any allocated extent",
                page_id
            )));
        }
        Ok((extent, offset))
    }

    /// Number of raw file-page slots (meta + bitmap + data pages)
    /// spanned by `extent_count` extents.
    fn file_page_count_for(&self, extent_count: usize) -> usize {
        1 + extent_count * (1 + BITMAP_SIZE)
    }

    fn bitmap_page_offset_id(&self, extent: u32) -> u64 {
        1 + extent as u64 * (1 + BITMAP_SIZE as u64)
    }

    fn data_page_offset_id(&self, extent: usize, offset: u32) -> u64 {
        self.bitmap_page_offset_id(extent as u32) + 1 + offset as u64
    }

    fn read_raw(&mut self, file_page_id: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(file_page_id * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_raw(&mut self, file_page_id: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(file_page_id * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_database_reserves_the_catalog_and_roots_pages() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("db"), true).unwrap();

        assert!(!dm.is_page_free(crate::config::CATALOG_META_PAGE_ID).unwrap());
        assert!(!dm.is_page_free(crate::config::INDEX_ROOTS_PAGE_ID).unwrap());
        assert_eq!(dm.allocated_pages(), RESERVED_PAGE_COUNT);
        assert_eq!(dm.allocate_page().unwrap(), RESERVED_PAGE_COUNT as i32);
    }

    #[test]
    fn allocate_then_deallocate_reuses_offset() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("db"), true).unwrap();

        let first = dm.allocate_page().unwrap();
        for _ in 0..10 {
            dm.allocate_page().unwrap();
        }

        dm.deallocate_page(first + 3).unwrap();
        assert!(dm.is_page_free(first + 3).unwrap());

        let reused = dm.allocate_page().unwrap();
        assert_eq!(reused, first + 3);
    }

    #[test]
    fn read_write_roundtrip() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("db"), true).unwrap();
        let id = dm.allocate_page().unwrap();

        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 42;
        dm.write_page(id, &data).unwrap();

        let read_back = dm.read_page(id).unwrap();
        assert_eq!(read_back[0], 42);
    }

    #[test]
    fn reopen_recovers_allocation_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let freed;
        {
            let mut dm = DiskManager::open(&path, true).unwrap();
            let mut ids = Vec::new();
            for _ in 0..5 {
                ids.push(dm.allocate_page().unwrap());
            }
            freed = ids[2];
            dm.deallocate_page(freed).unwrap();
        }

        let mut dm = DiskManager::open(&path, false).unwrap();
        assert!(dm.is_page_free(freed).unwrap());
        assert_eq!(dm.allocate_page().unwrap(), freed);
    }
}
