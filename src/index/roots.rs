//! Index-roots directory: a single fixed page (`INDEX_ROOTS_PAGE_ID`)
//! mapping each index id to its current root page id, so a freshly
//! opened engine can find every B+-tree's root without scanning the
//! catalog. Format: `magic | count | (index_id, root_page_id) * count`.

use crate::buffer::BufferPoolManager;
use crate::config::{PageId, INDEX_ROOTS_PAGE_ID};
use crate::error::{Error, Result};
use crate::io::{Decodeable, Encodeable, SmallWriter};

const INDEX_ROOTS_MAGIC: u32 = 0x524f_4f54; // "ROOT"

struct RootsDirectory {
    entries: Vec<(u32, PageId)>,
}

impl RootsDirectory {
    fn load(bpm: &mut BufferPoolManager) -> Result<Self> {
        let page = bpm
            .fetch_page(INDEX_ROOTS_PAGE_ID)
            .ok_or(Error::OutOfMemory)?;
        let data = page.data().to_vec();
        bpm.unpin_page(INDEX_ROOTS_PAGE_ID, false);

        let mut cursor = std::io::Cursor::new(&data[..]);
        let magic = u32::decode_from(&mut cursor);
        if magic != INDEX_ROOTS_MAGIC {
            return Ok(Self { entries: Vec::new() });
        }
        let count = u32::decode_from(&mut cursor) as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let index_id = u32::decode_from(&mut cursor);
            let root_page_id = i32::decode_from(&mut cursor);
            entries.push((index_id, root_page_id));
        }
        Ok(Self { entries })
    }

    fn save(&self, bpm: &mut BufferPoolManager) -> Result<()> {
        let mut w = SmallWriter::new();
        w.write(&INDEX_ROOTS_MAGIC);
        w.write(&(self.entries.len() as u32));
        for (index_id, root_page_id) in &self.entries {
            w.write(index_id);
            w.write(root_page_id);
        }
        let bytes = w.to_padded_bytes(crate::config::PAGE_SIZE);

        let page = bpm
            .fetch_page(INDEX_ROOTS_PAGE_ID)
            .ok_or(Error::OutOfMemory)?;
        page.data_mut().copy_from_slice(&bytes);
        page.mark_dirty();
        bpm.unpin_page(INDEX_ROOTS_PAGE_ID, true);
        Ok(())
    }

    fn set(&mut self, index_id: u32, root_page_id: PageId) {
        match self.entries.iter_mut().find(|(id, _)| *id == index_id) {
            Some(entry) => entry.1 = root_page_id,
            None => self.entries.push((index_id, root_page_id)),
        }
    }

    fn get(&self, index_id: u32) -> Option<PageId> {
        self.entries.iter().find(|(id, _)| *id == index_id).map(|(_, p)| *p)
    }
}

pub fn get(index_id: u32, bpm: &mut BufferPoolManager) -> Result<Option<PageId>> {
    Ok(RootsDirectory::load(bpm)?.get(index_id))
}

pub fn set(index_id: u32, root_page_id: PageId, bpm: &mut BufferPoolManager) -> Result<()> {
    let mut dir = RootsDirectory::load(bpm)?;
    dir.set(index_id, root_page_id);
    dir.save(bpm)
}
