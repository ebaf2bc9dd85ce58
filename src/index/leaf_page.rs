//! B+-tree leaf node: holds the actual key/row-id pairs plus a sibling
//! pointer for forward iteration. Generalized from the teacher's
//! `BTreeLeafPage` (`src/btree/page.rs`), which likewise keeps its
//! decoded tuples in a `Vec` rather than re-parsing raw bytes on every
//! access.

use std::io::{Cursor, Read};

use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::io::{read_exact, Decodeable, Encodeable, SmallWriter};
use crate::index::key::KeyComparator;
use crate::storage::row::RowId;

pub const IS_LEAF_MARKER: u8 = 1;

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub page_id: PageId,
    pub parent_id: PageId,
    pub next_page_id: PageId,
    pub key_size: usize,
    pub max_size: usize,
    /// Sorted by key.
    pub entries: Vec<(Vec<u8>, RowId)>,
}

impl LeafNode {
    pub fn new(page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) -> Self {
        Self {
            page_id,
            parent_id,
            next_page_id: INVALID_PAGE_ID,
            key_size,
            max_size,
            entries: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_overflow(&self) -> bool {
        self.entries.len() > self.max_size
    }

    pub fn is_underflow(&self, min_size: usize) -> bool {
        self.entries.len() < min_size
    }

    /// Index of the first entry whose key is `>= key`.
    pub fn lower_bound(&self, key: &[u8], cmp: &KeyComparator) -> usize {
        self.entries.partition_point(|(k, _)| cmp.compare(k, key) == std::cmp::Ordering::Less)
    }

    pub fn find(&self, key: &[u8], cmp: &KeyComparator) -> Option<RowId> {
        let pos = self.lower_bound(key, cmp);
        self.entries
            .get(pos)
            .filter(|(k, _)| cmp.compare(k, key) == std::cmp::Ordering::Equal)
            .map(|(_, rid)| *rid)
    }

    /// Returns `false` without modifying the node when `key` is already
    /// present (unique-key constraint).
    pub fn insert(&mut self, key: Vec<u8>, rid: RowId, cmp: &KeyComparator) -> bool {
        let pos = self.lower_bound(&key, cmp);
        if let Some((existing, _)) = self.entries.get(pos) {
            if cmp.compare(existing, &key) == std::cmp::Ordering::Equal {
                return false;
            }
        }
        self.entries.insert(pos, (key, rid));
        true
    }

    pub fn remove(&mut self, key: &[u8], cmp: &KeyComparator) -> bool {
        let pos = self.lower_bound(key, cmp);
        match self.entries.get(pos) {
            Some((existing, _)) if cmp.compare(existing, key) == std::cmp::Ordering::Equal => {
                self.entries.remove(pos);
                true
            }
            _ => false,
        }
    }

    pub fn separator_key(&self) -> Vec<u8> {
        self.entries[0].0.clone()
    }

    /// Moves the upper half of this node's entries into a freshly
    /// allocated right sibling, linking the two together.
    pub fn split(&mut self, new_page_id: PageId) -> LeafNode {
        let mid = self.entries.len() / 2;
        let right_entries = self.entries.split_off(mid);

        let mut right = LeafNode::new(new_page_id, self.parent_id, self.key_size, self.max_size);
        right.entries = right_entries;
        right.next_page_id = self.next_page_id;
        self.next_page_id = new_page_id;
        right
    }

    /// Merges `right`'s entries into `self` and adopts its sibling link.
    pub fn merge_from(&mut self, mut right: LeafNode) {
        self.entries.append(&mut right.entries);
        self.next_page_id = right.next_page_id;
    }

    /// Moves `right`'s smallest entry onto the end of `self` (used when
    /// redistributing from the right sibling).
    pub fn borrow_from_right(&mut self, right: &mut LeafNode) {
        let entry = right.entries.remove(0);
        self.entries.push(entry);
    }

    /// Moves `left`'s largest entry onto the front of `self` (used when
    /// redistributing from the left sibling).
    pub fn borrow_from_left(&mut self, left: &mut LeafNode) {
        let entry = left.entries.pop().unwrap();
        self.entries.insert(0, entry);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&IS_LEAF_MARKER);
        w.write(&self.page_id);
        w.write(&self.parent_id);
        w.write(&(self.key_size as u32));
        w.write(&(self.entries.len() as u32));
        w.write(&(self.max_size as u32));
        w.write(&self.next_page_id);
        for (key, rid) in &self.entries {
            w.write_raw(key);
            w.write(&rid.page_id);
            w.write(&rid.slot_num);
        }
        w.to_padded_bytes(PAGE_SIZE)
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut cursor = Cursor::new(buf);
        Self::decode_from(&mut cursor)
    }

    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let _is_leaf = u8::decode_from(reader);
        let page_id = i32::decode_from(reader);
        let parent_id = i32::decode_from(reader);
        let key_size = u32::decode_from(reader) as usize;
        let size = u32::decode_from(reader) as usize;
        let max_size = u32::decode_from(reader) as usize;
        let next_page_id = i32::decode_from(reader);

        let mut entries = Vec::with_capacity(size);
        for _ in 0..size {
            let key = read_exact(reader, key_size);
            let page_id = i32::decode_from(reader);
            let slot_num = u32::decode_from(reader);
            entries.push((key, RowId::new(page_id, slot_num)));
        }

        Self {
            page_id,
            parent_id,
            next_page_id,
            key_size,
            max_size,
            entries,
        }
    }
}
