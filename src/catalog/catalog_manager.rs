//! Persistent registry of tables and indexes (spec §4.7). Grounded on
//! `original_source/src/catalog/catalog_manager.cpp` for the in-memory
//! map shape and the catalog-meta-page layout; table/index meta pages
//! follow the same magic-prefixed format as [`crate::storage::schema::Schema`].

use std::collections::HashMap;
use std::io::Cursor;

use crate::buffer::BufferPoolManager;
use crate::config::{
    PageId, CATALOG_META_MAGIC, CATALOG_META_PAGE_ID, INDEX_META_MAGIC, PAGE_SIZE, TABLE_META_MAGIC,
};
use crate::error::{Error, Result};
use crate::index::{BPlusTree, KeyComparator};
use crate::io::{Decodeable, Encodeable, SmallWriter};
use crate::storage::{Schema, TableHeap};

pub struct TableInfo {
    pub table_id: u32,
    pub name: String,
    pub schema: Schema,
    pub heap: TableHeap,
    meta_page_id: PageId,
}

pub struct IndexInfo {
    pub index_id: u32,
    pub name: String,
    pub table_id: u32,
    pub key_columns: Vec<usize>,
    pub tree: BPlusTree,
    meta_page_id: PageId,
}

/// `{table_name -> table_id, table_id -> TableInfo, table_id -> {index_name
/// -> index_id}, index_id -> IndexInfo}`, mirrored on disk by the catalog
/// meta page at [`CATALOG_META_PAGE_ID`].
pub struct CatalogManager {
    next_table_id: u32,
    next_index_id: u32,
    table_ids_by_name: HashMap<String, u32>,
    tables: HashMap<u32, TableInfo>,
    index_ids_by_table: HashMap<u32, HashMap<String, u32>>,
    indexes: HashMap<u32, IndexInfo>,
}

impl CatalogManager {
    /// `init = true` builds and persists an empty catalog; `init = false`
    /// reloads every table and index named in the catalog meta page.
    pub fn open(init: bool, bpm: &mut BufferPoolManager) -> Result<Self> {
        let mut catalog = Self {
            next_table_id: 0,
            next_index_id: 0,
            table_ids_by_name: HashMap::new(),
            tables: HashMap::new(),
            index_ids_by_table: HashMap::new(),
            indexes: HashMap::new(),
        };

        if init {
            catalog.write_catalog_meta(bpm)?;
            return Ok(catalog);
        }

        let page = bpm.fetch_page(CATALOG_META_PAGE_ID).ok_or(Error::OutOfMemory)?;
        let data = page.data().to_vec();
        bpm.unpin_page(CATALOG_META_PAGE_ID, false);

        let mut cursor = Cursor::new(&data[..]);
        let magic = u32::decode_from(&mut cursor);
        if magic != CATALOG_META_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let table_count = u32::decode_from(&mut cursor) as usize;
        let index_count = u32::decode_from(&mut cursor) as usize;

        let mut table_entries = Vec::with_capacity(table_count);
        for _ in 0..table_count {
            let table_id = u32::decode_from(&mut cursor);
            let meta_page_id = i32::decode_from(&mut cursor);
            table_entries.push((table_id, meta_page_id));
        }
        let mut index_entries = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let index_id = u32::decode_from(&mut cursor);
            let meta_page_id = i32::decode_from(&mut cursor);
            index_entries.push((index_id, meta_page_id));
        }

        for (table_id, meta_page_id) in table_entries {
            catalog.load_table(table_id, meta_page_id, bpm)?;
            catalog.next_table_id = catalog.next_table_id.max(table_id + 1);
        }
        for (index_id, meta_page_id) in index_entries {
            catalog.load_index(index_id, meta_page_id, bpm)?;
            catalog.next_index_id = catalog.next_index_id.max(index_id + 1);
        }

        Ok(catalog)
    }

    pub fn create_table(&mut self, name: &str, schema: Schema, bpm: &mut BufferPoolManager) -> Result<u32> {
        if self.table_ids_by_name.contains_key(name) {
            return Err(Error::TableAlreadyExist);
        }

        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let (meta_page_id, _) = bpm.new_page().ok_or(Error::OutOfMemory)?;
        bpm.unpin_page(meta_page_id, false);

        let info = TableInfo {
            table_id,
            name: name.to_string(),
            schema: schema.clone(),
            heap: TableHeap::new(schema),
            meta_page_id,
        };
        self.write_table_meta(&info, bpm)?;

        self.table_ids_by_name.insert(name.to_string(), table_id);
        self.tables.insert(table_id, info);
        self.write_catalog_meta(bpm)?;
        Ok(table_id)
    }

    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        key_columns: Vec<usize>,
        bpm: &mut BufferPoolManager,
    ) -> Result<u32> {
        let table_id = *self.table_ids_by_name.get(table).ok_or(Error::TableNotExist)?;

        if self
            .index_ids_by_table
            .get(&table_id)
            .map_or(false, |m| m.contains_key(name))
        {
            return Err(Error::IndexAlreadyExist);
        }

        let comparator = {
            let info = self.tables.get(&table_id).ok_or(Error::TableNotExist)?;
            for &idx in &key_columns {
                info.schema.column(idx)?;
            }
            KeyComparator::for_columns(&info.schema, &key_columns)?
        };

        let index_id = self.next_index_id;
        self.next_index_id += 1;
        let mut tree = BPlusTree::create(index_id, comparator, bpm)?;

        let backfill: Vec<_> = {
            let info = self.tables.get_mut(&table_id).unwrap();
            info.heap.iter(bpm).collect()
        };
        {
            let info = self.tables.get(&table_id).unwrap();
            for (rid, row) in backfill {
                let key = row.key_bytes(&key_columns, &info.schema)?;
                tree.insert(&key, rid, bpm)?;
            }
        }

        let (meta_page_id, _) = bpm.new_page().ok_or(Error::OutOfMemory)?;
        bpm.unpin_page(meta_page_id, false);

        let info = IndexInfo { index_id, name: name.to_string(), table_id, key_columns, tree, meta_page_id };
        self.write_index_meta(&info, bpm)?;

        self.index_ids_by_table
            .entry(table_id)
            .or_insert_with(HashMap::new)
            .insert(name.to_string(), index_id);
        self.indexes.insert(index_id, info);
        self.write_catalog_meta(bpm)?;
        Ok(index_id)
    }

    pub fn get_table_by_name(&self, name: &str) -> Result<&TableInfo> {
        let table_id = *self.table_ids_by_name.get(name).ok_or(Error::TableNotExist)?;
        self.tables.get(&table_id).ok_or(Error::TableNotExist)
    }

    pub fn get_table_by_name_mut(&mut self, name: &str) -> Result<&mut TableInfo> {
        let table_id = *self.table_ids_by_name.get(name).ok_or(Error::TableNotExist)?;
        self.tables.get_mut(&table_id).ok_or(Error::TableNotExist)
    }

    pub fn get_table(&self, table_id: u32) -> Result<&TableInfo> {
        self.tables.get(&table_id).ok_or(Error::TableNotExist)
    }

    pub fn get_table_mut(&mut self, table_id: u32) -> Result<&mut TableInfo> {
        self.tables.get_mut(&table_id).ok_or(Error::TableNotExist)
    }

    pub fn get_index(&self, table: &str, name: &str) -> Result<&IndexInfo> {
        let table_id = *self.table_ids_by_name.get(table).ok_or(Error::TableNotExist)?;
        let index_id = *self
            .index_ids_by_table
            .get(&table_id)
            .and_then(|m| m.get(name))
            .ok_or(Error::IndexNotFound)?;
        self.indexes.get(&index_id).ok_or(Error::IndexNotFound)
    }

    pub fn get_index_mut(&mut self, table: &str, name: &str) -> Result<&mut IndexInfo> {
        let table_id = *self.table_ids_by_name.get(table).ok_or(Error::TableNotExist)?;
        let index_id = *self
            .index_ids_by_table
            .get(&table_id)
            .and_then(|m| m.get(name))
            .ok_or(Error::IndexNotFound)?;
        self.indexes.get_mut(&index_id).ok_or(Error::IndexNotFound)
    }

    /// Fills `out` with every currently registered table id. An empty
    /// catalog leaves `out` empty rather than erroring.
    pub fn get_tables(&self, out: &mut Vec<u32>) {
        out.clear();
        out.reserve(self.tables.len());
        out.extend(self.tables.keys().copied());
    }

    pub fn get_table_indexes(&self, table: &str, out: &mut Vec<u32>) -> Result<()> {
        let table_id = *self.table_ids_by_name.get(table).ok_or(Error::TableNotExist)?;
        out.clear();
        if let Some(map) = self.index_ids_by_table.get(&table_id) {
            out.reserve(map.len());
            out.extend(map.values().copied());
        }
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str, bpm: &mut BufferPoolManager) -> Result<()> {
        let table_id = *self.table_ids_by_name.get(name).ok_or(Error::TableNotExist)?;

        if let Some(indexes) = self.index_ids_by_table.remove(&table_id) {
            for index_id in indexes.values() {
                self.indexes.remove(index_id);
            }
        }
        self.tables.remove(&table_id);
        self.table_ids_by_name.remove(name);

        self.write_catalog_meta(bpm)?;
        Ok(())
    }

    pub fn drop_index(&mut self, table: &str, name: &str, bpm: &mut BufferPoolManager) -> Result<()> {
        let table_id = *self.table_ids_by_name.get(table).ok_or(Error::TableNotExist)?;
        let index_id = self
            .index_ids_by_table
            .get_mut(&table_id)
            .and_then(|m| m.remove(name))
            .ok_or(Error::IndexNotFound)?;
        self.indexes.remove(&index_id);

        self.write_catalog_meta(bpm)?;
        Ok(())
    }

    pub fn flush_catalog_meta_page(&self, bpm: &mut BufferPoolManager) -> Result<()> {
        if bpm.flush_page(CATALOG_META_PAGE_ID) {
            Ok(())
        } else {
            Err(Error::Failed("catalog meta page is not resident".into()))
        }
    }

    fn load_table(&mut self, table_id: u32, meta_page_id: PageId, bpm: &mut BufferPoolManager) -> Result<()> {
        let page = bpm.fetch_page(meta_page_id).ok_or(Error::OutOfMemory)?;
        let data = page.data().to_vec();
        bpm.unpin_page(meta_page_id, false);

        let mut cursor = Cursor::new(&data[..]);
        let magic = u32::decode_from(&mut cursor);
        if magic != TABLE_META_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let _stored_table_id = u32::decode_from(&mut cursor);
        let name = String::decode_from(&mut cursor);
        let schema = Schema::decode_from(&mut cursor)?;
        let first_page_id = i32::decode_from(&mut cursor);

        let heap = TableHeap::open(schema.clone(), first_page_id, bpm)?;
        let info = TableInfo { table_id, name: name.clone(), schema, heap, meta_page_id };
        self.table_ids_by_name.insert(name, table_id);
        self.tables.insert(table_id, info);
        Ok(())
    }

    /// `index_id` is always taken from the catalog meta entry that led
    /// here, never from the page payload — a page can't be trusted to
    /// agree with the directory that pointed at it.
    fn load_index(&mut self, index_id: u32, meta_page_id: PageId, bpm: &mut BufferPoolManager) -> Result<()> {
        let page = bpm.fetch_page(meta_page_id).ok_or(Error::OutOfMemory)?;
        let data = page.data().to_vec();
        bpm.unpin_page(meta_page_id, false);

        let mut cursor = Cursor::new(&data[..]);
        let magic = u32::decode_from(&mut cursor);
        if magic != INDEX_META_MAGIC {
            return Err(Error::PageCorrupted);
        }
        let _stored_index_id = u32::decode_from(&mut cursor);
        let name = String::decode_from(&mut cursor);
        let table_id = u32::decode_from(&mut cursor);
        let key_column_count = u32::decode_from(&mut cursor) as usize;
        let mut key_columns = Vec::with_capacity(key_column_count);
        for _ in 0..key_column_count {
            key_columns.push(u32::decode_from(&mut cursor) as usize);
        }

        let comparator = {
            let info = self.tables.get(&table_id).ok_or(Error::TableNotExist)?;
            KeyComparator::for_columns(&info.schema, &key_columns)?
        };
        let tree = BPlusTree::open(index_id, comparator, bpm)?;

        let info = IndexInfo { index_id, name: name.clone(), table_id, key_columns, tree, meta_page_id };
        self.index_ids_by_table
            .entry(table_id)
            .or_insert_with(HashMap::new)
            .insert(name, index_id);
        self.indexes.insert(index_id, info);
        Ok(())
    }

    fn write_catalog_meta(&self, bpm: &mut BufferPoolManager) -> Result<()> {
        let mut w = SmallWriter::new();
        w.write(&CATALOG_META_MAGIC);
        w.write(&(self.tables.len() as u32));
        w.write(&(self.indexes.len() as u32));
        for info in self.tables.values() {
            w.write(&info.table_id);
            w.write(&info.meta_page_id);
        }
        for info in self.indexes.values() {
            w.write(&info.index_id);
            w.write(&info.meta_page_id);
        }
        let bytes = w.to_padded_bytes(PAGE_SIZE);

        let page = bpm.fetch_page(CATALOG_META_PAGE_ID).ok_or(Error::OutOfMemory)?;
        page.data_mut().copy_from_slice(&bytes);
        page.mark_dirty();
        bpm.unpin_page(CATALOG_META_PAGE_ID, true);
        Ok(())
    }

    fn write_table_meta(&self, info: &TableInfo, bpm: &mut BufferPoolManager) -> Result<()> {
        let mut w = SmallWriter::new();
        w.write(&TABLE_META_MAGIC);
        w.write(&info.table_id);
        w.write(&info.name);
        w.write(&info.schema);
        w.write(&info.heap.first_page_id());
        let bytes = w.to_padded_bytes(PAGE_SIZE);

        let page = bpm.fetch_page(info.meta_page_id).ok_or(Error::OutOfMemory)?;
        page.data_mut().copy_from_slice(&bytes);
        page.mark_dirty();
        bpm.unpin_page(info.meta_page_id, true);
        Ok(())
    }

    fn write_index_meta(&self, info: &IndexInfo, bpm: &mut BufferPoolManager) -> Result<()> {
        let mut w = SmallWriter::new();
        w.write(&INDEX_META_MAGIC);
        w.write(&info.index_id);
        w.write(&info.name);
        w.write(&info.table_id);
        w.write(&(info.key_columns.len() as u32));
        for &col in &info.key_columns {
            w.write(&(col as u32));
        }
        let bytes = w.to_padded_bytes(PAGE_SIZE);

        let page = bpm.fetch_page(info.meta_page_id).ok_or(Error::OutOfMemory)?;
        page.data_mut().copy_from_slice(&bytes);
        page.mark_dirty();
        bpm.unpin_page(info.meta_page_id, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplacerKind;
    use crate::disk::DiskManager;
    use crate::storage::column::{Column, DataType};
    use crate::storage::row::Field;
    use crate::storage::Row;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("student_id", DataType::Int32, 0, 0).not_null().with_unique(),
            Column::new("name", DataType::FixedChar, 64, 1),
        ])
    }

    fn new_bpm(path: &std::path::Path, init: bool) -> BufferPoolManager {
        let disk_manager = DiskManager::open(path, init).unwrap();
        BufferPoolManager::new(32, ReplacerKind::Lru, disk_manager)
    }

    #[test]
    fn create_table_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let mut bpm = new_bpm(&path, true);
        let mut catalog = CatalogManager::open(true, &mut bpm).unwrap();

        catalog.create_table("students", schema(), &mut bpm).unwrap();
        assert!(matches!(
            catalog.create_table("students", schema(), &mut bpm),
            Err(Error::TableAlreadyExist)
        ));
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let mut bpm = new_bpm(&path, true);
        let mut catalog = CatalogManager::open(true, &mut bpm).unwrap();
        catalog.create_table("students", schema(), &mut bpm).unwrap();

        {
            let info = catalog.get_table_by_name_mut("students").unwrap();
            let row = Row::new(vec![Field::Int32(7), Field::Char("alice".into())]);
            info.heap.insert_tuple(&row, &mut bpm).unwrap();
        }

        catalog.create_index("students", "idx_student_id", vec![0], &mut bpm).unwrap();
        let index = catalog.get_index("students", "idx_student_id").unwrap();
        assert!(!index.tree.is_empty());
    }

    #[test]
    fn tables_and_indexes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let mut bpm = new_bpm(&path, true);
            let mut catalog = CatalogManager::open(true, &mut bpm).unwrap();
            catalog.create_table("students", schema(), &mut bpm).unwrap();
            catalog.create_table("courses", schema(), &mut bpm).unwrap();
            catalog.create_index("students", "idx_student_id", vec![0], &mut bpm).unwrap();
            catalog.create_index("students", "idx_student_name", vec![1], &mut bpm).unwrap();
            bpm.flush_all_pages();
        }

        let mut bpm = new_bpm(&path, false);
        let mut catalog = CatalogManager::open(false, &mut bpm).unwrap();

        let mut table_ids = Vec::new();
        catalog.get_tables(&mut table_ids);
        assert_eq!(table_ids.len(), 2);

        assert!(catalog.get_index("students", "idx_student_id").is_ok());
        catalog.drop_index("students", "idx_student_name", &mut bpm).unwrap();
        assert!(matches!(
            catalog.get_index("students", "idx_student_name"),
            Err(Error::IndexNotFound)
        ));

        catalog.drop_table("courses", &mut bpm).unwrap();
        assert!(matches!(catalog.get_table_by_name("courses"), Err(Error::TableNotExist)));
    }
}
