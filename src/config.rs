//! Compile-time constants and small derivation helpers shared by every
//! subsystem. Mirrors the teacher crate's `btree::consts` module, but
//! collected in one place since this crate has no SQL layer to keep
//! separate from storage internals.

/// Size, in bytes, of every page on disk and in the buffer pool. All page
/// layouts below are computed against this constant; changing it requires
/// rebuilding, since fan-out and header math are compile-time derived.
pub const PAGE_SIZE: usize = 4096;

/// Logical page identifier. Negative values (besides [`INVALID_PAGE_ID`])
/// are never produced by the disk manager.
pub type PageId = i32;

pub const INVALID_PAGE_ID: PageId = -1;

/// Raw file offset (not a logical page id) of the disk space manager's
/// file meta; addressed directly by [`crate::disk::DiskManager`] and never
/// fetched through the buffer pool.
pub const FILE_META_PAGE_ID: PageId = 0;

/// Logical page id of the catalog meta (table/index registry).
pub const CATALOG_META_PAGE_ID: PageId = 1;

/// Logical page id of the index-roots directory (`index_id -> root_page_id`).
pub const INDEX_ROOTS_PAGE_ID: PageId = 2;

/// Number of logical page ids `DiskManager::open` carves out of the
/// allocatable id space on a fresh database, before any caller can
/// `allocate_page()`: ids `0, 1, 2` line up with [`FILE_META_PAGE_ID`]'s
/// numeric value, [`CATALOG_META_PAGE_ID`], and [`INDEX_ROOTS_PAGE_ID`] so
/// the latter two are guaranteed to back a real extent the first time
/// anyone fetches them, and ordinary `new_page()` calls never collide with
/// them. Logical id 0 itself is left unused (nothing fetches it through
/// the buffer pool) but is reserved too, to keep the reserved range a
/// contiguous `0..RESERVED_PAGE_COUNT`.
pub const RESERVED_PAGE_COUNT: u32 = 3;

/// Sentinel LSN used as `prev_lsn` for the first record of a transaction.
pub const INVALID_LSN: u64 = u64::MAX;

/// Sentinel offset used by [`crate::disk::bitmap::BitmapPage`] when every
/// page in its extent is allocated.
pub const INVALID_BITMAP_HINT: u32 = u32::MAX;

pub const DISK_META_MAGIC: u32 = 0x4D49_4E49; // "MINI"
pub const CATALOG_META_MAGIC: u32 = 0x4D43_4154; // "MCAT"
pub const COLUMN_MAGIC: u32 = 0x4D43_4F4C; // "MCOL"
pub const SCHEMA_MAGIC: u32 = 0x4D53_4348; // "MSCH"
pub const TABLE_META_MAGIC: u32 = 0x4D54_424C; // "MTBL"
pub const INDEX_META_MAGIC: u32 = 0x4D49_4458; // "MIDX"

/// Header size of a [`crate::disk::bitmap::BitmapPage`]:
/// `next_free_hint: u32` + `page_count: u32`.
pub const BITMAP_HEADER_SIZE: usize = 8;

/// Number of data pages tracked by a single bitmap page/extent.
pub const BITMAP_SIZE: usize = 8 * (PAGE_SIZE - BITMAP_HEADER_SIZE);

/// Header size of a slotted table page:
/// `prev_page_id: i32` + `next_page_id: i32` + `free_space_pointer: u32` +
/// `tuple_count: u32`.
pub const TABLE_PAGE_HEADER_SIZE: usize = 16;

/// Per-slot directory entry size: `offset: u32` + `size: u32` (the
/// tombstone bit is packed into the top bit of `size`).
pub const SLOT_SIZE: usize = 8;

/// High bit of a slot's `size` field marks the slot as deleted
/// (tombstoned) without reclaiming its row id.
pub const TOMBSTONE_BIT: u32 = 1 << 31;

/// Header shared by every B+-tree node (leaf or internal):
/// `is_leaf: u8` + `page_id: i32` + `parent_id: i32` + `key_size: u32` +
/// `size: u32` + `max_size: u32` + `next_page_id: i32` (meaningful only
/// for leaves; present unconditionally to keep the header fixed-size).
pub const BTREE_NODE_HEADER_SIZE: usize = 1 + 4 + 4 + 4 + 4 + 4 + 4;

/// Size, in bytes, of a serialized row id (`page_id: i32` + `slot_num: u32`).
pub const ROW_ID_SIZE: usize = 8;

/// Maximum number of keys an internal node may hold, given a key size.
pub fn internal_max_size(key_size: usize) -> usize {
    (PAGE_SIZE - BTREE_NODE_HEADER_SIZE) / (key_size + std::mem::size_of::<PageId>())
}

/// Maximum number of entries a leaf node may hold, given a key size.
pub fn leaf_max_size(key_size: usize) -> usize {
    (PAGE_SIZE - BTREE_NODE_HEADER_SIZE) / (key_size + ROW_ID_SIZE)
}

/// Minimum occupancy for a non-root node: `ceil(max_size / 2)`.
pub fn min_size(max_size: usize) -> usize {
    (max_size + 1) / 2
}

/// Runtime-tunable knobs passed to [`crate::engine::Engine::open`]. Kept
/// separate from the compile-time constants above since these may
/// reasonably vary between a test fixture and a long-running process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool.
    pub buffer_pool_size: usize,
    /// Which replacement policy the buffer pool uses.
    pub replacer_policy: ReplacerKind,
    /// How often the lock manager's deadlock detector sweeps the
    /// waits-for graph.
    pub deadlock_detector_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 128,
            replacer_policy: ReplacerKind::Lru,
            deadlock_detector_interval: std::time::Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacerKind {
    Lru,
    Clock,
}
