//! Inserts a large composite-key population into the B+-tree, deletes
//! half of it back out in shuffled order, and confirms the survivors are
//! still retrievable while the removed half is gone and the tree empties
//! out cleanly once the rest follows.

use rand::seq::SliceRandom;

use minisql_engine::buffer::BufferPoolManager;
use minisql_engine::config::ReplacerKind;
use minisql_engine::disk::DiskManager;
use minisql_engine::index::{BPlusTree, KeyComparator};
use minisql_engine::storage::{Column, DataType, RowId, Schema};

fn comparator() -> KeyComparator {
    let schema = Schema::new(vec![Column::new("id", DataType::Int32, 0, 0).not_null().with_unique()]);
    KeyComparator::for_columns(&schema, &[0]).unwrap()
}

fn key(n: i32) -> Vec<u8> {
    n.to_le_bytes().to_vec()
}

#[test]
fn sixteen_thousand_keys_insert_half_delete_half_remain() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskManager::open(dir.path().join("bptree.db"), true).unwrap();
    let mut bpm = BufferPoolManager::new(64, ReplacerKind::Lru, disk);
    let mut tree = BPlusTree::create(1, comparator(), &mut bpm).unwrap();

    const N: i32 = 16_000;
    for i in 0..N {
        assert!(tree.insert(&key(i), RowId::new(i, 0), &mut bpm).unwrap());
    }
    for i in 0..N {
        assert_eq!(tree.get_value(&key(i), &mut bpm).unwrap(), Some(RowId::new(i, 0)));
    }

    let mut first_half: Vec<i32> = (0..N / 2).collect();
    first_half.shuffle(&mut rand::thread_rng());
    for &i in &first_half {
        assert!(tree.remove(&key(i), &mut bpm).unwrap());
    }

    for i in 0..N / 2 {
        assert_eq!(tree.get_value(&key(i), &mut bpm).unwrap(), None);
    }
    for i in N / 2..N {
        assert_eq!(tree.get_value(&key(i), &mut bpm).unwrap(), Some(RowId::new(i, 0)));
    }
    assert!(!tree.is_empty());

    let mut second_half: Vec<i32> = (N / 2..N).collect();
    second_half.shuffle(&mut rand::thread_rng());
    for &i in &second_half {
        assert!(tree.remove(&key(i), &mut bpm).unwrap());
    }

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(N / 2), &mut bpm).unwrap(), None);
}
