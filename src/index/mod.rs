pub mod b_plus_tree;
pub mod internal_page;
pub mod key;
pub mod leaf_page;
pub mod roots;

pub use b_plus_tree::{BPlusTree, BPlusTreeIterator, Position};
pub use key::KeyComparator;
