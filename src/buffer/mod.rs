pub mod page;
pub mod pool;
pub mod replacer;

pub use page::Page;
pub use pool::BufferPoolManager;
pub use replacer::{ClockReplacer, LruReplacer, Replacer};

/// Index of a frame within the buffer pool's fixed-size frame array.
pub type FrameId = usize;
