//! A concurrent ordered index built on a skip list with per-node locking.
//!
//! Structural changes claim per-node guards and retry on conflict, reads of a
//! node's tower go through a small reader/writer gate, and unlinked nodes are
//! freed only once no thread holds a reference to them.

use once_cell::sync::Lazy;

mod comparator;
mod error;
mod gate;
mod iter;
mod level;
mod node;
mod node_allocator;
mod options;
mod reclaim;
mod skiplist;

pub use comparator::{Ascend, Comparator, Descend};
pub use error::Error;
pub use iter::{Cursor, Entry, Iter};
pub use options::{MAX_LAYER, Options};
pub use skiplist::SkipList;

/// Alignment for cache lines (typically 64 bytes on modern CPUs)
pub(crate) static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Try data cache first (most relevant for our use case)
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        // Fall back to unified cache if data cache info isn't available
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        // Try L2 cache if L1 isn't available
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Unified))
        // Alignment has to be a power of two
        .filter(|size| size.is_power_of_two())
        // Default to 64 bytes if all detection fails
        .unwrap_or(64)
});
