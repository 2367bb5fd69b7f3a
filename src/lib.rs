#![allow(clippy::missing_safety_doc)]

//! Three-tier caching memory pool.
//!
//! - [`ThreadCache`]: per-thread free lists, one per size class, no locking.
//! - [`CentralCache`]: shared free lists, one spin lock per size class.
//! - [`PageCache`]: page spans over anonymous OS mappings, one lock.
//!
//! Requests up to [`MAX_BYTES`] are rounded to 8-byte size classes and served
//! through the hierarchy; larger ones go straight to the system allocator.
//! Blocks carry no header: callers pass the allocation size back on free.
//!
//! Released spans always merge with a free span that starts right after them.
//! The `coalesce-backward` feature (on by default) also merges with a free
//! span that ends right before them, so adjacent spans end up as one span
//! whichever is released first. Build with `default-features = false` for
//! forward-only merging.
//!
//! ```
//! let p = trimalloc::allocate(100);
//! assert!(!p.is_null());
//! unsafe { trimalloc::deallocate(p, 100) };
//! ```

pub mod central_cache;
pub mod config;
pub mod error;
pub mod free_list;
pub mod page_cache;
pub mod pool;
pub mod size_class;
pub mod thread_cache;

mod os;
mod sync;

pub use central_cache::CentralCache;
pub use config::PoolConfig;
pub use error::AllocError;
pub use free_list::FreeList;
pub use page_cache::{PageCache, PageStats};
pub use pool::{MemoryPool, Pool, allocate, deallocate};
pub use size_class::{ALIGNMENT, MAX_BYTES, NUM_CLASSES, PAGE_SIZE};
pub use thread_cache::ThreadCache;
