//! Pool handles and the process-wide entry points.
//!
//! A [`Pool`] owns one central cache and one page cache and hands out
//! [`ThreadCache`]s bound to them. [`MemoryPool`] is the stateless facade over
//! the process-wide pool: each thread lazily builds its own thread cache on
//! first use and returns its blocks to the central cache when it exits.

use crate::{
  central_cache::CentralCache,
  config::PoolConfig,
  error::{AllocError, Result},
  os::{system_alloc, system_free},
  page_cache::{PageCache, PageStats},
  size_class::{ALIGNMENT, MAX_BYTES, class_index},
  thread_cache::ThreadCache,
};
use core::{
  cell::{Cell, UnsafeCell},
  ptr::{NonNull, null_mut},
};
use std::sync::{Arc, OnceLock};

// =============================================================================
// Pool
// =============================================================================

/// Shared state of one allocator instance.
pub struct Pool {
  central: Arc<CentralCache>,
}

static GLOBAL: OnceLock<Pool> = OnceLock::new();

impl Pool {
  pub fn new() -> Self {
    Self::with_config(PoolConfig::default())
  }

  pub fn with_config(config: PoolConfig) -> Self {
    log::debug!("creating pool with {config:?}");
    let pages = Arc::new(PageCache::new());
    Self {
      central: Arc::new(CentralCache::new(pages, config)),
    }
  }

  /// The process-wide pool, configured from the environment on first use.
  pub fn global() -> &'static Self {
    GLOBAL.get_or_init(|| Self::with_config(PoolConfig::from_env()))
  }

  /// A new thread cache over this pool. Each thread should own its own.
  pub fn thread_cache(&self) -> ThreadCache {
    ThreadCache::new(Arc::clone(&self.central))
  }

  pub fn central_cache(&self) -> &Arc<CentralCache> {
    &self.central
  }

  pub fn page_cache(&self) -> &Arc<PageCache> {
    self.central.page_cache()
  }

  pub fn config(&self) -> &PoolConfig {
    self.central.config()
  }

  pub fn stats(&self) -> PageStats {
    self.page_cache().stats()
  }

  /// Allocation without a thread cache: one block straight from the central cache.
  fn allocate_uncached(&self, size: usize) -> Result<NonNull<u8>> {
    let size = size.max(ALIGNMENT);
    if size > MAX_BYTES {
      return NonNull::new(system_alloc(size)).ok_or(AllocError::SystemExhausted { size });
    }
    let mut run = self.central.acquire_range(class_index(size), 1)?;
    run.pop().ok_or(AllocError::EmptyRequest)
  }

  unsafe fn deallocate_uncached(&self, ptr: NonNull<u8>, size: usize) {
    let size = size.max(ALIGNMENT);
    if size > MAX_BYTES {
      unsafe { system_free(ptr.as_ptr()) };
    } else {
      unsafe { self.central.release_block(ptr, class_index(size)) };
    }
  }
}

impl Default for Pool {
  fn default() -> Self {
    Self::new()
  }
}

// =============================================================================
// TLS
// =============================================================================

thread_local! {
  static CACHE: UnsafeCell<Option<ThreadCache>> = const { UnsafeCell::new(None) };
  static IN_CACHE: Cell<bool> = const { Cell::new(false) };
}

/// Clears the re-entrancy flag, also on unwind.
struct Reentry;

impl Drop for Reentry {
  fn drop(&mut self) {
    let _ = IN_CACHE.try_with(|flag| flag.set(false));
  }
}

/// Runs `f` on this thread's cache of the global pool.
///
/// Returns `None` when the thread-local storage is already torn down or when
/// called from inside another `f` on the same thread (e.g. a logger that
/// allocates); callers then fall back to the central cache.
fn with_thread_cache<R, F: FnOnce(&mut ThreadCache) -> R>(f: F) -> Option<R> {
  let entered = IN_CACHE.try_with(|flag| !flag.replace(true)).ok()?;
  if !entered {
    return None;
  }
  let _reentry = Reentry;

  CACHE
    .try_with(|cell| {
      let slot = unsafe { &mut *cell.get() };
      let cache = slot.get_or_insert_with(|| Pool::global().thread_cache());
      f(cache)
    })
    .ok()
}

// =============================================================================
// Facade
// =============================================================================

/// Stateless entry point over the process-wide pool.
pub struct MemoryPool;

impl MemoryPool {
  /// See [`allocate`].
  #[inline]
  pub fn allocate(size: usize) -> *mut u8 {
    Self::try_allocate(size).map_or(null_mut(), NonNull::as_ptr)
  }

  pub fn try_allocate(size: usize) -> Result<NonNull<u8>> {
    with_thread_cache(|cache| cache.try_allocate(size))
      .unwrap_or_else(|| Pool::global().allocate_uncached(size))
  }

  /// See [`deallocate`].
  ///
  /// # Safety
  /// Same contract as [`deallocate`].
  #[inline]
  pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    let Some(block) = NonNull::new(ptr) else {
      return;
    };
    let done = with_thread_cache(|cache| unsafe { cache.deallocate(ptr, size) });
    if done.is_none() {
      unsafe { Pool::global().deallocate_uncached(block, size) };
    }
  }
}

/// Returns at least `size` usable bytes aligned to 8, or null when the OS is
/// out of memory. `size == 0` is served like `size == 8`.
#[inline]
pub fn allocate(size: usize) -> *mut u8 {
  MemoryPool::allocate(size)
}

/// Returns a block obtained from [`allocate`]. Null is ignored.
///
/// # Safety
/// `ptr` must come from [`allocate`] (on any thread) called with the same
/// `size`, and must not be used afterwards. A mismatched size is not detected.
#[inline]
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
  unsafe { MemoryPool::deallocate(ptr, size) }
}
