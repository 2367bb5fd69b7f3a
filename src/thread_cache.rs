//! Per-thread cache: the lock-free fast path.
//!
//! One free list per size class, owned by a single thread. Allocation pops a
//! local block and falls back to a batch from the central cache; free pushes
//! locally and hands 75% of a class back once it holds more than the retain
//! limit. Requests above `MAX_BYTES` never touch the cache hierarchy.

use crate::{
  central_cache::CentralCache,
  error::{AllocError, Result},
  free_list::FreeList,
  os::{system_alloc, system_free},
  size_class::{ALIGNMENT, MAX_BYTES, NUM_CLASSES, batch_count, class_index, class_size},
};
use core::ptr::{NonNull, null_mut};
use std::sync::Arc;

pub struct ThreadCache {
  lists: Box<[FreeList]>,
  central: Arc<CentralCache>,
}

impl ThreadCache {
  pub fn new(central: Arc<CentralCache>) -> Self {
    let lists = (0..NUM_CLASSES).map(|_| FreeList::new()).collect();
    Self { lists, central }
  }

  pub fn central(&self) -> &Arc<CentralCache> {
    &self.central
  }

  /// Returns at least `size` usable bytes, 8-byte aligned, or null when the
  /// OS is out of memory.
  #[inline]
  pub fn allocate(&mut self, size: usize) -> *mut u8 {
    self.try_allocate(size).map_or(null_mut(), NonNull::as_ptr)
  }

  pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
    let size = size.max(ALIGNMENT);
    if size > MAX_BYTES {
      return NonNull::new(system_alloc(size)).ok_or(AllocError::SystemExhausted { size });
    }

    let class = class_index(size);
    if let Some(block) = self.lists[class].pop() {
      return Ok(block);
    }
    self.refill(class)
  }

  /// Pulls a batch from the central cache, keeps all but one block locally.
  #[inline(never)]
  fn refill(&mut self, class: usize) -> Result<NonNull<u8>> {
    let batch = batch_count(class_size(class), self.central.config().max_batch_bytes);
    let mut run = self.central.acquire_range(class, batch)?;
    let block = run.pop().ok_or(AllocError::EmptyRequest)?;
    self.lists[class].prepend(run);
    Ok(block)
  }

  /// Returns a block obtained from [`allocate`](Self::allocate). Null is ignored.
  ///
  /// # Safety
  /// `ptr` must come from a thread cache of the same pool with the same
  /// `size`, and must not be used afterwards.
  pub unsafe fn deallocate(&mut self, ptr: *mut u8, size: usize) {
    let Some(block) = NonNull::new(ptr) else {
      return;
    };
    let size = size.max(ALIGNMENT);
    if size > MAX_BYTES {
      unsafe { system_free(ptr) };
      return;
    }

    let class = class_index(size);
    let list = &mut self.lists[class];
    unsafe { list.push(block) };
    if list.len() > self.central.config().retain_limit {
      self.flush(class);
    }
  }

  /// Hands 75% of `class` (rounded down) back to the central cache.
  #[inline(never)]
  fn flush(&mut self, class: usize) {
    let list = &mut self.lists[class];
    let give = list.len() * 3 / 4;
    let keep = list.len() - give;
    let run = list.split_off(keep);
    unsafe { self.central.release_range(run, class) };
  }

  /// Free blocks held locally for `class` (0 for an invalid class).
  pub fn cached_blocks(&self, class: usize) -> usize {
    self.lists.get(class).map_or(0, FreeList::len)
  }

  /// Free blocks held locally across all classes.
  pub fn total_cached(&self) -> usize {
    self.lists.iter().map(FreeList::len).sum()
  }
}

impl Drop for ThreadCache {
  fn drop(&mut self) {
    let mut returned = 0;
    for (class, list) in self.lists.iter_mut().enumerate() {
      if list.is_empty() {
        continue;
      }
      returned += list.len();
      unsafe { self.central.release_range(core::mem::take(list), class) };
    }
    if returned > 0 {
      log::debug!("thread cache dropped, returned {returned} blocks");
    }
  }
}
