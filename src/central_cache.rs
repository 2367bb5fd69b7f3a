//! Central cache: one shared free list per size class.
//!
//! Each class has its own spin lock, so traffic on different classes never
//! contends. An empty class is refilled by carving a span from the page cache
//! while the class lock is held, so no other thread sees a half-carved span.

use crate::{
  config::PoolConfig,
  error::{AllocError, Result},
  free_list::FreeList,
  page_cache::PageCache,
  size_class::{NUM_CLASSES, PAGE_SIZE, class_size, pages_for},
  sync::SpinMutex,
};
use core::ptr::NonNull;
use std::sync::Arc;

pub struct CentralCache {
  classes: Box<[SpinMutex<FreeList>]>,
  pages: Arc<PageCache>,
  config: PoolConfig,
}

impl CentralCache {
  pub fn new(pages: Arc<PageCache>, config: PoolConfig) -> Self {
    let classes = (0..NUM_CLASSES)
      .map(|_| SpinMutex::new(FreeList::new()))
      .collect();
    Self {
      classes,
      pages,
      config,
    }
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  pub fn page_cache(&self) -> &Arc<PageCache> {
    &self.pages
  }

  /// Pages to request for a span that must hold `want` blocks.
  fn span_pages(&self, block_size: usize, want: usize) -> usize {
    let needed = pages_for(block_size.saturating_mul(want));
    needed.max(self.config.span_pages)
  }

  /// Whether every span of this class holds a single block at its base.
  /// Such blocks go back to the page cache instead of the shared list.
  fn is_page_sized(&self, block_size: usize) -> bool {
    block_size > self.config.span_bytes()
  }

  /// Takes up to `want` blocks of `class`. The returned list may be shorter
  /// than `want`, but is never empty.
  pub fn acquire_range(&self, class: usize, want: usize) -> Result<FreeList> {
    let slot = self.classes.get(class).ok_or(AllocError::InvalidClass(class))?;
    if want == 0 {
      return Err(AllocError::EmptyRequest);
    }

    let mut list = slot.lock();
    if !list.is_empty() {
      let run = list.take_front(want);
      log::trace!("class {class}: handed out {} of {want} cached blocks", run.len());
      return Ok(run);
    }

    let block_size = class_size(class);
    // One block per span, so each can be released as a span on its own.
    let want = if self.is_page_sized(block_size) { 1 } else { want };
    let pages = self.span_pages(block_size, want);
    let base = self.pages.acquire_span(pages)?;
    let total = pages * PAGE_SIZE / block_size;

    // Fresh span: nobody else can see these blocks yet.
    let mut carved = unsafe { FreeList::carve(base, block_size, total) };
    let run = carved.take_front(want);
    log::debug!(
      "class {class}: carved {pages} pages into {total} blocks of {block_size} bytes, kept {}",
      carved.len()
    );
    *list = carved;
    Ok(run)
  }

  /// Gives `run` back to `class`.
  ///
  /// # Safety
  /// Every block of `run` must have been handed out for `class` by this cache
  /// and must no longer be used by the caller.
  pub unsafe fn release_range(&self, run: FreeList, class: usize) {
    let Some(slot) = self.classes.get(class) else {
      log::warn!("release of {} blocks to invalid class {class}", run.len());
      return;
    };
    if run.is_empty() {
      return;
    }

    let block_size = class_size(class);
    if self.is_page_sized(block_size) {
      let pages = pages_for(block_size);
      log::trace!("class {class}: returning {} spans of {pages} pages", run.len());
      for block in run {
        self.pages.release_span(block, pages);
      }
      return;
    }

    log::trace!("class {class}: took back {} blocks", run.len());
    slot.lock().prepend(run);
  }

  /// Returns a single block to `class`.
  ///
  /// # Safety
  /// Same contract as [`release_range`](Self::release_range).
  pub unsafe fn release_block(&self, block: NonNull<u8>, class: usize) {
    let mut run = FreeList::new();
    unsafe {
      run.push(block);
      self.release_range(run, class);
    }
  }

  /// Blocks currently cached for `class` (0 for an invalid class).
  pub fn free_blocks(&self, class: usize) -> usize {
    self.classes.get(class).map_or(0, |slot| slot.lock().len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::size_class::{MAX_BYTES, class_index};
  use std::{collections::HashSet, thread};

  fn central() -> CentralCache {
    CentralCache::new(Arc::new(PageCache::new()), PoolConfig::default())
  }

  fn addrs(run: FreeList) -> Vec<usize> {
    run.map(|p| p.as_ptr() as usize).collect()
  }

  #[test]
  fn rejects_bad_requests() {
    let cache = central();
    assert_eq!(
      cache.acquire_range(NUM_CLASSES, 1).unwrap_err(),
      AllocError::InvalidClass(NUM_CLASSES)
    );
    assert_eq!(cache.acquire_range(0, 0).unwrap_err(), AllocError::EmptyRequest);
    assert_eq!(cache.free_blocks(NUM_CLASSES), 0);
    assert_eq!(cache.page_cache().stats().mapped_pages, 0);
  }

  #[test]
  fn carves_default_span_in_address_order() {
    let cache = central();
    let class = class_index(64);
    let run = cache.acquire_range(class, 10).unwrap();
    assert_eq!(run.len(), 10);

    let addrs = addrs(run);
    for pair in addrs.windows(2) {
      assert_eq!(pair[1] - pair[0], 64);
    }
    assert_eq!(cache.free_blocks(class), 8 * PAGE_SIZE / 64 - 10);
    assert_eq!(cache.page_cache().stats().mapped_pages, 8);
  }

  #[test]
  fn serves_from_shared_list_before_carving() {
    let cache = central();
    let class = class_index(128);
    let first = cache.acquire_range(class, 4).unwrap();
    let cached = cache.free_blocks(class);
    let second = cache.acquire_range(class, 4).unwrap();
    assert_eq!(second.len(), 4);
    assert_eq!(cache.free_blocks(class), cached - 4);
    assert_eq!(cache.page_cache().stats().mapped_pages, 8);

    unsafe {
      cache.release_range(first, class);
      cache.release_range(second, class);
    }
    assert_eq!(cache.free_blocks(class), cached + 4);
  }

  #[test]
  fn short_list_returns_what_it_has() {
    let cache = central();
    let class = class_index(4096);
    let run = cache.acquire_range(class, 1).unwrap();
    assert_eq!(cache.free_blocks(class), 7);
    let rest = cache.acquire_range(class, 64).unwrap();
    assert_eq!(rest.len(), 7);
    assert_eq!(cache.free_blocks(class), 0);
    unsafe {
      cache.release_range(run, class);
      cache.release_range(rest, class);
    }
    assert_eq!(cache.free_blocks(class), 8);
  }

  #[test]
  fn big_classes_get_bigger_spans() {
    let cache = central();
    let class = class_index(MAX_BYTES);
    let run = cache.acquire_range(class, 1).unwrap();
    assert_eq!(run.len(), 1);
    assert_eq!(cache.free_blocks(class), 0);
    let stats = cache.page_cache().stats();
    assert_eq!(stats.in_use_pages, MAX_BYTES / PAGE_SIZE);

    unsafe { cache.release_range(run, class) };
    let stats = cache.page_cache().stats();
    assert_eq!(stats.in_use_pages, 0);
    assert_eq!(stats.free_pages, MAX_BYTES / PAGE_SIZE);
    assert_eq!(cache.free_blocks(class), 0);
  }

  #[test]
  fn page_sized_blocks_are_reused_through_the_page_cache() {
    let cache = central();
    let big = class_index(40 * 1024);
    let run = cache.acquire_range(big, 1).unwrap();
    let base = run.head() as usize;
    unsafe { cache.release_range(run, big) };

    // A default span for a small class fits inside the released 10 pages.
    let small = cache.acquire_range(class_index(16), 1).unwrap();
    assert_eq!(small.head() as usize, base);
    assert_eq!(cache.page_cache().stats().mapped_pages, 10);
  }

  #[test]
  fn page_sized_classes_hand_out_one_block_per_span() {
    let cache = central();
    let class = class_index(64 * 1024);
    let run = cache.acquire_range(class, 3).unwrap();
    assert_eq!(run.len(), 1);
    assert_eq!(cache.page_cache().stats().in_use_pages, 16);
    unsafe { cache.release_range(run, class) };
    assert_eq!(cache.page_cache().stats().in_use_pages, 0);
  }

  #[test]
  fn release_to_invalid_class_is_ignored() {
    let cache = central();
    let run = cache.acquire_range(0, 2).unwrap();
    unsafe { cache.release_range(run, NUM_CLASSES + 5) };
    assert_eq!(cache.free_blocks(0), 8 * PAGE_SIZE / 8 - 2);
  }

  #[test]
  fn concurrent_acquirers_never_share_blocks() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let cache = Arc::new(central());
    let class = class_index(48);

    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
          let mut seen = Vec::new();
          for _ in 0..ROUNDS {
            let run = cache.acquire_range(class, 7).unwrap();
            seen.extend(addrs(run));
          }
          seen
        })
      })
      .collect();

    let mut all = HashSet::new();
    for h in handles {
      for a in h.join().unwrap() {
        assert!(all.insert(a), "block {a:#x} handed out twice");
      }
    }
    assert_eq!(all.len(), THREADS * ROUNDS * 7);
  }
}
