//! Single-threaded behaviour of the pool through its public surface.

use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::BTreeMap;
use trimalloc::{
  ALIGNMENT, MAX_BYTES, MemoryPool, PAGE_SIZE, PageCache, Pool,
  size_class::{class_index, class_size, round_up},
};

fn fill(p: *mut u8, size: usize, seed: u8) {
  for i in 0..size {
    unsafe { p.add(i).write(seed.wrapping_add(i as u8)) };
  }
}

fn check(p: *mut u8, size: usize, seed: u8) {
  for i in 0..size {
    let got = unsafe { p.add(i).read() };
    assert_eq!(got, seed.wrapping_add(i as u8), "byte {i} of {size}-byte block {p:p}");
  }
}

#[test]
fn basic_allocation() {
  for size in [8, 1024, 1024 * 1024] {
    let p = trimalloc::allocate(size);
    assert!(!p.is_null(), "size {size}");
    assert_eq!(p as usize % ALIGNMENT, 0);
    unsafe { trimalloc::deallocate(p, size) };
  }
}

#[test]
fn memory_write() {
  const SIZE: usize = 128;
  let p = MemoryPool::allocate(SIZE);
  assert!(!p.is_null());
  fill(p, SIZE, 0);
  check(p, SIZE, 0);
  unsafe { MemoryPool::deallocate(p, SIZE) };
}

#[test]
fn zero_is_served_like_alignment() {
  let pool = Pool::new();
  let mut cache = pool.thread_cache();
  let p = cache.allocate(0);
  assert!(!p.is_null());
  assert_eq!(class_index(0), class_index(ALIGNMENT));
  // First refill of the 8-byte class: batch of 64, one handed out.
  assert_eq!(cache.cached_blocks(class_index(ALIGNMENT)), 63);
  unsafe { cache.deallocate(p, 0) };
  assert_eq!(cache.allocate(ALIGNMENT), p);
}

#[test]
fn rounding_never_shrinks_a_request() {
  let mut rng = StdRng::seed_from_u64(0x5eed);
  for _ in 0..10_000 {
    let size = rng.random_range(1..=MAX_BYTES);
    let class = class_index(size);
    assert_eq!(class_index(round_up(size)), class);
    assert_eq!(class_size(class), (class + 1) * ALIGNMENT);
    assert!(class_size(class) >= size);
  }
}

#[test]
fn live_blocks_never_overlap() {
  let pool = Pool::new();
  let mut cache = pool.thread_cache();
  let mut rng = StdRng::seed_from_u64(42);
  // start -> (end, size, seed)
  let mut live: BTreeMap<usize, (usize, usize, u8)> = BTreeMap::new();

  for round in 0..4_000u32 {
    if !live.is_empty() && rng.random_bool(0.45) {
      let nth = rng.random_range(0..live.len());
      let start = *live.keys().nth(nth).unwrap();
      let (_, size, seed) = live.remove(&start).unwrap();
      check(start as *mut u8, size, seed);
      unsafe { cache.deallocate(start as *mut u8, size) };
      continue;
    }

    let size = if rng.random_bool(0.9) {
      rng.random_range(1..=2048)
    } else {
      rng.random_range(2049..=MAX_BYTES)
    };
    let p = cache.allocate(size);
    assert!(!p.is_null());
    let start = p as usize;
    let end = start + size;

    if let Some((&prev, &(prev_end, _, _))) = live.range(..start).next_back() {
      assert!(prev_end <= start, "{start:#x} overlaps block at {prev:#x}");
    }
    if let Some((&next, _)) = live.range(start..).next() {
      assert!(end <= next, "{start:#x}..{end:#x} overlaps block at {next:#x}");
    }

    let seed = round as u8;
    fill(p, size, seed);
    live.insert(start, (end, size, seed));
  }

  for (start, (_, size, seed)) in live {
    check(start as *mut u8, size, seed);
    unsafe { cache.deallocate(start as *mut u8, size) };
  }
}

#[test]
fn large_path_leaves_caches_untouched() {
  let pool = Pool::new();
  let mut cache = pool.thread_cache();
  let small = cache.allocate(64);
  let cached = cache.total_cached();
  let shared = pool.central_cache().free_blocks(class_index(64));
  let stats = pool.stats();

  for size in [MAX_BYTES + 1, 10 * 1024 * 1024] {
    let p = cache.allocate(size);
    assert!(!p.is_null());
    fill(p, size, 7);
    check(p, size, 7);
    unsafe { cache.deallocate(p, size) };
  }

  assert_eq!(cache.total_cached(), cached);
  assert_eq!(pool.central_cache().free_blocks(class_index(64)), shared);
  assert_eq!(pool.stats(), stats);
  unsafe { cache.deallocate(small, 64) };
}

#[test]
fn adjacent_spans_coalesce_when_released() {
  let pages = PageCache::new();
  let whole = pages.acquire_span(12).unwrap();
  pages.release_span(whole, 12);

  let left = pages.acquire_span(4).unwrap();
  let right = pages.acquire_span(8).unwrap();
  assert_eq!(right.as_ptr() as usize, left.as_ptr() as usize + 4 * PAGE_SIZE);

  pages.release_span(right, 8);
  pages.release_span(left, 4);
  assert_eq!(pages.free_spans(), vec![(12, 1)]);
  assert_eq!(pages.acquire_span(12).unwrap(), whole);
  assert_eq!(pages.stats().mapped_pages, 12);
}

#[cfg(feature = "coalesce-backward")]
#[test]
fn adjacent_spans_coalesce_in_either_order() {
  let pages = PageCache::new();
  let whole = pages.acquire_span(12).unwrap();
  pages.release_span(whole, 12);

  let left = pages.acquire_span(4).unwrap();
  let right = pages.acquire_span(8).unwrap();
  pages.release_span(left, 4);
  pages.release_span(right, 8);
  assert_eq!(pages.free_spans(), vec![(12, 1)]);
  assert_eq!(pages.acquire_span(12).unwrap(), whole);
}

#[test]
fn env_config_reaches_the_global_pool() {
  let config = Pool::global().config();
  assert!(config.span_pages >= 1);
  assert!(config.retain_limit >= 1);
}
