//! Page cache: the only tier that talks to the operating system.
//!
//! Memory is handed out in spans of whole pages. Free spans are indexed by
//! page count (smallest fit first, splitting larger ones) and by base address
//! (adjacency probes on release). In-use spans are indexed by base address so
//! a release can recover and validate its page count. Pages are never unmapped
//! before the cache itself is dropped.

use crate::{
  error::{AllocError, Result},
  os::{os_mmap, os_munmap},
  size_class::PAGE_SIZE,
};
use core::ptr::NonNull;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A run of contiguous pages tracked as one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
  base: usize,
  pages: usize,
}

impl Span {
  #[inline]
  const fn end(&self) -> usize {
    self.base + self.pages * PAGE_SIZE
  }
}

/// One anonymous mapping obtained from the OS.
struct Region {
  base: usize,
  pages: usize,
}

/// Page accounting snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageStats {
  /// Pages ever mapped from the OS.
  pub mapped_pages: usize,
  /// Pages sitting in free spans.
  pub free_pages: usize,
  /// Pages in spans handed out and not yet released.
  pub in_use_pages: usize,
  pub free_spans: usize,
  pub in_use_spans: usize,
}

#[derive(Default)]
struct PageState {
  /// Page count -> chain of free span bases. The chain head is the last element.
  free: BTreeMap<usize, Vec<usize>>,
  /// Free span base -> page count.
  free_at: BTreeMap<usize, usize>,
  /// In-use span base -> page count.
  work: BTreeMap<usize, usize>,
  regions: Vec<Region>,
  mapped_pages: usize,
}

impl PageState {
  /// Unlinks the smallest free span with at least `pages` pages.
  fn take_fit(&mut self, pages: usize) -> Option<Span> {
    let (&count, chain) = self.free.range_mut(pages..).next()?;
    let base = chain.pop()?;
    if chain.is_empty() {
      self.free.remove(&count);
    }
    self.free_at.remove(&base);
    Some(Span { base, pages: count })
  }

  fn insert_free(&mut self, span: Span) {
    self.free.entry(span.pages).or_default().push(span.base);
    self.free_at.insert(span.base, span.pages);
  }

  fn remove_free(&mut self, span: Span) {
    if let Some(chain) = self.free.get_mut(&span.pages) {
      if let Some(pos) = chain.iter().rposition(|&b| b == span.base) {
        chain.remove(pos);
      }
      if chain.is_empty() {
        self.free.remove(&span.pages);
      }
    }
    self.free_at.remove(&span.base);
  }

  /// Free span starting exactly at `addr`.
  fn free_starting_at(&self, addr: usize) -> Option<Span> {
    self
      .free_at
      .get(&addr)
      .map(|&pages| Span { base: addr, pages })
  }

  /// Free span ending exactly at `addr`.
  #[cfg(feature = "coalesce-backward")]
  fn free_ending_at(&self, addr: usize) -> Option<Span> {
    let (&base, &pages) = self.free_at.range(..addr).next_back()?;
    let span = Span { base, pages };
    (span.end() == addr).then_some(span)
  }
}

pub struct PageCache {
  state: Mutex<PageState>,
}

impl PageCache {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(PageState::default()),
    }
  }

  /// Returns the base of a span of exactly `pages` pages.
  ///
  /// Reuses the smallest free span that fits, splitting off its tail, and maps
  /// fresh zero-filled memory only when no free span is large enough.
  pub fn acquire_span(&self, pages: usize) -> Result<NonNull<u8>> {
    if pages == 0 {
      return Err(AllocError::EmptyRequest);
    }

    let mut state = self.state.lock();

    if let Some(mut span) = state.take_fit(pages) {
      if span.pages > pages {
        let rest = Span {
          base: span.base + pages * PAGE_SIZE,
          pages: span.pages - pages,
        };
        log::debug!(
          "split span {:#x}: {} pages -> {} + {}",
          span.base,
          span.pages,
          pages,
          rest.pages
        );
        state.insert_free(rest);
        span.pages = pages;
      }
      state.work.insert(span.base, span.pages);
      // Bases are non-null: they come from successful mappings.
      return NonNull::new(span.base as *mut u8).ok_or(AllocError::OutOfMemory { pages });
    }

    let bytes = pages
      .checked_mul(PAGE_SIZE)
      .ok_or(AllocError::OutOfMemory { pages })?;
    let Some(base) = NonNull::new(unsafe { os_mmap(bytes) }) else {
      log::warn!("mmap of {pages} pages failed");
      return Err(AllocError::OutOfMemory { pages });
    };

    let addr = base.as_ptr() as usize;
    state.regions.push(Region { base: addr, pages });
    state.mapped_pages += pages;
    state.work.insert(addr, pages);
    log::debug!("mapped {pages} pages at {addr:#x}");
    Ok(base)
  }

  /// Returns a span obtained from [`acquire_span`](Self::acquire_span).
  ///
  /// The span is merged with a free span that starts right after it (and,
  /// with `coalesce-backward`, one that ends right at its base). Unknown
  /// bases and mismatched page counts are ignored.
  pub fn release_span(&self, base: NonNull<u8>, pages: usize) {
    let addr = base.as_ptr() as usize;
    let mut state = self.state.lock();

    let Some(&tracked) = state.work.get(&addr) else {
      log::warn!("release of untracked span {addr:#x}");
      return;
    };
    if tracked != pages {
      log::warn!("release of span {addr:#x} with {pages} pages, tracked {tracked}");
      return;
    }
    state.work.remove(&addr);

    #[cfg(feature = "release-mem")]
    unsafe {
      crate::os::os_release(base.as_ptr(), pages * PAGE_SIZE);
    }

    let mut span = Span { base: addr, pages };

    if let Some(next) = state.free_starting_at(span.end()) {
      state.remove_free(next);
      log::debug!(
        "merge span {:#x} ({} pages) with following {:#x} ({} pages)",
        span.base,
        span.pages,
        next.base,
        next.pages
      );
      span.pages += next.pages;
    }

    #[cfg(feature = "coalesce-backward")]
    if let Some(prev) = state.free_ending_at(span.base) {
      state.remove_free(prev);
      log::debug!(
        "merge span {:#x} ({} pages) with preceding {:#x} ({} pages)",
        span.base,
        span.pages,
        prev.base,
        prev.pages
      );
      span = Span {
        base: prev.base,
        pages: prev.pages + span.pages,
      };
    }

    state.insert_free(span);
  }

  pub fn stats(&self) -> PageStats {
    let state = self.state.lock();
    PageStats {
      mapped_pages: state.mapped_pages,
      free_pages: state.free_at.values().sum(),
      in_use_pages: state.work.values().sum(),
      free_spans: state.free_at.len(),
      in_use_spans: state.work.len(),
    }
  }

  /// `(page count, number of free spans with that count)`, ascending.
  pub fn free_spans(&self) -> Vec<(usize, usize)> {
    let state = self.state.lock();
    state
      .free
      .iter()
      .map(|(&pages, chain)| (pages, chain.len()))
      .collect()
  }
}

impl Default for PageCache {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for PageCache {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    for region in state.regions.drain(..) {
      unsafe { os_munmap(region.base as *mut u8, region.pages * PAGE_SIZE) };
    }
    log::debug!("unmapped {} pages", state.mapped_pages);
  }
}
