//! Pool tuning.
//!
//! Defaults match the classic layout: 8-page spans, 64 blocks retained per
//! class in a thread cache, 4 KiB batches. The process-wide pool reads
//! overrides from the environment once, at first use.

use crate::size_class::{MAX_BATCH_BYTES, PAGE_SIZE};

/// Default span size, in pages, requested by the central cache.
pub const DEFAULT_SPAN_PAGES: usize = 8;

/// Blocks a thread cache keeps per class before handing a share back.
pub const DEFAULT_RETAIN_LIMIT: usize = 64;

const ENV_SPAN_PAGES: &str = "TRIMALLOC_SPAN_PAGES";
const ENV_RETAIN_LIMIT: &str = "TRIMALLOC_RETAIN_LIMIT";
const ENV_MAX_BATCH_BYTES: &str = "TRIMALLOC_MAX_BATCH_BYTES";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
  /// Pages per span carved by the central cache (at least this many).
  pub span_pages: usize,
  /// Free blocks a thread cache holds per class before flushing 75% of them.
  pub retain_limit: usize,
  /// Byte ceiling of a single thread-cache refill.
  pub max_batch_bytes: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      span_pages: DEFAULT_SPAN_PAGES,
      retain_limit: DEFAULT_RETAIN_LIMIT,
      max_batch_bytes: MAX_BATCH_BYTES,
    }
  }
}

impl PoolConfig {
  /// Defaults overlaid with `TRIMALLOC_*` environment variables.
  /// Unparseable or zero values are ignored, as are span sizes that do not
  /// fit in `usize` bytes.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let read = |key: &str| {
      let raw = lookup(key)?;
      match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => {
          log::warn!("ignoring {key}={raw:?}");
          None
        }
        Ok(v) => Some(v),
      }
    };

    let mut config = Self::default();
    if let Some(v) = read(ENV_SPAN_PAGES) {
      if v.checked_mul(PAGE_SIZE).is_some() {
        config.span_pages = v;
      } else {
        log::warn!("ignoring {ENV_SPAN_PAGES}={v}: span size overflows");
      }
    }
    if let Some(v) = read(ENV_RETAIN_LIMIT) {
      config.retain_limit = v;
    }
    if let Some(v) = read(ENV_MAX_BATCH_BYTES) {
      config.max_batch_bytes = v;
    }
    config
  }

  /// Bytes in a default span, saturating at `usize::MAX`.
  pub const fn span_bytes(&self) -> usize {
    self.span_pages.saturating_mul(PAGE_SIZE)
  }
}
