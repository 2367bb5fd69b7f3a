//! Size classification.
//!
//! Every request up to [`MAX_BYTES`] is rounded up to a multiple of [`ALIGNMENT`]
//! and served from the class whose blocks are exactly that size. There is one
//! class per 8-byte step, so the class count is `MAX_BYTES / ALIGNMENT` (32768).
//! Per-class arrays in the two upper tiers are sized by [`NUM_CLASSES`]; that
//! footprint (roughly half a megabyte per thread cache) is the known cost of
//! the fine-grained rounding.

// =============================================================================
// Constants
// =============================================================================

/// Minimal alignment of every block, and the rounding granularity.
pub const ALIGNMENT: usize = 8;

/// Largest request served by the cache hierarchy. Larger requests go to the system.
pub const MAX_BYTES: usize = 256 * 1024;

/// Number of size classes.
pub const NUM_CLASSES: usize = MAX_BYTES / ALIGNMENT;

/// Granularity of the page cache.
pub const PAGE_SIZE: usize = 4096;

/// Batch ceiling: `batch * block_size` never exceeds this many bytes (unless the batch is 1).
pub const MAX_BATCH_BYTES: usize = 4 * 1024;

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(ALIGNMENT >= size_of::<usize>());
const _: () = assert!(MAX_BYTES % ALIGNMENT == 0);
const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(PAGE_SIZE % ALIGNMENT == 0);

// =============================================================================
// Rounding
// =============================================================================

/// Rounds `bytes` up to the next multiple of [`ALIGNMENT`]. Zero is treated as `ALIGNMENT`.
#[inline(always)]
pub const fn round_up(bytes: usize) -> usize {
  let bytes = if bytes < ALIGNMENT { ALIGNMENT } else { bytes };
  (bytes + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Class index serving `bytes`. Callers route `bytes > MAX_BYTES` elsewhere first.
#[inline(always)]
pub const fn class_index(bytes: usize) -> usize {
  round_up(bytes) / ALIGNMENT - 1
}

/// Block size of `class` (inverse of [`class_index`]).
#[inline(always)]
pub const fn class_size(class: usize) -> usize {
  (class + 1) * ALIGNMENT
}

/// How many blocks a thread cache pulls from the central cache at once.
///
/// Larger blocks get smaller batches, and `batch * block_size` stays under
/// `max_batch_bytes`. The result is never zero.
pub const fn batch_count(block_size: usize, max_batch_bytes: usize) -> usize {
  let base = match block_size {
    0..=32 => 64,
    33..=64 => 32,
    65..=128 => 16,
    129..=256 => 8,
    257..=512 => 4,
    513..=1024 => 2,
    _ => 1,
  };
  let by_bytes = max_batch_bytes / block_size;
  let capped = if by_bytes < base { by_bytes } else { base };
  if capped == 0 { 1 } else { capped }
}

/// Pages needed to hold `bytes`, rounded up.
#[inline(always)]
pub const fn pages_for(bytes: usize) -> usize {
  bytes.div_ceil(PAGE_SIZE)
}
