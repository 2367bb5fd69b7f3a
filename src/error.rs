use thiserror::Error;

/// Failures of the allocation path.
///
/// Frees have no error channel: an untracked address or an out-of-range class
/// is logged and ignored where it is detected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The operating system refused the page mapping.
  #[error("operating system could not map {pages} pages")]
  OutOfMemory { pages: usize },
  /// The system allocator could not satisfy a request above the cached range.
  #[error("system allocator could not satisfy a {size}-byte request")]
  SystemExhausted { size: usize },
  /// Class index outside `[0, NUM_CLASSES)`.
  #[error("size class {0} is out of range")]
  InvalidClass(usize),
  /// Zero pages or zero blocks requested from a shared tier.
  #[error("request for zero units")]
  EmptyRequest,
}

pub type Result<T, E = AllocError> = core::result::Result<T, E>;
