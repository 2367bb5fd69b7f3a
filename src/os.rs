//! Operating system interface.
//!
//! Anonymous mappings back the page cache; requests above `MAX_BYTES` bypass
//! the hierarchy through the system allocator.

use core::ptr::null_mut;

/// Maps `size` bytes of fresh, zero-filled, page-aligned, read-write memory.
/// Returns null on failure.
pub(crate) unsafe fn os_mmap(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

/// `ptr`/`size` must describe a whole region returned by [`os_mmap`].
pub(crate) unsafe fn os_munmap(ptr: *mut u8, size: usize) {
  unsafe { libc::munmap(ptr.cast(), size) };
}

/// Lets the kernel reclaim the physical pages of a region we keep mapped.
/// The next touch sees zero-filled pages.
#[cfg(feature = "release-mem")]
pub(crate) unsafe fn os_release(ptr: *mut u8, size: usize) {
  let ret = unsafe { libc::madvise(ptr.cast(), size, libc::MADV_DONTNEED) };
  debug_assert!(ret == 0, "madvise(MADV_DONTNEED) failed");
}

/// System-direct path for requests above the cached range.
pub(crate) fn system_alloc(size: usize) -> *mut u8 {
  unsafe { libc::malloc(size) as *mut u8 }
}

/// `ptr` must come from [`system_alloc`].
pub(crate) unsafe fn system_free(ptr: *mut u8) {
  unsafe { libc::free(ptr.cast()) };
}
