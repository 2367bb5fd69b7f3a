//! Intrusive singly linked free lists.
//!
//! While a block sits on a free list, its first word holds the address of the
//! next free block of the same class. This module is the only place that
//! reads or writes that word; once a block is popped it belongs to the caller
//! and the link is never looked at again.

use core::{
  fmt,
  ptr::{NonNull, null_mut},
};

#[repr(C)]
struct FreeBlock {
  next: *mut FreeBlock,
}

/// A chain of free blocks: head, tail and length.
///
/// Every node is a block of the same class that nobody else references.
/// Lists are only built through the unsafe constructors below, so the safe
/// methods can rely on that.
pub struct FreeList {
  head: *mut FreeBlock,
  tail: *mut FreeBlock,
  len: usize,
}

// Nodes are unreferenced memory owned by whoever holds the list.
unsafe impl Send for FreeList {}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: null_mut(),
      tail: null_mut(),
      len: 0,
    }
  }

  #[inline]
  pub const fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Address of the first block, or null.
  #[inline]
  pub fn head(&self) -> *mut u8 {
    self.head.cast()
  }

  /// Links `count` consecutive blocks of `block_size` bytes starting at `base`,
  /// in address order.
  ///
  /// # Safety
  /// `base..base + count * block_size` must be writable memory owned by the
  /// caller, `base` aligned for a pointer and `block_size` a multiple of it.
  pub unsafe fn carve(base: NonNull<u8>, block_size: usize, count: usize) -> Self {
    if count == 0 {
      return Self::new();
    }
    let base = base.as_ptr();
    for i in 0..count - 1 {
      unsafe {
        let block = base.add(i * block_size) as *mut FreeBlock;
        (*block).next = base.add((i + 1) * block_size) as *mut FreeBlock;
      }
    }
    let tail = unsafe { base.add((count - 1) * block_size) as *mut FreeBlock };
    unsafe { (*tail).next = null_mut() };
    Self {
      head: base as *mut FreeBlock,
      tail,
      len: count,
    }
  }

  /// Pushes `block` at the head, overwriting its first word.
  ///
  /// # Safety
  /// `block` must be a free block of this list's class, at least one word
  /// long, pointer-aligned and not referenced anywhere else.
  #[inline]
  pub unsafe fn push(&mut self, block: NonNull<u8>) {
    let block = block.as_ptr() as *mut FreeBlock;
    unsafe { (*block).next = self.head };
    if self.head.is_null() {
      self.tail = block;
    }
    self.head = block;
    self.len += 1;
  }

  /// Unlinks the head block.
  #[inline]
  pub fn pop(&mut self) -> Option<NonNull<u8>> {
    let block = NonNull::new(self.head)?;
    self.head = unsafe { (*self.head).next };
    self.len -= 1;
    if self.head.is_null() {
      self.tail = null_mut();
    }
    Some(block.cast())
  }

  /// Keeps the first `keep` blocks and returns the remainder as a new list.
  pub fn split_off(&mut self, keep: usize) -> Self {
    if keep >= self.len {
      return Self::new();
    }
    if keep == 0 {
      return core::mem::take(self);
    }

    let mut cut = self.head;
    for _ in 1..keep {
      cut = unsafe { (*cut).next };
    }
    let rest = Self {
      head: unsafe { (*cut).next },
      tail: self.tail,
      len: self.len - keep,
    };
    unsafe { (*cut).next = null_mut() };
    self.tail = cut;
    self.len = keep;
    rest
  }

  /// Removes up to `n` blocks from the front and returns them.
  pub fn take_front(&mut self, n: usize) -> Self {
    let rest = self.split_off(n);
    core::mem::replace(self, rest)
  }

  /// Prepends `other` in O(1).
  pub fn prepend(&mut self, other: Self) {
    if other.is_empty() {
      return;
    }
    unsafe { (*other.tail).next = self.head };
    if self.head.is_null() {
      self.tail = other.tail;
    }
    self.head = other.head;
    self.len += other.len;
  }
}

impl Default for FreeList {
  fn default() -> Self {
    Self::new()
  }
}

impl Iterator for FreeList {
  type Item = NonNull<u8>;

  fn next(&mut self) -> Option<NonNull<u8>> {
    self.pop()
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.len, Some(self.len))
  }
}

impl fmt::Debug for FreeList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FreeList")
      .field("head", &self.head)
      .field("len", &self.len)
      .finish()
  }
}
