use core::{
  cell::UnsafeCell,
  hint,
  ops::{Deref, DerefMut},
  sync::atomic::{AtomicBool, Ordering},
};

/// Spins this many times on a held lock before yielding the time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Test-and-test-and-set spin lock. Waiters busy-poll, then yield.
pub(crate) struct SpinLock {
  locked: AtomicBool,
}

impl SpinLock {
  pub(crate) const fn new() -> Self {
    Self {
      locked: AtomicBool::new(false),
    }
  }

  #[inline]
  pub(crate) fn lock(&self) {
    let mut spins = 0;
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        if spins < SPINS_BEFORE_YIELD {
          spins += 1;
          hint::spin_loop();
        } else {
          std::thread::yield_now();
        }
      }
    }
  }

  #[inline]
  pub(crate) fn unlock(&self) {
    self.locked.store(false, Ordering::Release);
  }
}

/// Data guarded by a [`SpinLock`]. Access only through [`SpinMutex::lock`].
pub(crate) struct SpinMutex<T> {
  lock: SpinLock,
  data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
  pub(crate) const fn new(data: T) -> Self {
    Self {
      lock: SpinLock::new(),
      data: UnsafeCell::new(data),
    }
  }

  #[inline]
  pub(crate) fn lock(&self) -> SpinGuard<'_, T> {
    self.lock.lock();
    SpinGuard { mutex: self }
  }
}

/// Releases the lock on drop, including while unwinding.
pub(crate) struct SpinGuard<'a, T> {
  mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    unsafe { &*self.mutex.data.get() }
  }
}

impl<T> DerefMut for SpinGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.mutex.data.get() }
  }
}

impl<T> Drop for SpinGuard<'_, T> {
  fn drop(&mut self) {
    self.mutex.lock.unlock();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{sync::Arc, thread};

  #[test]
  fn serializes_increments() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 10_000;

    let counter = Arc::new(SpinMutex::new(0usize));
    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let counter = Arc::clone(&counter);
        thread::spawn(move || {
          for _ in 0..ROUNDS {
            *counter.lock() += 1;
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(*counter.lock(), THREADS * ROUNDS);
  }

  #[test]
  fn guard_releases_on_panic() {
    let m = Arc::new(SpinMutex::new(1u32));
    let m2 = Arc::clone(&m);
    let res = thread::spawn(move || {
      let _g = m2.lock();
      panic!("boom");
    })
    .join();
    assert!(res.is_err());
    assert_eq!(*m.lock(), 1);
  }
}
