//! Runtime borrow tracking for columns.
//!
//! Iterators hand out typed field views through `&World`, so aliasing rules
//! are enforced at runtime with one atomic state word per column:
//!
//! | State | Meaning |
//! |------:|--------|
//! | `0` | Unborrowed |
//! | `1` | Borrowed mutably |
//! | `>= 2` | Borrowed by `state - 1` readers |
//!
//! Acquisition never waits. A conflicting borrow is a bug in the caller and
//! fails immediately.

use std::sync::atomic::{AtomicUsize, Ordering};

const UNBORROWED: usize = 0;
const WRITING: usize = 1;

/// Borrow state of a single column.
#[derive(Debug, Default)]
pub struct AtomicBorrow(AtomicUsize);

impl AtomicBorrow {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(UNBORROWED))
    }

    /// Try to add a reader. Fails while a writer holds the column.
    pub fn try_read(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == WRITING {
                return false;
            }
            let next = if current == UNBORROWED { 2 } else { current + 1 };
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a reader acquired with [`AtomicBorrow::try_read`].
    pub fn release_read(&self) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            debug_assert!(current >= 2, "released a read borrow that was not held");
            let next = if current == 2 { UNBORROWED } else { current - 1 };
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Try to take exclusive access. Fails while any borrow is held.
    pub fn try_write(&self) -> bool {
        self.0
            .compare_exchange(UNBORROWED, WRITING, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Release exclusive access acquired with [`AtomicBorrow::try_write`].
    pub fn release_write(&self) {
        let previous = self.0.swap(UNBORROWED, Ordering::AcqRel);
        debug_assert_eq!(previous, WRITING, "released a write borrow that was not held");
    }

    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.0.load(Ordering::Acquire) != UNBORROWED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_share() {
        let borrow = AtomicBorrow::new();
        assert!(borrow.try_read());
        assert!(borrow.try_read());
        assert!(!borrow.try_write());
        borrow.release_read();
        borrow.release_read();
        assert!(!borrow.is_borrowed());
    }

    #[test]
    fn test_writer_excludes() {
        let borrow = AtomicBorrow::new();
        assert!(borrow.try_write());
        assert!(!borrow.try_read());
        assert!(!borrow.try_write());
        borrow.release_write();
        assert!(borrow.try_read());
        borrow.release_read();
    }
}
