//! Borrowed views of a query field.

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::{borrow::AtomicBorrow, component::TypeInfo};

/// Shared access to a field of the current batch.
///
/// Owned fields have one element per row; fields matched on another entity
/// (fixed source or up traversal) have exactly one element.
pub struct Field<'a, T> {
    data: &'a [T],
    borrow: &'a AtomicBorrow,
    shared: bool,
}

impl<'a, T> Field<'a, T> {
    pub(crate) fn new(data: &'a [T], borrow: &'a AtomicBorrow, shared: bool) -> Self {
        Self {
            data,
            borrow,
            shared,
        }
    }

    /// Whether the value belongs to another entity than the iterated rows.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.shared
    }
}

impl<T> Deref for Field<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T> Drop for Field<'_, T> {
    fn drop(&mut self) {
        self.borrow.release_read();
    }
}

impl<T: fmt::Debug> fmt::Debug for Field<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data).finish()
    }
}

/// Exclusive access to an owned field of the current batch.
pub struct FieldMut<'a, T> {
    data: &'a mut [T],
    borrow: &'a AtomicBorrow,
}

impl<'a, T> FieldMut<'a, T> {
    pub(crate) fn new(data: &'a mut [T], borrow: &'a AtomicBorrow) -> Self {
        Self { data, borrow }
    }
}

impl<T> Deref for FieldMut<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T> DerefMut for FieldMut<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.data
    }
}

impl<T> Drop for FieldMut<'_, T> {
    fn drop(&mut self) {
        self.borrow.release_write();
    }
}

impl<T: fmt::Debug> fmt::Debug for FieldMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

/// Untyped view of a field: base pointer, element size and count.
///
/// No borrow is tracked; callers coordinate access themselves.
#[derive(Clone, Copy)]
pub struct RawField<'a> {
    ptr: *mut u8,
    count: usize,
    info: &'a TypeInfo,
    shared: bool,
}

impl<'a> RawField<'a> {
    pub(crate) const fn new(ptr: *mut u8, count: usize, info: &'a TypeInfo, shared: bool) -> Self {
        Self {
            ptr,
            count,
            info,
            shared,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.info.size()
    }

    #[must_use]
    pub const fn info(&self) -> &'a TypeInfo {
        self.info
    }

    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// Pointer to element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. Shared fields only have index 0.
    #[must_use]
    pub fn get(&self, index: usize) -> *mut u8 {
        assert!(
            index < self.count,
            "field index {index} out of range ({} elements)",
            self.count
        );
        self.ptr.wrapping_add(index * self.info.size())
    }
}

impl fmt::Debug for RawField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawField")
            .field("type", &self.info.name())
            .field("count", &self.count)
            .field("shared", &self.shared)
            .finish()
    }
}
