//! Column storage - type-erased arrays of component values.
//!
//! Each column stores values of a single type in a contiguous array.
//! All lifecycle work goes through the column's [`TypeInfo`] hooks.

use std::{alloc::Layout, ptr::NonNull};

use crate::{borrow::AtomicBorrow, component::TypeInfo};

/// A column of component values of a single type.
///
/// Manages its own memory. Slots past `len` are uninitialized; callers that
/// push uninitialized slots must initialize them before the column is read
/// or dropped.
pub struct Column {
    /// Pointer to the data array.
    data: NonNull<u8>,
    /// Number of values stored.
    len: usize,
    /// Allocated capacity (in number of values).
    capacity: usize,
    info: TypeInfo,
    borrow: AtomicBorrow,
}

// SAFETY: Column owns its values, and only types registered as `Send + Sync`
// components or plain bytes are ever stored in it.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new empty column for the given type.
    #[must_use]
    pub fn new(info: TypeInfo) -> Self {
        Self {
            data: dangling(&info),
            len: 0,
            capacity: 0,
            info,
            borrow: AtomicBorrow::new(),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn info(&self) -> &TypeInfo {
        &self.info
    }

    /// Runtime borrow state used by typed field views.
    #[must_use]
    pub const fn borrow(&self) -> &AtomicBorrow {
        &self.borrow
    }

    /// Append an uninitialized slot and return a pointer to it.
    ///
    /// The slot must be initialized before the column is read, dropped, or
    /// has rows removed.
    pub fn push_uninit(&mut self) -> *mut u8 {
        self.reserve(1);
        // SAFETY: We just reserved space, so self.len is in bounds
        let ptr = unsafe { self.get_unchecked_raw(self.len) };
        self.len += 1;
        ptr
    }

    /// Remove the value at `index` without destroying it, moving the last
    /// value into its place.
    ///
    /// Returns the old index of the value that was moved into `index`,
    /// or `None` if `index` was the last element.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, and the value at `index` must
    /// already have been moved out or destroyed.
    pub unsafe fn swap_remove_uninit(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove");
        self.len -= 1;

        if index < self.len {
            // SAFETY: both indices are within the old length and distinct
            unsafe {
                let hole = self.get_unchecked_raw(index);
                let last = self.get_unchecked_raw(self.len);
                self.info.move_construct(hole, last, 1);
            }
            Some(self.len)
        } else {
            None
        }
    }

    /// Destroy the value at `index` and move the last value into its place.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    pub unsafe fn swap_remove_drop(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove_drop");
        // SAFETY: Caller ensures index is valid and initialized
        unsafe {
            self.info.destruct(self.get_unchecked_raw(index), 1);
            self.swap_remove_uninit(index)
        }
    }

    /// Get a raw pointer to the value at the given index.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    #[must_use]
    pub unsafe fn get_unchecked_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len || (index == self.len && self.len < self.capacity));
        // SAFETY: Caller ensures index is valid
        unsafe { self.data.as_ptr().add(index * self.info.size()) }
    }

    /// Get a raw pointer to the value at `index`, if in bounds.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<*mut u8> {
        // SAFETY: bounds checked
        (index < self.len).then(|| unsafe { self.get_unchecked_raw(index) })
    }

    /// Get a reference to the value at the given index.
    ///
    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked<T: 'static>(&self, index: usize) -> &T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get");
        // SAFETY: Caller ensures index is valid and type matches
        unsafe { &*self.get_unchecked_raw(index).cast::<T>() }
    }

    /// Get a mutable reference to the value at the given index.
    ///
    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self, index: usize) -> &mut T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get_mut");
        // SAFETY: Caller ensures index is valid, type matches, and no aliasing
        unsafe { &mut *self.get_unchecked_raw(index).cast::<T>() }
    }

    /// Get a pointer to the start of the data array.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Reserve capacity for at least `additional` more values.
    ///
    /// # Panics
    ///
    /// Panics if the required capacity overflows `usize`.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len.checked_add(additional).expect("Capacity overflow");

        if required <= self.capacity {
            return;
        }

        self.grow(required);
    }

    /// Grow the column to at least `min_capacity`.
    fn grow(&mut self, min_capacity: usize) {
        // Growth strategy: double capacity, but at least 4 elements
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .unwrap_or(min_capacity)
            .max(min_capacity)
            .max(4);

        if self.info.size() == 0 {
            // Zero-sized types don't need allocation
            self.capacity = usize::MAX;
            return;
        }

        let new_layout = array_layout(&self.info, new_capacity);

        // SAFETY: We handle both new allocation and reallocation
        let new_data = unsafe {
            if self.capacity == 0 {
                std::alloc::alloc(new_layout)
            } else {
                let old_layout = array_layout(&self.info, self.capacity);
                std::alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            }
        };

        let Some(data) = NonNull::new(new_data) else {
            std::alloc::handle_alloc_error(new_layout);
        };
        self.data = data;
        self.capacity = new_capacity;
    }

    /// Destroy all values.
    pub fn clear(&mut self) {
        if self.len > 0 {
            // SAFETY: the first len slots are initialized
            unsafe { self.info.destruct(self.data.as_ptr(), self.len) };
        }
        self.len = 0;
    }
}

fn dangling(info: &TypeInfo) -> NonNull<u8> {
    // An aligned dangling pointer, valid for zero-sized reads of the type
    NonNull::new(info.align() as *mut u8).unwrap_or(NonNull::dangling())
}

/// Calculate the array layout for `count` values.
///
/// # Panics
///
/// Panics if the layout size overflows.
fn array_layout(info: &TypeInfo, count: usize) -> Layout {
    let size = info.size().checked_mul(count).expect("Layout overflow");
    // SAFETY: align is always a power of 2 from Layout
    unsafe { Layout::from_size_align_unchecked(size, info.align()) }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();

        if self.capacity > 0 && self.info.size() > 0 {
            let layout = array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with this layout
            unsafe {
                std::alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("type", &self.info.name())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Packed per-row flags, used for the enabled state of toggled ids.
#[derive(Clone, Debug, Default)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, value);
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit index out of bounds");
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit index out of bounds");
        let word = &mut self.words[index / 64];
        if value {
            *word |= 1 << (index % 64);
        } else {
            *word &= !(1 << (index % 64));
        }
    }

    /// Remove bit `index`, moving the last bit into its place.
    pub fn swap_remove(&mut self, index: usize) {
        let last = self.get(self.len - 1);
        self.set(index, last);
        self.len -= 1;
        if self.len % 64 == 0 {
            self.words.pop();
        }
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        component::{ComponentDesc, TypeRegistry},
        id::Entity,
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn push<T: 'static>(col: &mut Column, value: T) {
        let ptr = col.push_uninit();
        // SAFETY: the slot is fresh and typed T
        unsafe { ptr.cast::<T>().write(value) };
    }

    #[test]
    fn test_column_push_get() {
        let mut col = Column::new(TypeInfo::of::<Position>(Entity::from_index(40).id()));

        push(&mut col, Position { x: 1.0, y: 2.0 });
        push(&mut col, Position { x: 3.0, y: 4.0 });

        assert_eq!(col.len(), 2);

        // SAFETY: Valid indices and correct type
        unsafe {
            assert_eq!(col.get_unchecked::<Position>(0), &Position { x: 1.0, y: 2.0 });
            assert_eq!(col.get_unchecked::<Position>(1), &Position { x: 3.0, y: 4.0 });
        }
        assert!(col.get_raw(2).is_none());
    }

    #[test]
    fn test_column_swap_remove() {
        let mut col = Column::new(TypeInfo::of::<Position>(Entity::from_index(40).id()));

        push(&mut col, Position { x: 1.0, y: 2.0 });
        push(&mut col, Position { x: 3.0, y: 4.0 });
        push(&mut col, Position { x: 5.0, y: 6.0 });

        // SAFETY: Index 0 is valid
        let swapped = unsafe { col.swap_remove_drop(0) };

        assert_eq!(swapped, Some(2));
        assert_eq!(col.len(), 2);
        // SAFETY: Valid index
        unsafe {
            assert_eq!(col.get_unchecked::<Position>(0), &Position { x: 5.0, y: 6.0 });
        }

        // SAFETY: removing the last element swaps nothing
        let swapped = unsafe { col.swap_remove_drop(1) };
        assert_eq!(swapped, None);
    }

    #[test]
    fn test_column_drops_values() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let mut col = Column::new(TypeInfo::of::<Counted>(Entity::from_index(40).id()));
            for _ in 0..10 {
                push(&mut col, Counted(drops.clone()));
            }
            // SAFETY: Index 3 is valid
            unsafe { col.swap_remove_drop(3) };
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_untyped_column_grows() {
        let mut registry = TypeRegistry::new();
        let id = Entity::from_index(40).id();
        let info = registry
            .register(id, ComponentDesc::new("Bytes", 16, 8))
            .unwrap()
            .clone();
        let mut col = Column::new(info);
        for i in 0..100u8 {
            let ptr = col.push_uninit();
            // SAFETY: fresh slot of 16 bytes
            unsafe {
                col.info().construct(ptr, 1);
                *ptr = i;
            }
        }
        assert!(col.capacity() >= 100);
        // SAFETY: index 99 is valid
        unsafe { assert_eq!(*col.get_unchecked_raw(99), 99) };
    }

    #[test]
    fn test_bitset() {
        let mut bits = Bitset::new();
        for i in 0..130 {
            bits.push(i % 3 == 0);
        }
        assert_eq!(bits.count_ones(), 44);
        assert!(bits.get(129));
        bits.swap_remove(1);
        assert!(bits.get(1));
        assert_eq!(bits.len(), 129);
        bits.set(1, false);
        assert!(!bits.get(1));
    }
}
