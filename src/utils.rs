//! Utility types for the queues
//!
//! This module provides the inline slot storage the value queues are built on.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;

/// Fixed-size array of slots that start out uninitialized
///
/// The array itself never knows which slots are live. Every queue that owns
/// one tracks liveness through its own cursors or index tokens and only
/// touches a slot while that protocol grants it exclusive access, which is why
/// all accessors are `unsafe`.
///
/// The storage is inline and pointer-free, so the owning queue can be placed
/// in memory mapped by several processes.
#[repr(C)]
pub struct UninitializedArray<T, const N: usize> {
    data: [UnsafeCell<MaybeUninit<T>>; N],
}

impl<T, const N: usize> UninitializedArray<T, N> {
    /// Creates an array with every slot uninitialized
    #[inline]
    pub fn new() -> Self {
        Self {
            data: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        }
    }

    /// Constructs `value` in slot `index`
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the slot and the slot must not
    /// hold a live value (it would be leaked).
    #[inline]
    pub unsafe fn write(&self, index: usize, value: T) {
        (*self.data[index].get()).write(value);
    }

    /// Moves the value out of slot `index`, leaving the slot uninitialized
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the slot and the slot must
    /// hold a live value.
    #[inline]
    pub unsafe fn take(&self, index: usize) -> T {
        (*self.data[index].get()).assume_init_read()
    }

    /// Copies the raw bytes of slot `index` without asserting they are valid
    ///
    /// Used by readers that may race with a writer of the same slot and only
    /// keep the copy once they have confirmed ownership afterwards.
    ///
    /// # Safety
    ///
    /// The index must be in bounds of an array shared with at most one writer.
    ///
    /// The volatile read is not atomic. If the writer stores into the same
    /// slot at the same time (a producer lapping a stalled reader), the read
    /// is still a data race under the Rust memory model and the copy may be
    /// torn. Callers must only use it for `Copy` types without validity
    /// invariants beyond their bytes, and must never `assume_init` a copy
    /// whose ownership check failed.
    #[inline]
    pub unsafe fn copy_speculative(&self, index: usize) -> MaybeUninit<T> {
        ptr::read_volatile(self.data[index].get())
    }

    /// Drops the value in slot `index` in place
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the slot and the slot must
    /// hold a live value.
    #[inline]
    pub unsafe fn drop_in_place(&self, index: usize) {
        (*self.data[index].get()).assume_init_drop();
    }
}

impl<T, const N: usize> Default for UninitializedArray<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> fmt::Debug for UninitializedArray<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UninitializedArray")
            .field("len", &N)
            .finish_non_exhaustive()
    }
}
