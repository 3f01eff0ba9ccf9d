//! Bounded lock-free multi-producer/multi-consumer value queue
//!
//! [`MpmcLockFreeQueue`] keeps its elements in a fixed buffer of
//! uninitialized slots and uses two [`MpmcIndexQueue`]s as the slot
//! allocator. Together the free and the used index queue always hold every
//! slot token exactly once (apart from the tokens of pushes and pops in
//! flight), and a slot holds a live value exactly while its token sits in the
//! used queue.
//!
//! A push takes a token from the free queue, writes the value into the slot
//! and then publishes the token into the used queue. A pop takes a token from
//! the used queue, moves the value out and returns the token to the free
//! queue. The release/acquire pair on the index cells orders the slot write
//! before any read of the same slot.
//!
//! Elements pushed by one producer are popped in the order that producer
//! pushed them. Across producers no order is guaranteed.

use std::fmt;
use std::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::common::{ordering, BoundedQueue, LockFreeQueueOps};
use crate::index_queue::MpmcIndexQueue;
use crate::utils::UninitializedArray;

/// A lock-free bounded queue for arbitrary element types
///
/// # Example
///
/// ```
/// use lockfree_ipc_queue::MpmcLockFreeQueue;
///
/// let queue = MpmcLockFreeQueue::<&str, 2>::new();
/// assert!(queue.try_push("a").is_ok());
/// assert!(queue.try_push("b").is_ok());
/// assert_eq!(queue.try_push("c"), Err("c"));
///
/// // the overflowing push evicts the oldest element instead of failing
/// assert_eq!(queue.push("c"), Some("a"));
/// assert_eq!(queue.pop(), Some("b"));
/// assert_eq!(queue.pop(), Some("c"));
/// assert_eq!(queue.pop(), None);
/// ```
#[repr(C)]
pub struct MpmcLockFreeQueue<T, const CAPACITY: usize> {
    free_indices: MpmcIndexQueue<CAPACITY>,
    used_indices: MpmcIndexQueue<CAPACITY>,
    buffer: UninitializedArray<T, CAPACITY>,
    size: CachePadded<AtomicU64>,
}

// Safety: a slot is only accessed by the thread holding its token, and tokens
// are handed over through the index queues with release/acquire ordering.
unsafe impl<T: Send, const CAPACITY: usize> Sync for MpmcLockFreeQueue<T, CAPACITY> {}

impl<T, const CAPACITY: usize> MpmcLockFreeQueue<T, CAPACITY> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            free_indices: MpmcIndexQueue::new_full(),
            used_indices: MpmcIndexQueue::new_empty(),
            buffer: UninitializedArray::new(),
            size: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// The number of elements the queue can hold
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// The number of elements at the time of the call
    ///
    /// Advisory only: it may already be stale when it is returned.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(ordering::X) as usize
    }

    /// Whether the queue was empty at the time of the call
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_indices.is_empty()
    }

    /// Attempts to push an element
    ///
    /// Returns the element back as `Err` if the queue was full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let Some(index) = self.free_indices.pop() else {
            return Err(value);
        };

        // Safety: the token was taken from the free queue, so we own the empty slot.
        unsafe { self.write_buffer_at(index, value) };
        self.used_indices.push(index);
        Ok(())
    }

    /// Pushes an element, evicting and returning the oldest one if the queue is full
    ///
    /// Never fails. When the queue is full the oldest element is moved out
    /// and the new element takes its slot at the tail, so the queue stays at
    /// capacity in FIFO order.
    pub fn push(&self, value: T) -> Option<T> {
        let mut evicted = None;

        let index = loop {
            if let Some(index) = self.free_indices.pop() {
                break index;
            }
            if let Some(index) = self.used_indices.pop_if_full() {
                // Safety: the token was taken from the used queue, so the slot is live and ours.
                evicted = Some(unsafe { self.read_buffer_at(index) });
                break index;
            }
            // a concurrent pop made room; the free queue has a token again
        };

        // Safety: we own the token and its slot is empty.
        unsafe { self.write_buffer_at(index, value) };
        self.used_indices.push(index);
        evicted
    }

    /// Pops the oldest element, or `None` if the queue was empty
    pub fn pop(&self) -> Option<T> {
        let index = self.used_indices.pop()?;

        // Safety: the token was taken from the used queue, so the slot is live and ours.
        let value = unsafe { self.read_buffer_at(index) };
        self.free_indices.push(index);
        Some(value)
    }

    #[inline]
    pub(crate) fn free_indices(&self) -> &MpmcIndexQueue<CAPACITY> {
        &self.free_indices
    }

    #[inline]
    pub(crate) fn used_indices(&self) -> &MpmcIndexQueue<CAPACITY> {
        &self.used_indices
    }

    /// # Safety
    ///
    /// The caller must hold `index`'s token outside both index queues and the
    /// slot must be empty.
    #[inline]
    pub(crate) unsafe fn write_buffer_at(&self, index: usize, value: T) {
        self.buffer.write(index, value);
        self.size.fetch_add(1, ordering::R);
    }

    /// # Safety
    ///
    /// The caller must hold `index`'s token outside both index queues and the
    /// slot must be live.
    #[inline]
    pub(crate) unsafe fn read_buffer_at(&self, index: usize) -> T {
        self.size.fetch_sub(1, ordering::A);
        self.buffer.take(index)
    }
}

impl<T, const CAPACITY: usize> Default for MpmcLockFreeQueue<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> Drop for MpmcLockFreeQueue<T, CAPACITY> {
    fn drop(&mut self) {
        while let Some(index) = self.used_indices.pop() {
            // Safety: exclusive access; every token in the used queue marks a live slot.
            unsafe { self.buffer.drop_in_place(index) };
        }
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for MpmcLockFreeQueue<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcLockFreeQueue")
            .field("capacity", &CAPACITY)
            .field("size", &self.size())
            .finish()
    }
}

impl<T, const CAPACITY: usize> BoundedQueue for MpmcLockFreeQueue<T, CAPACITY> {
    fn capacity(&self) -> usize {
        CAPACITY
    }

    fn size(&self) -> usize {
        MpmcLockFreeQueue::size(self)
    }

    fn is_empty(&self) -> bool {
        MpmcLockFreeQueue::is_empty(self)
    }
}

impl<T, const CAPACITY: usize> LockFreeQueueOps<T> for MpmcLockFreeQueue<T, CAPACITY> {
    fn try_push(&self, value: T) -> Result<(), T> {
        MpmcLockFreeQueue::try_push(self, value)
    }

    fn push(&self, value: T) -> Option<T> {
        MpmcLockFreeQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        MpmcLockFreeQueue::pop(self)
    }
}
