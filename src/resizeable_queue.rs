//! Lock-free MPMC queue whose capacity can change at run time
//!
//! [`MpmcResizeableLockFreeQueue`] reserves storage for `MAX_CAPACITY`
//! elements up front and only lets `capacity()` of the slot tokens circulate
//! between the free and the used index queue. The remaining tokens are parked
//! outside both queues. Growing releases parked tokens into the free queue.
//! Shrinking parks idle free tokens first and, if that is not enough, evicts
//! the oldest elements and parks their tokens.
//!
//! Capacity changes run concurrently with push and pop. Only one capacity
//! change may be in flight at a time; a second caller is rejected with
//! [`CapacityError::ResizeInProgress`] rather than waiting.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64};

use crossbeam_utils::{Backoff, CachePadded};

use crate::common::{ordering, BoundedQueue, LockFreeQueueOps};
use crate::error::CapacityError;
use crate::lockfree_queue::MpmcLockFreeQueue;
use crate::trace::{debug, trace, warn};

/// Slot tokens currently withdrawn from circulation
///
/// Only touched by the holder of the resize flag.
#[repr(C)]
struct ParkedIndices<const N: usize> {
    indices: [usize; N],
    len: usize,
}

impl<const N: usize> ParkedIndices<N> {
    const fn new() -> Self {
        Self {
            indices: [0; N],
            len: 0,
        }
    }

    fn push(&mut self, index: usize) {
        self.indices[self.len] = index;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.indices[self.len])
    }
}

/// Holds the resize flag; clears it when dropped
struct ResizeGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ResizeGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, ordering::A, ordering::X)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ResizeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, ordering::R);
    }
}

/// A lock-free bounded queue with a run-time adjustable capacity
///
/// # Example
///
/// ```
/// use lockfree_ipc_queue::MpmcResizeableLockFreeQueue;
///
/// let queue = MpmcResizeableLockFreeQueue::<u32, 10>::new();
/// for i in 0..10 {
///     assert!(queue.try_push(i).is_ok());
/// }
///
/// let mut evicted = Vec::new();
/// assert!(queue.set_capacity_with(3, |value| evicted.push(value)).is_ok());
///
/// assert_eq!(evicted, vec![0, 1, 2, 3, 4, 5, 6]);
/// assert_eq!(queue.capacity(), 3);
/// assert_eq!(queue.size(), 3);
/// ```
#[repr(C)]
pub struct MpmcResizeableLockFreeQueue<T, const MAX_CAPACITY: usize> {
    base: MpmcLockFreeQueue<T, MAX_CAPACITY>,
    capacity: CachePadded<AtomicU64>,
    resize_in_progress: CachePadded<AtomicBool>,
    parked: UnsafeCell<ParkedIndices<MAX_CAPACITY>>,
}

// Safety: `parked` is only accessed while holding the resize flag, everything
// else is shared the same way as in `MpmcLockFreeQueue`.
unsafe impl<T: Send, const MAX_CAPACITY: usize> Sync for MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {}

impl<T, const MAX_CAPACITY: usize> MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {
    /// Creates an empty queue at its maximum capacity
    pub fn new() -> Self {
        Self {
            base: MpmcLockFreeQueue::new(),
            capacity: CachePadded::new(AtomicU64::new(MAX_CAPACITY as u64)),
            resize_in_progress: CachePadded::new(AtomicBool::new(false)),
            parked: UnsafeCell::new(ParkedIndices::new()),
        }
    }

    /// Creates an empty queue with the given initial capacity
    ///
    /// Capacities above `MAX_CAPACITY` saturate at `MAX_CAPACITY`.
    pub fn with_capacity(initial_capacity: usize) -> Self {
        let queue = Self::new();
        let resized = queue.set_capacity(initial_capacity.min(MAX_CAPACITY));
        debug_assert!(resized.is_ok());
        queue
    }

    /// The largest capacity the queue can ever be set to
    #[inline]
    pub const fn max_capacity() -> usize {
        MAX_CAPACITY
    }

    /// The capacity at the time of the call
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.load(ordering::X) as usize
    }

    /// The number of elements at the time of the call
    #[inline]
    pub fn size(&self) -> usize {
        self.base.size()
    }

    /// Whether the queue was empty at the time of the call
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Attempts to push an element
    ///
    /// Returns the element back as `Err` if the queue was full at its current capacity.
    #[inline]
    pub fn try_push(&self, value: T) -> Result<(), T> {
        self.base.try_push(value)
    }

    /// Pushes an element, evicting and returning the oldest one if the queue is full
    ///
    /// At capacity zero nothing can be stored and `value` itself is returned.
    pub fn push(&self, value: T) -> Option<T> {
        let mut evicted = None;

        let index = loop {
            if let Some(index) = self.base.free_indices().pop() {
                break index;
            }
            if let Some(index) = self.try_get_used_index() {
                // Safety: the token was taken from the used queue, so the slot is live and ours.
                evicted = Some(unsafe { self.base.read_buffer_at(index) });
                break index;
            }
            if self.capacity() == 0 {
                return Some(value);
            }
        };

        // Safety: we own the token and its slot is empty.
        unsafe { self.base.write_buffer_at(index, value) };
        self.base.used_indices().push(index);
        evicted
    }

    /// Pops the oldest element, or `None` if the queue was empty
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.base.pop()
    }

    /// Changes the capacity, dropping any elements evicted by a shrink
    pub fn set_capacity(&self, new_capacity: usize) -> Result<(), CapacityError> {
        self.set_capacity_with(new_capacity, drop)
    }

    /// Changes the capacity, handing elements evicted by a shrink to `remove_handler`
    ///
    /// Evicted elements are passed oldest first. Push and pop may run
    /// concurrently; on success the capacity is exactly `new_capacity` and
    /// the queue holds at most that many elements.
    ///
    /// # Errors
    ///
    /// * [`CapacityError::ExceedsMaximum`] if `new_capacity > MAX_CAPACITY`
    /// * [`CapacityError::ResizeInProgress`] if another capacity change has
    ///   not finished yet, including one that is calling this handler
    pub fn set_capacity_with<F>(&self, new_capacity: usize, mut remove_handler: F) -> Result<(), CapacityError>
    where
        F: FnMut(T),
    {
        if new_capacity > MAX_CAPACITY {
            warn!(requested = new_capacity, max = MAX_CAPACITY, "capacity change rejected");
            return Err(CapacityError::ExceedsMaximum {
                requested: new_capacity,
                max: MAX_CAPACITY,
            });
        }

        let Some(_guard) = ResizeGuard::try_acquire(&self.resize_in_progress) else {
            warn!(requested = new_capacity, "capacity change already in progress");
            return Err(CapacityError::ResizeInProgress);
        };

        // Safety: we hold the resize flag, which grants exclusive access to the parked tokens.
        let parked = unsafe { &mut *self.parked.get() };

        let old_capacity = self.capacity();
        if old_capacity == new_capacity {
            return Ok(());
        }

        while self.capacity() < new_capacity {
            self.increase_capacity(parked);
        }
        while self.capacity() > new_capacity {
            self.decrease_capacity(parked, &mut remove_handler);
        }

        debug!(from = old_capacity, to = new_capacity, "capacity changed");
        Ok(())
    }

    /// Returns one parked token to circulation
    fn increase_capacity(&self, parked: &mut ParkedIndices<MAX_CAPACITY>) {
        // parked.len == MAX_CAPACITY - capacity while the resize flag is held
        if let Some(index) = parked.pop() {
            self.capacity.fetch_add(1, ordering::AR);
            self.base.free_indices().push(index);
        }
    }

    /// Withdraws one token from circulation, evicting an element if no token is idle
    fn decrease_capacity<F>(&self, parked: &mut ParkedIndices<MAX_CAPACITY>, remove_handler: &mut F)
    where
        F: FnMut(T),
    {
        let backoff = Backoff::new();
        loop {
            if let Some(index) = self.base.free_indices().pop() {
                parked.push(index);
                self.capacity.fetch_sub(1, ordering::AR);
                return;
            }

            // a plain pop would let a racing push reuse the freed slot before we park it
            if let Some(index) = self.try_get_used_index() {
                // Safety: the token was taken from the used queue, so the slot is live and ours.
                let value = unsafe { self.base.read_buffer_at(index) };
                parked.push(index);
                self.capacity.fetch_sub(1, ordering::AR);
                trace!(slot = index, "evicted element while shrinking");
                remove_handler(value);
                return;
            }

            // a push or pop holds the missing token; wait for it to come back
            backoff.spin();
        }
    }

    /// Takes the oldest used token, but only if every circulating token is in use
    #[inline]
    fn try_get_used_index(&self) -> Option<usize> {
        self.base.used_indices().pop_if_size_is_at_least(self.capacity())
    }
}

impl<T, const MAX_CAPACITY: usize> Default for MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const MAX_CAPACITY: usize> fmt::Debug for MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcResizeableLockFreeQueue")
            .field("max_capacity", &MAX_CAPACITY)
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

impl<T, const MAX_CAPACITY: usize> BoundedQueue for MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {
    fn capacity(&self) -> usize {
        MpmcResizeableLockFreeQueue::capacity(self)
    }

    fn size(&self) -> usize {
        MpmcResizeableLockFreeQueue::size(self)
    }

    fn is_empty(&self) -> bool {
        MpmcResizeableLockFreeQueue::is_empty(self)
    }
}

impl<T, const MAX_CAPACITY: usize> LockFreeQueueOps<T> for MpmcResizeableLockFreeQueue<T, MAX_CAPACITY> {
    fn try_push(&self, value: T) -> Result<(), T> {
        MpmcResizeableLockFreeQueue::try_push(self, value)
    }

    fn push(&self, value: T) -> Option<T> {
        MpmcResizeableLockFreeQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        MpmcResizeableLockFreeQueue::pop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled<const N: usize>(count: u32) -> MpmcResizeableLockFreeQueue<u32, N> {
        let q = MpmcResizeableLockFreeQueue::new();
        for i in 0..count {
            assert!(q.try_push(i).is_ok());
        }
        q
    }

    #[test]
    fn test_new_queue_has_max_capacity() {
        let q = MpmcResizeableLockFreeQueue::<u32, 8>::new();
        assert_eq!(q.capacity(), 8);
        assert_eq!(MpmcResizeableLockFreeQueue::<u32, 8>::max_capacity(), 8);
        assert!(q.is_empty());
    }

    #[test]
    fn test_with_capacity_limits_pushes() {
        let q = MpmcResizeableLockFreeQueue::<u32, 8>::with_capacity(3);
        assert_eq!(q.capacity(), 3);
        for i in 0..3 {
            assert!(q.try_push(i).is_ok());
        }
        assert_eq!(q.try_push(3), Err(3));
        assert_eq!(q.push(3), Some(0));
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn test_with_capacity_saturates_at_maximum() {
        let q = MpmcResizeableLockFreeQueue::<u32, 4>::with_capacity(100);
        assert_eq!(q.capacity(), 4);
    }

    #[test]
    fn test_shrink_full_queue_evicts_oldest_first() {
        let q = filled::<10>(10);
        let mut evicted = Vec::new();

        assert!(q.set_capacity_with(3, |v| evicted.push(v)).is_ok());

        assert_eq!(evicted, (0..7).collect::<Vec<_>>());
        assert_eq!(q.capacity(), 3);
        assert_eq!(q.size(), 3);
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), Some(8));
        assert_eq!(q.pop(), Some(9));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_shrink_uses_idle_tokens_before_evicting() {
        let q = filled::<10>(5);
        let mut evicted = Vec::new();

        assert!(q.set_capacity_with(7, |v| evicted.push(v)).is_ok());
        assert!(evicted.is_empty());
        assert_eq!(q.size(), 5);

        assert!(q.set_capacity_with(3, |v| evicted.push(v)).is_ok());
        assert_eq!(evicted, vec![0, 1]);
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn test_grow_after_shrink() {
        let q = filled::<6>(6);
        assert!(q.set_capacity(2).is_ok());
        assert_eq!(q.size(), 2);

        assert!(q.set_capacity(6).is_ok());
        assert_eq!(q.capacity(), 6);
        for i in 100..104 {
            assert!(q.try_push(i).is_ok());
        }
        assert_eq!(q.try_push(104), Err(104));

        let drained: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, vec![4, 5, 100, 101, 102, 103]);
    }

    #[test]
    fn test_set_capacity_above_maximum_is_rejected() {
        let q = filled::<4>(2);
        assert_eq!(
            q.set_capacity(5),
            Err(CapacityError::ExceedsMaximum { requested: 5, max: 4 })
        );
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn test_nested_resize_is_rejected() {
        let q = filled::<4>(4);
        let mut nested = Vec::new();

        assert!(q
            .set_capacity_with(3, |_| nested.push(q.set_capacity(1)))
            .is_ok());

        assert_eq!(nested, vec![Err(CapacityError::ResizeInProgress)]);
        assert_eq!(q.capacity(), 3);

        // the flag is released again afterwards
        assert!(q.set_capacity(1).is_ok());
    }

    #[test]
    fn test_capacity_zero() {
        let q = filled::<4>(2);
        assert!(q.set_capacity(0).is_ok());
        assert_eq!(q.capacity(), 0);
        assert!(q.is_empty());

        assert_eq!(q.try_push(1), Err(1));
        assert_eq!(q.push(2), Some(2));
        assert_eq!(q.pop(), None);

        assert!(q.set_capacity(1).is_ok());
        assert_eq!(q.push(3), None);
        assert_eq!(q.push(4), Some(3));
    }

    #[test]
    fn test_concurrent_resize_with_push_pop() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::thread;

        const MAX: usize = 32;
        let q = MpmcResizeableLockFreeQueue::<usize, MAX>::new();
        let done = AtomicBool::new(false);
        let pushed = AtomicUsize::new(0);
        let popped = AtomicUsize::new(0);
        let removed = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for i in 0..20_000 {
                        pushed.fetch_add(1, Ordering::Relaxed);
                        if q.push(i).is_some() {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    if q.pop().is_some() {
                        popped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            s.spawn(|| {
                for round in 0..2_000 {
                    let target = [1, MAX, 7, 0, 16][round % 5];
                    let result = q.set_capacity_with(target, |_| {
                        removed.fetch_add(1, Ordering::Relaxed);
                    });
                    assert!(result.is_ok());
                    assert!(q.size() <= target, "size {} above capacity {target}", q.size());
                }
                assert!(q.set_capacity(MAX).is_ok());
                done.store(true, Ordering::Relaxed);
            });
        });

        let mut remaining = 0;
        while q.pop().is_some() {
            remaining += 1;
        }
        assert_eq!(
            pushed.load(Ordering::Relaxed),
            popped.load(Ordering::Relaxed) + removed.load(Ordering::Relaxed) + remaining
        );
        assert_eq!(q.capacity(), MAX);
    }
}
