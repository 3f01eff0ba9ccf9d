//! Safely overflowing single-producer/single-consumer FIFO
//!
//! [`SpscSofi`] never refuses a push. When the queue is full the producer
//! takes the oldest element out of the queue itself and returns it, so the
//! newest `capacity()` elements are always kept.
//!
//! The ring has one slot more than the capacity. A push writes its value
//! first and only then checks for overflow, and the spare slot keeps that
//! write away from the oldest element the push may still have to hand back.
//!
//! Because the producer may advance the read cursor, the consumer claims an
//! element with a CAS on the read cursor. It copies the slot before the CAS
//! and keeps the copy only if the CAS succeeds, which is why elements must be
//! `Copy`.

use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::common::{ordering, BoundedQueue};
use crate::error::CapacityError;
use crate::trace::debug;
use crate::utils::UninitializedArray;

/// An overwriting bounded SPSC queue for `Copy` elements
///
/// # Example
///
/// ```
/// use lockfree_ipc_queue::SpscSofi;
///
/// let mut sofi = SpscSofi::<u32, 2>::new();
/// let (mut producer, mut consumer) = sofi.split();
///
/// assert_eq!(producer.push(1), None);
/// assert_eq!(producer.push(2), None);
/// assert_eq!(producer.push(3), Some(1));
///
/// assert_eq!(consumer.pop(), Some(2));
/// assert_eq!(consumer.pop(), Some(3));
/// assert_eq!(consumer.pop(), None);
/// ```
#[repr(C)]
pub struct SpscSofi<T: Copy, const CAPACITY: usize> {
    read_position: CachePadded<AtomicU64>,
    write_position: CachePadded<AtomicU64>,
    /// Number of ring slots in use, one more than the current capacity
    ring_size: u64,
    slots: UninitializedArray<T, CAPACITY>,
    spare_slot: UninitializedArray<T, 1>,
}

// Safety: slot ownership is transferred through the cursors, and a slot read
// that may race with the producer is only kept after winning the read cursor CAS.
unsafe impl<T: Copy + Send, const CAPACITY: usize> Sync for SpscSofi<T, CAPACITY> {}

impl<T: Copy, const CAPACITY: usize> SpscSofi<T, CAPACITY> {
    /// Creates an empty queue with capacity `CAPACITY`
    pub fn new() -> Self {
        Self {
            read_position: CachePadded::new(AtomicU64::new(0)),
            write_position: CachePadded::new(AtomicU64::new(0)),
            ring_size: CAPACITY as u64 + 1,
            slots: UninitializedArray::new(),
            spare_slot: UninitializedArray::new(),
        }
    }

    /// Splits the queue into its producer and consumer handle
    pub fn split(&mut self) -> (SpscSofiProducer<'_, T, CAPACITY>, SpscSofiConsumer<'_, T, CAPACITY>) {
        let queue = &*self;
        (SpscSofiProducer { queue }, SpscSofiConsumer { queue })
    }

    /// The number of elements the queue holds before it starts overwriting
    #[inline]
    pub fn capacity(&self) -> usize {
        (self.ring_size - 1) as usize
    }

    /// The largest capacity [`set_capacity`](SpscSofi::set_capacity) accepts
    #[inline]
    pub const fn max_capacity() -> usize {
        CAPACITY
    }

    /// The number of elements at the time of the call
    pub fn size(&self) -> usize {
        let (read_position, write_position) = self.read_write_positions();
        (write_position.wrapping_sub(read_position) as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        let (read_position, write_position) = self.read_write_positions();
        read_position == write_position
    }

    /// Changes the capacity
    ///
    /// Requires that the queue holds at most one element, and none when
    /// shrinking to zero. A resident element is kept and stays poppable.
    ///
    /// # Errors
    ///
    /// * [`CapacityError::ExceedsMaximum`] if `new_capacity > CAPACITY`
    /// * [`CapacityError::NotEmpty`] if the queue holds too many elements
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<(), CapacityError> {
        if new_capacity > CAPACITY {
            return Err(CapacityError::ExceedsMaximum {
                requested: new_capacity,
                max: CAPACITY,
            });
        }

        let size = self.size();
        if size > new_capacity.min(1) {
            return Err(CapacityError::NotEmpty { size });
        }

        let resident = match size {
            // Safety: exclusive access, so we are the only consumer.
            1 => unsafe { self.pop() },
            _ => None,
        };

        self.ring_size = new_capacity as u64 + 1;
        *self.read_position.get_mut() = 0;
        *self.write_position.get_mut() = 0;

        if let Some(value) = resident {
            // Safety: exclusive access and an empty queue with room for it.
            unsafe { self.write_slot(0, value) };
            *self.write_position.get_mut() = 1;
        }

        debug!(capacity = new_capacity, kept = size, "sofi capacity changed");
        Ok(())
    }

    /// Pushes an element, returning the oldest one if it had to be evicted
    ///
    /// # Safety
    ///
    /// No other thread or process may call `push` on this queue concurrently.
    pub unsafe fn push(&self, value: T) -> Option<T> {
        let write_position = self.write_position.load(ordering::X);
        let next_write_position = write_position.wrapping_add(1);

        self.write_slot(write_position, value);
        self.write_position.store(next_write_position, ordering::R);

        let read_position = self.read_position.load(ordering::X);
        if next_write_position < read_position.wrapping_add(self.ring_size) {
            return None;
        }

        // Overflow: take the oldest element unless a pop got to it first.
        // AcqRel keeps the write cursor store above ahead of this claim.
        self.read_position
            .compare_exchange(read_position, read_position.wrapping_add(1), ordering::AR, ordering::A)
            .ok()
            .map(|_| self.read_slot(read_position).assume_init())
    }

    /// Pops the oldest element, or `None` if the queue is empty
    ///
    /// # Safety
    ///
    /// No other thread or process may call `pop` on this queue concurrently.
    pub unsafe fn pop(&self) -> Option<T> {
        let mut read_position = self.read_position.load(ordering::X);

        loop {
            // Even an apparently empty queue goes through the CAS: if the
            // producer overflowed in between, the read cursor moved and we retry.
            let (next_read_position, value) = if read_position == self.write_position.load(ordering::A) {
                (read_position, None)
            } else {
                (read_position.wrapping_add(1), Some(self.read_slot(read_position)))
            };

            match self.read_position.compare_exchange_weak(
                read_position,
                next_read_position,
                ordering::AR,
                ordering::A,
            ) {
                // the copy was taken while we still owned the slot
                Ok(_) => return value.map(|value| value.assume_init()),
                Err(current) => read_position = current,
            }
        }
    }

    /// Loads both cursors as a pair that was valid at one point in time
    fn read_write_positions(&self) -> (u64, u64) {
        loop {
            let read_position = self.read_position.load(ordering::X);
            let write_position = self.write_position.load(ordering::X);

            if self.write_position.load(ordering::X) == write_position
                && self.read_position.load(ordering::X) == read_position
            {
                return (read_position, write_position);
            }
        }
    }

    #[inline]
    fn slot(&self, position: u64) -> usize {
        (position % self.ring_size) as usize
    }

    /// # Safety
    ///
    /// Only the producer may write, and only to the slot at its write cursor.
    #[inline]
    unsafe fn write_slot(&self, position: u64, value: T) {
        match self.slot(position) {
            slot if slot < CAPACITY => self.slots.write(slot, value),
            _ => self.spare_slot.write(0, value),
        }
    }

    /// # Safety
    ///
    /// The result may only be assumed initialized once the read cursor CAS
    /// for `position` has succeeded.
    #[inline]
    unsafe fn read_slot(&self, position: u64) -> MaybeUninit<T> {
        match self.slot(position) {
            slot if slot < CAPACITY => self.slots.copy_speculative(slot),
            _ => self.spare_slot.copy_speculative(0),
        }
    }
}

impl<T: Copy, const CAPACITY: usize> Default for SpscSofi<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const CAPACITY: usize> fmt::Debug for SpscSofi<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpscSofi")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

impl<T: Copy, const CAPACITY: usize> BoundedQueue for SpscSofi<T, CAPACITY> {
    fn capacity(&self) -> usize {
        SpscSofi::capacity(self)
    }

    fn size(&self) -> usize {
        SpscSofi::size(self)
    }

    fn is_empty(&self) -> bool {
        SpscSofi::is_empty(self)
    }
}

/// The pushing half of a split [`SpscSofi`]
#[derive(Debug)]
pub struct SpscSofiProducer<'a, T: Copy, const CAPACITY: usize> {
    queue: &'a SpscSofi<T, CAPACITY>,
}

impl<T: Copy, const CAPACITY: usize> SpscSofiProducer<'_, T, CAPACITY> {
    /// Pushes an element, returning the oldest one if it had to be evicted
    #[inline]
    pub fn push(&mut self, value: T) -> Option<T> {
        // Safety: this handle is the only producer and `&mut self` serialises its calls.
        unsafe { self.queue.push(value) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// The popping half of a split [`SpscSofi`]
#[derive(Debug)]
pub struct SpscSofiConsumer<'a, T: Copy, const CAPACITY: usize> {
    queue: &'a SpscSofi<T, CAPACITY>,
}

impl<T: Copy, const CAPACITY: usize> SpscSofiConsumer<'_, T, CAPACITY> {
    /// Pops the oldest element, or `None` if the queue is empty
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // Safety: this handle is the only consumer and `&mut self` serialises its calls.
        unsafe { self.queue.pop() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
