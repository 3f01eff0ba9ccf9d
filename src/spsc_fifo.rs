//! Bounded single-producer/single-consumer FIFO
//!
//! The producer owns the write cursor and the consumer owns the read cursor;
//! each only ever loads the other's cursor. Neither side needs a CAS. Pushing
//! into a full queue is refused rather than overwriting.
//!
//! Cursors are monotonically increasing `u64` positions; the slot of a
//! position is `position % CAPACITY`.

use std::fmt;
use std::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::common::{ordering, BoundedQueue};
use crate::utils::UninitializedArray;

/// A wait-free bounded SPSC queue
///
/// Within one process, [`split`](SpscFifo::split) the queue into a
/// [`SpscFifoProducer`] and a [`SpscFifoConsumer`]; the borrow checker then
/// guarantees a single caller per role. For queues placed in memory shared
/// with another process the `unsafe` [`push`](SpscFifo::push) and
/// [`pop`](SpscFifo::pop) methods take `&self` instead.
///
/// # Example
///
/// ```
/// use lockfree_ipc_queue::SpscFifo;
///
/// let mut fifo = SpscFifo::<u32, 2>::new();
/// let (mut producer, mut consumer) = fifo.split();
///
/// assert!(producer.push(1).is_ok());
/// assert!(producer.push(2).is_ok());
/// assert_eq!(producer.push(3), Err(3));
///
/// assert_eq!(consumer.pop(), Some(1));
/// assert!(producer.push(3).is_ok());
/// ```
#[repr(C)]
pub struct SpscFifo<T, const CAPACITY: usize> {
    write_position: CachePadded<AtomicU64>,
    read_position: CachePadded<AtomicU64>,
    buffer: UninitializedArray<T, CAPACITY>,
}

// Safety: the slot between the cursors belongs to the consumer, the rest to
// the producer; ownership changes hands through release/acquire cursor updates.
unsafe impl<T: Send, const CAPACITY: usize> Sync for SpscFifo<T, CAPACITY> {}

impl<T, const CAPACITY: usize> SpscFifo<T, CAPACITY> {
    const NON_ZERO: () = assert!(CAPACITY > 0, "SpscFifo capacity must be non-zero");

    /// Creates an empty queue
    pub fn new() -> Self {
        let () = Self::NON_ZERO;
        Self {
            write_position: CachePadded::new(AtomicU64::new(0)),
            read_position: CachePadded::new(AtomicU64::new(0)),
            buffer: UninitializedArray::new(),
        }
    }

    /// Splits the queue into its producer and consumer handle
    pub fn split(&mut self) -> (SpscFifoProducer<'_, T, CAPACITY>, SpscFifoConsumer<'_, T, CAPACITY>) {
        let queue = &*self;
        (SpscFifoProducer { queue }, SpscFifoConsumer { queue })
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// The number of elements at the time of the call
    pub fn size(&self) -> usize {
        // read first: the write cursor loaded afterwards can never be behind it
        let read_position = self.read_position.load(ordering::A);
        let write_position = self.write_position.load(ordering::A);
        (write_position.wrapping_sub(read_position) as usize).min(CAPACITY)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Pushes an element, handing it back as `Err` if the queue is full
    ///
    /// A refused push leaves the queue unchanged.
    ///
    /// # Safety
    ///
    /// No other thread or process may call `push` on this queue concurrently.
    pub unsafe fn push(&self, value: T) -> Result<(), T> {
        let write_position = self.write_position.load(ordering::X);
        let read_position = self.read_position.load(ordering::A);

        if write_position == read_position.wrapping_add(CAPACITY as u64) {
            return Err(value);
        }

        self.buffer.write(Self::slot(write_position), value);
        self.write_position
            .store(write_position.wrapping_add(1), ordering::R);
        Ok(())
    }

    /// Pops the oldest element, or `None` if the queue is empty
    ///
    /// # Safety
    ///
    /// No other thread or process may call `pop` on this queue concurrently.
    pub unsafe fn pop(&self) -> Option<T> {
        let read_position = self.read_position.load(ordering::X);
        let write_position = self.write_position.load(ordering::A);

        if read_position == write_position {
            return None;
        }

        let value = self.buffer.take(Self::slot(read_position));
        self.read_position
            .store(read_position.wrapping_add(1), ordering::R);
        Some(value)
    }

    #[inline]
    fn slot(position: u64) -> usize {
        (position % CAPACITY as u64) as usize
    }
}

impl<T, const CAPACITY: usize> Default for SpscFifo<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> Drop for SpscFifo<T, CAPACITY> {
    fn drop(&mut self) {
        // Safety: exclusive access, so we are the only consumer.
        while let Some(value) = unsafe { self.pop() } {
            drop(value);
        }
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for SpscFifo<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpscFifo")
            .field("capacity", &CAPACITY)
            .field("size", &self.size())
            .finish()
    }
}

impl<T, const CAPACITY: usize> BoundedQueue for SpscFifo<T, CAPACITY> {
    fn capacity(&self) -> usize {
        CAPACITY
    }

    fn size(&self) -> usize {
        SpscFifo::size(self)
    }

    fn is_empty(&self) -> bool {
        SpscFifo::is_empty(self)
    }
}

/// The pushing half of a split [`SpscFifo`]
#[derive(Debug)]
pub struct SpscFifoProducer<'a, T, const CAPACITY: usize> {
    queue: &'a SpscFifo<T, CAPACITY>,
}

impl<T, const CAPACITY: usize> SpscFifoProducer<'_, T, CAPACITY> {
    /// Pushes an element, handing it back as `Err` if the queue is full
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        // Safety: this handle is the only producer and `&mut self` serialises its calls.
        unsafe { self.queue.push(value) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        CAPACITY
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

/// The popping half of a split [`SpscFifo`]
#[derive(Debug)]
pub struct SpscFifoConsumer<'a, T, const CAPACITY: usize> {
    queue: &'a SpscFifo<T, CAPACITY>,
}

impl<T, const CAPACITY: usize> SpscFifoConsumer<'_, T, CAPACITY> {
    /// Pops the oldest element, or `None` if the queue is empty
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // Safety: this handle is the only consumer and `&mut self` serialises its calls.
        unsafe { self.queue.pop() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        CAPACITY
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
