//! Common functionality for the queues
//!
//! This module provides the memory-ordering shorthands and the traits that let
//! callers treat the different queue flavours as interchangeable backends.

/// Memory ordering constants for atomic operations
///
/// Short aliases keep the ordering of each load/store/CAS readable in the
/// dense cursor code.
pub mod ordering {
    pub use std::sync::atomic::Ordering::Acquire as A;
    pub use std::sync::atomic::Ordering::Release as R;
    pub use std::sync::atomic::Ordering::Relaxed as X;
    pub use std::sync::atomic::Ordering::AcqRel as AR;
}

/// Observers every bounded queue provides
///
/// All results are snapshots: under concurrent push/pop they may be stale the
/// instant they are returned, but they always satisfy `size() <= capacity()`.
pub trait BoundedQueue {
    /// The number of elements the queue can currently hold
    fn capacity(&self) -> usize;

    /// The number of elements in the queue at the time of the call
    fn size(&self) -> usize;

    /// Whether the queue held no element at the time of the call
    fn is_empty(&self) -> bool;
}

/// Operations shared by the multi-producer/multi-consumer queues
///
/// Any number of threads (or processes mapping the same memory) may call any
/// of these concurrently.
pub trait LockFreeQueueOps<T>: BoundedQueue {
    /// Attempts to push an element to the queue
    ///
    /// Returns the element back as `Err` if the queue was full; the queue is
    /// left unchanged in that case.
    fn try_push(&self, value: T) -> Result<(), T>;

    /// Pushes an element, evicting the oldest one if the queue is full
    ///
    /// Returns the evicted element, if any.
    fn push(&self, value: T) -> Option<T>;

    /// Pops the oldest element, or `None` if the queue was empty
    fn pop(&self) -> Option<T>;
}
