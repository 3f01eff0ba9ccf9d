//! # lockfree_ipc_queue
//!
//! Lock-free bounded queues for exchanging data between threads and between
//! processes that map the same memory.
//!
//! All queues store their elements inline in a fixed buffer, never allocate
//! after construction and never block:
//!
//! - [`MpmcIndexQueue`]: MPMC FIFO of slot indices, the building block of the value queues
//! - [`MpmcLockFreeQueue`]: MPMC FIFO of arbitrary values, with an evicting `push`
//! - [`MpmcResizeableLockFreeQueue`]: the same with a capacity that can change at run time
//! - [`SpscFifo`]: SPSC FIFO that refuses pushes when full
//! - [`SpscSofi`]: SPSC FIFO that evicts its oldest element when full
//!
//! Enable the `tracing` feature to log capacity changes.

mod common;
mod utils;

pub mod cyclic_index;
pub mod error;
pub mod index_queue;
pub mod lockfree_queue;
pub mod resizeable_queue;
pub mod spsc_fifo;
pub mod spsc_sofi;
pub mod trace;

// Re-exports for convenience
pub use common::{BoundedQueue, LockFreeQueueOps};
pub use cyclic_index::{AtomicCyclicIndex, CyclicIndex};
pub use error::CapacityError;
pub use index_queue::MpmcIndexQueue;
pub use lockfree_queue::MpmcLockFreeQueue;
pub use resizeable_queue::MpmcResizeableLockFreeQueue;
pub use spsc_fifo::{SpscFifo, SpscFifoConsumer, SpscFifoProducer};
pub use spsc_sofi::{SpscSofi, SpscSofiConsumer, SpscSofiProducer};
pub use trace::init_tracing;
