//! Lock-free queue of slot indices
//!
//! [`MpmcIndexQueue`] circulates a fixed set of index tokens in `0..CAPACITY`.
//! It never invents or drops a token; it only hands out the ones pushed into
//! it, in FIFO order. The value queues use two of these as a lock-free slot
//! allocator: one holding free slots and one holding slots with published
//! values.
//!
//! Every cell holds a [`CyclicIndex`] whose slot part is the stored token and
//! whose cycle part records the round of the cursor that wrote it. A cell is
//! free for the writer at position `p` when its cycle is one behind `p`, and
//! readable for the reader at position `p` when its cycle equals `p`'s. The
//! cursors themselves are cyclic indices over the same cycle length, so stale
//! cursors and stale cells are detected by comparing cycles.

use std::fmt;

use crossbeam_utils::{Backoff, CachePadded};

use crate::common::ordering;
use crate::cyclic_index::{AtomicCyclicIndex, CyclicIndex};

type Index<const CAPACITY: usize> = CyclicIndex<CAPACITY>;

/// A lock-free multi-producer/multi-consumer FIFO of index tokens
///
/// The caller must never push more distinct tokens than `CAPACITY`; this is
/// guaranteed by construction in the value queues and is not checked here.
#[repr(C)]
pub struct MpmcIndexQueue<const CAPACITY: usize> {
    read_position: CachePadded<AtomicCyclicIndex<CAPACITY>>,
    write_position: CachePadded<AtomicCyclicIndex<CAPACITY>>,
    cells: [AtomicCyclicIndex<CAPACITY>; CAPACITY],
}

impl<const CAPACITY: usize> MpmcIndexQueue<CAPACITY> {
    /// Creates an empty queue
    pub fn new_empty() -> Self {
        // cells in cycle 0, cursors in cycle 1: every cell is one cycle behind
        let start = Index::<CAPACITY>::new(0, 1);
        Self {
            read_position: CachePadded::new(AtomicCyclicIndex::new(start)),
            write_position: CachePadded::new(AtomicCyclicIndex::new(start)),
            cells: std::array::from_fn(|_| AtomicCyclicIndex::new(Index::new(0, 0))),
        }
    }

    /// Creates a queue holding every token `0..CAPACITY` in increasing order
    pub fn new_full() -> Self {
        Self {
            read_position: CachePadded::new(AtomicCyclicIndex::new(Index::new(0, 0))),
            write_position: CachePadded::new(AtomicCyclicIndex::new(Index::new(0, 1))),
            cells: std::array::from_fn(|i| AtomicCyclicIndex::new(Index::new(i as u64, 0))),
        }
    }

    /// The number of tokens the queue can hold
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Appends `index` to the queue
    ///
    /// Always succeeds as long as no more than `CAPACITY` distinct tokens are
    /// in circulation.
    pub fn push(&self, index: usize) {
        let backoff = Backoff::new();
        let mut write_position = self.write_position.load(ordering::A);

        loop {
            let old_value = self.load_cell(write_position);

            if old_value.is_one_cycle_behind(write_position) {
                let new_value = Index::new(index as u64, write_position.cycle());
                let published = self.cells[write_position.index() as usize]
                    .compare_exchange_weak(old_value, new_value, ordering::AR, ordering::X)
                    .is_ok();
                if published {
                    break;
                }
            }

            if old_value.cycle() == write_position.cycle() {
                // another push published here but has not moved the cursor yet; help it
                write_position = match self.write_position.compare_exchange(
                    write_position,
                    write_position.next(),
                    ordering::AR,
                    ordering::A,
                ) {
                    Ok(_) => write_position.next(),
                    Err(current) => current,
                };
            } else {
                write_position = self.write_position.load(ordering::A);
            }

            backoff.spin();
        }

        // failure only means someone already helped
        let _ = self.write_position.compare_exchange(
            write_position,
            write_position.next(),
            ordering::AR,
            ordering::X,
        );
    }

    /// Removes and returns the oldest token, or `None` if the queue was empty
    pub fn pop(&self) -> Option<usize> {
        let backoff = Backoff::new();
        let mut read_position = self.read_position.load(ordering::A);

        loop {
            let value = self.load_cell(read_position);

            if value.cycle() == read_position.cycle() {
                match self.read_position.compare_exchange_weak(
                    read_position,
                    read_position.next(),
                    ordering::AR,
                    ordering::A,
                ) {
                    Ok(_) => return Some(value.index() as usize),
                    Err(current) => read_position = current,
                }
            } else {
                if value.is_one_cycle_behind(read_position) {
                    return None;
                }
                // the cursor is stale, pushes and pops happened concurrently
                read_position = self.read_position.load(ordering::A);
            }

            backoff.spin();
        }
    }

    /// Pops the oldest token only if the queue held exactly `CAPACITY` tokens
    ///
    /// Does not retry: if a concurrent pop made the queue non-full the call
    /// returns `None` and the caller decides whether to try again.
    pub fn pop_if_full(&self) -> Option<usize> {
        let write_position = self.write_position.load(ordering::A);
        let read_position = self.read_position.load(ordering::A);
        let value = self.load_cell(read_position);

        let is_full = write_position.index() == read_position.index()
            && read_position.is_one_cycle_behind(write_position);

        if is_full {
            return self.claim(read_position, value);
        }
        None
    }

    /// Pops the oldest token only if at least `min_size` tokens were present
    ///
    /// `min_size == 0` behaves like [`pop`](Self::pop).
    pub fn pop_if_size_is_at_least(&self, min_size: usize) -> Option<usize> {
        if min_size == 0 {
            return self.pop();
        }

        let write_position = self.write_position.load(ordering::A);
        let read_position = self.read_position.load(ordering::A);

        // negative if the read cursor overtook the loaded write cursor in between
        let delta = write_position - read_position;
        if delta < 0 {
            return None;
        }

        if delta as u64 >= min_size as u64 {
            let value = self.load_cell(read_position);
            return self.claim(read_position, value);
        }
        None
    }

    /// Whether the queue was empty at the time of the call
    pub fn is_empty(&self) -> bool {
        let read_position = self.read_position.load(ordering::A);
        let value = self.load_cell(read_position);
        value.is_one_cycle_behind(read_position)
    }

    /// Single attempt to move the read cursor past `read_position`
    #[inline]
    fn claim(&self, read_position: Index<CAPACITY>, value: Index<CAPACITY>) -> Option<usize> {
        if value.cycle() != read_position.cycle() {
            return None;
        }
        self.read_position
            .compare_exchange(read_position, read_position.next(), ordering::AR, ordering::X)
            .ok()
            .map(|_| value.index() as usize)
    }

    #[inline]
    fn load_cell(&self, position: Index<CAPACITY>) -> Index<CAPACITY> {
        self.cells[position.index() as usize].load(ordering::A)
    }
}

impl<const CAPACITY: usize> Default for MpmcIndexQueue<CAPACITY> {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl<const CAPACITY: usize> fmt::Debug for MpmcIndexQueue<CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcIndexQueue")
            .field("capacity", &CAPACITY)
            .field("read_position", &self.read_position.load(ordering::X))
            .field("write_position", &self.write_position.load(ordering::X))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_constructed_empty() {
        let q = MpmcIndexQueue::<10>::new_empty();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 10);
        assert_eq!(q.pop(), None);
        assert_eq!(MpmcIndexQueue::<3>::default().pop(), None);
    }

    #[test]
    fn test_full_queue_yields_all_indices_in_order() {
        let q = MpmcIndexQueue::<10>::new_full();
        assert!(!q.is_empty());

        for expected in 0..10 {
            assert_eq!(q.pop(), Some(expected));
        }
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_then_pop_single_index() {
        let q = MpmcIndexQueue::<4>::new_empty();
        q.push(3);
        assert!(!q.is_empty());
        assert_eq!(q.pop(), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn test_fifo_order_over_many_rounds() {
        let q = MpmcIndexQueue::<5>::new_empty();
        for round in 0..20 {
            for i in 0..5 {
                q.push((i + round) % 5);
            }
            for i in 0..5 {
                assert_eq!(q.pop(), Some((i + round) % 5));
            }
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_pop_if_full() {
        let q = MpmcIndexQueue::<3>::new_empty();
        assert_eq!(q.pop_if_full(), None);

        q.push(2);
        q.push(0);
        assert_eq!(q.pop_if_full(), None);

        q.push(1);
        assert_eq!(q.pop_if_full(), Some(2));
        assert_eq!(q.pop_if_full(), None);
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
    }

    #[test]
    fn test_pop_if_full_on_constructed_full_queue() {
        let q = MpmcIndexQueue::<4>::new_full();
        assert_eq!(q.pop_if_full(), Some(0));
    }

    #[test]
    fn test_pop_if_size_is_at_least() {
        let q = MpmcIndexQueue::<4>::new_empty();
        assert_eq!(q.pop_if_size_is_at_least(0), None);
        assert_eq!(q.pop_if_size_is_at_least(1), None);

        q.push(1);
        assert_eq!(q.pop_if_size_is_at_least(2), None);
        assert_eq!(q.pop_if_size_is_at_least(1), Some(1));

        q.push(2);
        assert_eq!(q.pop_if_size_is_at_least(0), Some(2));

        let full = MpmcIndexQueue::<4>::new_full();
        assert_eq!(full.pop_if_size_is_at_least(4), Some(0));
        assert_eq!(full.pop_if_size_is_at_least(4), None);
        assert_eq!(full.pop_if_size_is_at_least(3), Some(1));
    }

    #[test]
    fn test_tokens_are_conserved_under_contention() {
        const CAPACITY: usize = 16;
        const THREADS: usize = 4;
        const ROUNDS: usize = 20_000;

        let free = Arc::new(MpmcIndexQueue::<CAPACITY>::new_full());
        let used = Arc::new(MpmcIndexQueue::<CAPACITY>::new_empty());

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let free = Arc::clone(&free);
                let used = Arc::clone(&used);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        if let Some(index) = free.pop() {
                            used.push(index);
                        }
                        if let Some(index) = used.pop() {
                            free.push(index);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = [0usize; CAPACITY];
        while let Some(index) = free.pop() {
            seen[index] += 1;
        }
        while let Some(index) = used.pop() {
            seen[index] += 1;
        }
        assert!(seen.iter().all(|&count| count == 1), "tokens lost or duplicated: {seen:?}");
    }
}
