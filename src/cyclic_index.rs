//! Generation-tagged slot index
//!
//! A [`CyclicIndex`] is a slot number in `0..CYCLE_LENGTH` paired with a cycle
//! (generation) counter, packed into a single `u64` as
//! `cycle * CYCLE_LENGTH + index`. Incrementing past the last slot advances the
//! cycle, so two observations of the same slot taken in different rounds
//! compare unequal. Because the pair is one machine word, a single CAS covers
//! both halves; this is what keeps the index queue free of the ABA problem.
//!
//! When the packed value overflows `u64::MAX` the sequence continues at
//! `(OVERFLOW_START_INDEX, cycle 0)`, which keeps the slot sequence contiguous
//! even when `CYCLE_LENGTH` does not divide `2^64`.

use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

/// A slot index tagged with the cycle it was produced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CyclicIndex<const CYCLE_LENGTH: usize> {
    value: u64,
}

impl<const CYCLE_LENGTH: usize> CyclicIndex<CYCLE_LENGTH> {
    const LENGTH: u64 = {
        assert!(CYCLE_LENGTH > 0, "cycle length must be non-zero");
        CYCLE_LENGTH as u64
    };

    /// The largest slot number
    pub const MAX_INDEX: u64 = Self::LENGTH - 1;
    /// The largest packed value before wraparound
    pub const MAX_VALUE: u64 = u64::MAX;
    /// The cycle of [`Self::MAX_VALUE`]
    pub const MAX_CYCLE: u64 = Self::MAX_VALUE / Self::LENGTH;
    /// The slot number of [`Self::MAX_VALUE`]
    pub const INDEX_AT_MAX_VALUE: u64 = Self::MAX_VALUE % Self::LENGTH;
    /// The slot number the sequence continues with after wraparound (in cycle 0)
    pub const OVERFLOW_START_INDEX: u64 = (Self::INDEX_AT_MAX_VALUE + 1) % Self::LENGTH;

    /// Creates an index from its packed representation
    #[inline]
    pub const fn from_value(value: u64) -> Self {
        Self { value }
    }

    /// Creates an index from a slot number and a cycle
    #[inline]
    pub const fn new(index: u64, cycle: u64) -> Self {
        Self::from_value(cycle.wrapping_mul(Self::LENGTH).wrapping_add(index))
    }

    /// The slot number in `0..CYCLE_LENGTH`
    #[inline]
    pub const fn index(self) -> u64 {
        self.value % Self::LENGTH
    }

    /// The generation counter
    #[inline]
    pub const fn cycle(self) -> u64 {
        self.value / Self::LENGTH
    }

    /// The packed representation
    #[inline]
    pub const fn value(self) -> u64 {
        self.value
    }

    /// The following index, advancing the cycle after the last slot
    #[inline]
    pub const fn next(self) -> Self {
        if self.value == Self::MAX_VALUE {
            return Self::new(Self::OVERFLOW_START_INDEX, 0);
        }
        Self::from_value(self.value + 1)
    }

    /// Whether `self` lies in the cycle directly before the one of `other`
    ///
    /// The last cycle before overflow counts as one behind cycle 0.
    #[inline]
    pub const fn is_one_cycle_behind(self, other: Self) -> bool {
        let this_cycle = self.cycle();
        let other_cycle = other.cycle();

        if this_cycle == Self::MAX_CYCLE {
            return other_cycle == 0;
        }
        this_cycle + 1 == other_cycle
    }
}

impl<const CYCLE_LENGTH: usize> Add<u64> for CyclicIndex<CYCLE_LENGTH> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        // the largest value that can be advanced by rhs without overflow
        let headroom = Self::MAX_VALUE - rhs;
        if headroom < self.value {
            return Self::from_value(Self::OVERFLOW_START_INDEX + (self.value - headroom - 1));
        }
        Self::from_value(self.value + rhs)
    }
}

impl<const CYCLE_LENGTH: usize> Sub for CyclicIndex<CYCLE_LENGTH> {
    type Output = i64;

    /// Signed distance between two positions; negative if `rhs` is ahead.
    #[inline]
    fn sub(self, rhs: Self) -> i64 {
        self.value.wrapping_sub(rhs.value) as i64
    }
}

/// A [`CyclicIndex`] stored in a single atomic word
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicCyclicIndex<const CYCLE_LENGTH: usize> {
    value: AtomicU64,
}

impl<const CYCLE_LENGTH: usize> AtomicCyclicIndex<CYCLE_LENGTH> {
    #[inline]
    pub const fn new(index: CyclicIndex<CYCLE_LENGTH>) -> Self {
        Self {
            value: AtomicU64::new(index.value()),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> CyclicIndex<CYCLE_LENGTH> {
        CyclicIndex::from_value(self.value.load(order))
    }

    #[inline]
    pub fn store(&self, index: CyclicIndex<CYCLE_LENGTH>, order: Ordering) {
        self.value.store(index.value(), order);
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: CyclicIndex<CYCLE_LENGTH>,
        new: CyclicIndex<CYCLE_LENGTH>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CyclicIndex<CYCLE_LENGTH>, CyclicIndex<CYCLE_LENGTH>> {
        self.value
            .compare_exchange(current.value(), new.value(), success, failure)
            .map(CyclicIndex::from_value)
            .map_err(CyclicIndex::from_value)
    }

    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: CyclicIndex<CYCLE_LENGTH>,
        new: CyclicIndex<CYCLE_LENGTH>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CyclicIndex<CYCLE_LENGTH>, CyclicIndex<CYCLE_LENGTH>> {
        self.value
            .compare_exchange_weak(current.value(), new.value(), success, failure)
            .map(CyclicIndex::from_value)
            .map_err(CyclicIndex::from_value)
    }
}
