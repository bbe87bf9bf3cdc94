//! Per-method profiling counters written by generated code.

use std::sync::atomic::{AtomicU32, Ordering};

/// Which counter of a bytecode offset an increment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Events the fast path detects itself: a genuine negative-zero product,
    /// a non-integer quotient.
    Special,
    /// Entries into the instruction's slow path.
    SlowCase,
}

/// Counters indexed by bytecode offset.
///
/// Allocated before code emission; generated code holds raw addresses into
/// the table, so it must outlive the code. Increments saturate at `u32::MAX`.
#[derive(Debug)]
pub struct ProfileTable {
    special: Box<[AtomicU32]>,
    slow_cases: Box<[AtomicU32]>,
}

impl ProfileTable {
    pub fn new(instruction_count: usize) -> Self {
        let alloc = || (0..instruction_count).map(|_| AtomicU32::new(0)).collect();
        Self {
            special: alloc(),
            slow_cases: alloc(),
        }
    }

    pub fn len(&self) -> usize {
        self.special.len()
    }

    pub fn is_empty(&self) -> bool {
        self.special.is_empty()
    }

    fn table(&self, kind: CounterKind) -> &[AtomicU32] {
        match kind {
            CounterKind::Special => &self.special,
            CounterKind::SlowCase => &self.slow_cases,
        }
    }

    pub fn count(&self, kind: CounterKind, offset: u32) -> u32 {
        self.table(kind)
            .get(offset as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Saturating increment, as performed by generated code.
    pub fn increment(&self, kind: CounterKind, offset: u32) {
        if let Some(counter) = self.table(kind).get(offset as usize) {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1));
        }
    }

    /// Address of a counter, embedded into native code.
    pub fn counter_address(&self, kind: CounterKind, offset: u32) -> Option<u64> {
        self.table(kind)
            .get(offset as usize)
            .map(|c| c.as_ptr() as u64)
    }

    /// Non-zero counters as `(offset, special, slow_case)`.
    pub fn snapshot(&self) -> Vec<(u32, u32, u32)> {
        (0..self.len() as u32)
            .map(|offset| {
                (
                    offset,
                    self.count(CounterKind::Special, offset),
                    self.count(CounterKind::SlowCase, offset),
                )
            })
            .filter(|&(_, special, slow)| special != 0 || slow != 0)
            .collect()
    }
}
