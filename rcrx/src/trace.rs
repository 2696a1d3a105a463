//! Optional trace of recently received pulses.
//!
//! The trace feeds the offline [`analyzer`](crate::analyzer) and is handy to
//! eyeball what an unknown remote actually sends. Tracing is compiled out
//! when the receiver is instantiated with a trace capacity of zero.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::container::{Ring, RingIter};
use crate::core::{Pulse, PulseLevel};

/// One traced pulse together with the cost of the interrupt that stored it.
///
/// The level is packed into the top bit of the duration word, which keeps
/// the record at two words on memory tight targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TraceRecord {
    packed: u32,
    isr_cost_us: u32,
}

impl TraceRecord {
    const LEVEL_HIGH: u32 = 1 << 31;
    const DURATION_MASK: u32 = !Self::LEVEL_HIGH;

    pub(crate) const EMPTY: Self = Self {
        packed: 0,
        isr_cost_us: 0,
    };

    pub(crate) fn new(pulse: Pulse) -> Self {
        let mut packed = pulse.duration_us & Self::DURATION_MASK;
        if matches!(pulse.level, PulseLevel::High) {
            packed |= Self::LEVEL_HIGH;
        }
        Self {
            packed,
            isr_cost_us: 0,
        }
    }

    pub fn pulse(&self) -> Pulse {
        let level = if self.packed & Self::LEVEL_HIGH != 0 {
            PulseLevel::High
        } else {
            PulseLevel::Low
        };
        Pulse::new(self.packed & Self::DURATION_MASK, level)
    }

    /// Microseconds between the edge timestamp and the exit note of the
    /// interrupt that stored this record. Zero when the platform glue does
    /// not report interrupt exits.
    pub fn isr_cost_us(&self) -> u32 {
        self.isr_cost_us
    }
}

struct TraceBuf<const N: usize> {
    records: Ring<TraceRecord, N>,
    last_entry_us: u32,
}

/// Trace storage shared between the edge interrupt and the main loop.
///
/// The `frozen` flag replaces a lock: while it is set the interrupt skips
/// all trace writes (decoding continues), so the main loop can walk the
/// records without masking interrupts for the whole analysis.
pub(crate) struct TraceCell<const N: usize> {
    buf: UnsafeCell<TraceBuf<N>>,
    frozen: AtomicBool,
}

// Safety: the edge interrupt writes the buffer only while `frozen` is
// clear, and the main loop reads it only while `frozen` is set. The flag
// changes only in the main loop, and interrupt and main loop strictly
// serialize on a single core, so the two sides never overlap.
unsafe impl<const N: usize> Sync for TraceCell<N> {}

impl<const N: usize> TraceCell<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new(TraceBuf {
                records: Ring::new(TraceRecord::EMPTY),
                last_entry_us: 0,
            }),
            frozen: AtomicBool::new(false),
        }
    }

    /// Interrupt side. Stores a record unless the buffer is frozen.
    pub fn record(&self, pulse: Pulse, entry_us: u32) {
        if N == 0 || self.frozen.load(Ordering::Acquire) {
            return;
        }
        // Safety: see the Sync impl above.
        let buf = unsafe { &mut *self.buf.get() };
        buf.records.push(TraceRecord::new(pulse));
        buf.last_entry_us = entry_us;
    }

    /// Interrupt side. Back-fills the interrupt cost of the newest record.
    pub fn finalize(&self, exit_us: u32) {
        if N == 0 || self.frozen.load(Ordering::Acquire) {
            return;
        }
        // Safety: see the Sync impl above.
        let buf = unsafe { &mut *self.buf.get() };
        let len = buf.records.len();
        if len > 0 {
            buf.records.at_mut(len - 1).isr_cost_us = exit_us.wrapping_sub(buf.last_entry_us);
        }
    }

    /// Main loop side. Freezes trace writes while `f` inspects the records.
    pub fn frozen<R>(&self, f: impl FnOnce(TraceView<'_, N>) -> R) -> R {
        self.frozen.store(true, Ordering::Release);
        // Safety: see the Sync impl above.
        let records = unsafe { &(*self.buf.get()).records };
        let result = f(TraceView { records });
        self.frozen.store(false, Ordering::Release);
        result
    }
}

/// Read-only view of the trace ring, oldest record first.
pub struct TraceView<'a, const N: usize> {
    records: &'a Ring<TraceRecord, N>,
}

impl<'a, const N: usize> TraceView<'a, N> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> RingIter<'a, TraceRecord, N> {
        self.records.iter()
    }

    pub fn pulses(&self) -> impl Iterator<Item = Pulse> + Clone + 'a {
        self.records.iter().map(TraceRecord::pulse)
    }
}

impl<const N: usize> fmt::Display for TraceView<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, record) in self.records().enumerate() {
            let pulse = record.pulse();
            let level = match pulse.level {
                PulseLevel::High => "HIGH",
                PulseLevel::Low => " LOW",
                PulseLevel::Unknown => "  ??",
            };
            writeln!(
                f,
                "[{:3}] {} for {:6} us (isr {} us)",
                index,
                level,
                pulse.duration_us,
                record.isr_cost_us()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_packs_level_and_duration() {
        let record = TraceRecord::new(Pulse::new(10850, PulseLevel::High));
        assert_eq!(record.pulse(), Pulse::new(10850, PulseLevel::High));

        let record = TraceRecord::new(Pulse::new(350, PulseLevel::Low));
        assert_eq!(record.pulse(), Pulse::new(350, PulseLevel::Low));
    }

    #[test]
    fn test_finalize_fills_newest_cost() {
        let cell: TraceCell<4> = TraceCell::new();
        cell.record(Pulse::new(350, PulseLevel::High), 1000);
        cell.finalize(1012);

        cell.frozen(|view| {
            let record = view.records().next().unwrap();
            assert_eq!(record.isr_cost_us(), 12);
        });
    }

    #[test]
    fn test_frozen_blocks_recording() {
        let cell: TraceCell<4> = TraceCell::new();
        cell.record(Pulse::new(350, PulseLevel::High), 0);

        cell.frozen(|view| {
            cell.record(Pulse::new(700, PulseLevel::Low), 0);
            assert_eq!(view.len(), 1);
        });

        cell.record(Pulse::new(700, PulseLevel::Low), 0);
        cell.frozen(|view| assert_eq!(view.len(), 2));
    }

    #[test]
    fn test_zero_capacity_is_inert() {
        let cell: TraceCell<0> = TraceCell::new();
        cell.record(Pulse::new(350, PulseLevel::High), 0);
        cell.finalize(10);
        cell.frozen(|view| assert!(view.is_empty()));
    }
}
