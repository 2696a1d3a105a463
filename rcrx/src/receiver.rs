//! The interrupt driven receiver state machine.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::analyzer::{self, AnalyzeError, ProposedSpec};
use crate::candidates::{CandidateSet, ProtocolGroup};
use crate::classify::{classify_pair, PairClass};
use crate::container::Ring;
use crate::core::{is_sorted_table, split_level_groups, DataBit, Pulse, PulseLevel, RxTimingSpec};
use crate::packet::{MessagePacket, MIN_PACKET_BITS};
use crate::trace::{TraceCell, TraceView};

/// Every supported protocol encodes one symbol as an A/B pulse pair.
const PULSES_PER_BIT: u8 = 2;

/// Decoder state shared between the edge interrupt and the main loop.
///
/// The receiver holds the last two received pulses and re-evaluates them on
/// every edge. A valid synchronization pair takes it from sync search into
/// the data phase, where complete pulse pairs become data bits. The sync
/// pair of the *next* repetition terminates the packet: its bits and the
/// surviving protocol candidates stay readable until the application calls
/// [`Receiver::reset_available`].
struct Decoder<'a> {
    normal: &'a [RxTimingSpec],
    inverse: &'a [RxTimingSpec],
    pulses: Ring<Pulse, 2>,
    candidates: CandidateSet,
    packet: MessagePacket,
    data_pulse_count: u8,
    last_edge_us: u32,
}

impl<'a> Decoder<'a> {
    const fn new() -> Self {
        Self {
            normal: &[],
            inverse: &[],
            pulses: Ring::new(Pulse::new(0, PulseLevel::Unknown)),
            candidates: CandidateSet::new(),
            packet: MessagePacket::new(),
            data_pulse_count: 0,
            last_edge_us: 0,
        }
    }

    fn install(&mut self, table: &'a [RxTimingSpec]) {
        let (normal, inverse) = split_level_groups(table);
        self.normal = normal;
        self.inverse = inverse;
        self.reset();
    }

    fn reset(&mut self) {
        self.candidates.clear();
        self.packet.clear();
        self.pulses.clear();
        self.data_pulse_count = 0;
    }

    /// One decoder step per edge. Returns true when a completed packet is
    /// ready for publication.
    fn on_edge<const N: usize>(
        &mut self,
        pin_high: bool,
        t_us: u32,
        suspended: bool,
        available: bool,
        trace: &TraceCell<N>,
    ) -> bool {
        // Wrapping difference; only durations matter, not absolute time.
        let duration_us = t_us.wrapping_sub(self.last_edge_us);
        self.last_edge_us = t_us;

        // The level during the elapsed interval is the one the edge ended.
        let pulse = Pulse::new(duration_us, PulseLevel::from_pin_level(pin_high).opposite());
        trace.record(pulse, t_us);

        if suspended {
            return false;
        }
        self.pulses.push(pulse);
        if available {
            // A packet is held for the application; skip decoding.
            return false;
        }

        if self.candidates.is_empty() {
            // Sync search.
            if self.pulses.len() == 2 {
                let (a, b) = (*self.pulses.at(0), *self.pulses.at(1));
                self.candidates.collect(self.normal, self.inverse, &a, &b);
            }
            return false;
        }

        // Data phase: wait for a complete A/B pair.
        self.data_pulse_count += 1;
        if self.data_pulse_count < PULSES_PER_BIT {
            return false;
        }
        self.data_pulse_count = 0;

        let (a, b) = (*self.pulses.at(0), *self.pulses.at(1));
        match self.classify_candidates(&a, &b) {
            PairClass::Sync => {
                if self.packet.len() >= MIN_PACKET_BITS {
                    return true;
                }
                // Too few bits in front of this sync; it may open a packet
                // of a different protocol though.
                self.resync(&a, &b);
                false
            }
            PairClass::Data0 => {
                self.packet.push(DataBit::Zero);
                false
            }
            PairClass::Data1 => {
                self.packet.push(DataBit::One);
                false
            }
            PairClass::NotMatched => {
                self.resync(&a, &b);
                false
            }
        }
    }

    /// Classifies the pair against every live candidate, newest first.
    ///
    /// Any candidate recognizing a sync pair ends the packet. Otherwise the
    /// first data classification wins and every candidate that matched
    /// nothing is dropped.
    fn classify_candidates(&mut self, a: &Pulse, b: &Pulse) -> PairClass {
        let specs = match self.candidates.group() {
            ProtocolGroup::Normal => self.normal,
            ProtocolGroup::Inverse => self.inverse,
            ProtocolGroup::Unknown => return PairClass::NotMatched,
        };

        let mut result = PairClass::NotMatched;
        let mut index = self.candidates.len();
        while index > 0 {
            index -= 1;
            let spec = &specs[self.candidates.at(index)];
            match classify_pair(spec, a, b) {
                PairClass::Sync => return PairClass::Sync,
                PairClass::NotMatched => self.candidates.remove(index),
                data => {
                    if result == PairClass::NotMatched {
                        result = data;
                    }
                }
            }
        }
        result
    }

    /// Starts over with the offending pair: it may be the sync pair of a
    /// different protocol.
    fn resync(&mut self, a: &Pulse, b: &Pulse) {
        self.candidates.clear();
        self.candidates.collect(self.normal, self.inverse, a, b);
        self.packet.clear();
        self.pulses.clear();
    }

    fn protocol_id(&self, candidate_index: usize) -> Option<u16> {
        if candidate_index >= self.candidates.len() {
            return None;
        }
        let specs = match self.candidates.group() {
            ProtocolGroup::Normal => self.normal,
            ProtocolGroup::Inverse => self.inverse,
            ProtocolGroup::Unknown => return None,
        };
        Some(specs[self.candidates.at(candidate_index)].protocol_id)
    }
}

/// Remote control receiver fed by a pin change interrupt.
///
/// One receiver serves one input pin. The application owns the receiver
/// (usually in a `static`) and registers a platform trampoline that reads
/// the pin and the microsecond clock and forwards both to
/// [`on_edge`](Self::on_edge). Everything else is polled from the main
/// loop.
///
/// `TRACE_CAPACITY` selects how many recent pulses are kept for the
/// offline [`analyzer`](crate::analyzer); zero compiles the trace away.
///
/// The decoder state lives behind a blocking mutex chosen through `M`. With
/// `CriticalSectionRawMutex` the main loop accessors mask interrupts for a
/// few bounded loads per call; the interrupt side pays one critical section
/// per edge.
pub struct Receiver<'a, M: RawMutex, const TRACE_CAPACITY: usize = 0> {
    decoder: Mutex<M, RefCell<Decoder<'a>>>,
    trace: TraceCell<TRACE_CAPACITY>,
    available: AtomicBool,
    suspended: AtomicBool,
}

impl<'a, M: RawMutex, const TRACE_CAPACITY: usize> Receiver<'a, M, TRACE_CAPACITY> {
    /// Creates a quiescent receiver with no timing table bound.
    pub const fn new() -> Self {
        Self {
            decoder: Mutex::new(RefCell::new(Decoder::new())),
            trace: TraceCell::new(),
            available: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        }
    }

    /// Binds the timing table and arms the receiver.
    ///
    /// The table must be sorted as produced by
    /// [`rx_timing_table`](crate::core::rx_timing_table); the interrupt
    /// time candidate scan relies on that order.
    pub fn install(&self, table: &'a [RxTimingSpec]) {
        debug_assert!(is_sorted_table(table));
        self.decoder.lock(|decoder| decoder.borrow_mut().install(table));
        self.available.store(false, Ordering::Release);
        debug!("timing table with {} protocols installed", table.len());
    }

    /// Edge callback, to be invoked from the pin change interrupt.
    ///
    /// `pin_high` is the pin level *after* the edge, `t_us` the microsecond
    /// timestamp of the edge. The counter may wrap freely.
    pub fn on_edge(&self, pin_high: bool, t_us: u32) {
        let suspended = self.suspended.load(Ordering::Acquire);
        let available = self.available.load(Ordering::Acquire);

        let publish = self.decoder.lock(|decoder| {
            decoder
                .borrow_mut()
                .on_edge(pin_high, t_us, suspended, available, &self.trace)
        });

        if publish {
            // Last write for this packet. Pairs with the Acquire load in
            // `available`, making packet and candidates visible to the
            // main loop.
            self.available.store(true, Ordering::Release);
        }
    }

    /// Optional second interrupt hook: records how long the interrupt took,
    /// for the cost column of the pulse trace.
    ///
    /// ```ignore
    /// let t = micros();
    /// RECEIVER.on_edge(read_pin(), t);
    /// RECEIVER.note_isr_exit(micros());
    /// ```
    pub fn note_isr_exit(&self, t_exit_us: u32) {
        self.trace.finalize(t_exit_us);
    }

    /// True when a completed packet is held for the application.
    pub fn available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// The received value, with the first received bit in the most
    /// significant position. Zero while no packet is held.
    pub fn received_value(&self) -> u32 {
        if !self.available() {
            return 0;
        }
        self.decoder.lock(|decoder| decoder.borrow().packet.value())
    }

    /// Number of received data bits, including bits beyond
    /// [`MAX_PACKET_BITS`](crate::MAX_PACKET_BITS) that could not be
    /// stored. Zero while no packet is held.
    pub fn received_bits_count(&self) -> usize {
        if !self.available() {
            return 0;
        }
        self.decoder
            .lock(|decoder| decoder.borrow().packet.bits_received())
    }

    /// Number of protocols whose sync and data windows all matched the
    /// held packet. Zero while no packet is held.
    pub fn received_protocol_count(&self) -> usize {
        if !self.available() {
            return 0;
        }
        self.decoder
            .lock(|decoder| decoder.borrow().candidates.len())
    }

    /// Protocol id of the matching protocol at `index`, or None for an out
    /// of range index or while no packet is held.
    pub fn received_protocol(&self, index: usize) -> Option<u16> {
        if !self.available() {
            return None;
        }
        self.decoder
            .lock(|decoder| decoder.borrow().protocol_id(index))
    }

    /// Drops the held packet and returns to sync search.
    pub fn reset_available(&self) {
        self.decoder.lock(|decoder| decoder.borrow_mut().reset());
        // Cleared last, so the interrupt only resumes decoding once the
        // state it works on is fresh.
        self.available.store(false, Ordering::Release);
        trace!("receiver reset");
    }

    /// Stops decoding; edges only refresh the timestamp bookkeeping.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
        debug!("receiver suspended");
    }

    /// Resumes decoding from a clean sync search.
    pub fn resume(&self) {
        if self.suspended.load(Ordering::Acquire) {
            self.decoder.lock(|decoder| decoder.borrow_mut().reset());
            self.available.store(false, Ordering::Release);
            self.suspended.store(false, Ordering::Release);
            debug!("receiver resumed");
        }
    }

    /// Hands `f` a read-only view of the recent pulse trace.
    ///
    /// Trace writes are skipped while `f` runs; decoding continues and
    /// interrupts stay unmasked.
    pub fn with_trace<R>(&self, f: impl FnOnce(TraceView<'_, TRACE_CAPACITY>) -> R) -> R {
        self.trace.frozen(f)
    }

    /// Proposes a timing spec for an unknown transmitter from the traced
    /// pulses. See [`analyzer::analyze`].
    pub fn analyze(
        &self,
        tolerance_pct: u32,
        clock_us: u32,
    ) -> Result<ProposedSpec, AnalyzeError> {
        self.with_trace(|view| analyzer::analyze(view.pulses(), tolerance_pct, clock_us))
    }
}

impl<'a, M: RawMutex, const TRACE_CAPACITY: usize> Default for Receiver<'a, M, TRACE_CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
