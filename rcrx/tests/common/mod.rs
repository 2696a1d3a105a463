//! Edge stream synthesis: drives a receiver the way a real transmitter
//! followed by an edge interrupt would.
#![allow(dead_code)] // not every test crate uses every helper

use embassy_sync::blocking_mutex::raw::RawMutex;
use rcrx::Receiver;

/// Transmit timing of one protocol, in microseconds.
#[derive(Debug, Copy, Clone)]
pub struct TxTiming {
    pub sync_a: u32,
    pub sync_b: u32,
    pub data0: (u32, u32),
    pub data1: (u32, u32),
    pub inverse_level: bool,
}

/// Protocol 1 nominal pulses: clock 350, sync 1/31, data0 1/3, data1 3/1.
pub const PROTOCOL_1: TxTiming = TxTiming {
    sync_a: 350,
    sync_b: 10850,
    data0: (350, 1050),
    data1: (1050, 350),
    inverse_level: false,
};

/// Feeds a receiver edge by edge with a monotonically advancing, freely
/// wrapping microsecond clock.
pub struct Transmitter<'r, 'a, M: RawMutex, const N: usize> {
    receiver: &'r Receiver<'a, M, N>,
    t_us: u32,
}

impl<'r, 'a, M: RawMutex, const N: usize> Transmitter<'r, 'a, M, N> {
    pub fn new(receiver: &'r Receiver<'a, M, N>) -> Self {
        Self { receiver, t_us: 0 }
    }

    pub fn starting_at(receiver: &'r Receiver<'a, M, N>, t_us: u32) -> Self {
        Self { receiver, t_us }
    }

    /// One edge, `after_us` after the previous one. `pin_high` is the level
    /// the pin has after the edge.
    pub fn edge(&mut self, pin_high: bool, after_us: u32) {
        self.t_us = self.t_us.wrapping_add(after_us);
        self.receiver.on_edge(pin_high, self.t_us);
    }

    /// One A/B pulse pair with explicit durations.
    ///
    /// For a normal level protocol the A pulse is high, so it ends with a
    /// falling edge; inverse level protocols mirror both edges.
    pub fn pair(&mut self, timing: &TxTiming, a_us: u32, b_us: u32) {
        self.edge(timing.inverse_level, a_us);
        self.edge(!timing.inverse_level, b_us);
    }

    pub fn sync(&mut self, timing: &TxTiming) {
        self.pair(timing, timing.sync_a, timing.sync_b);
    }

    /// One data bit, with the pulse durations scaled by percentages for
    /// fault injection (100 means nominal).
    pub fn bit_scaled(&mut self, timing: &TxTiming, bit: bool, a_pct: u32, b_pct: u32) {
        let (a_us, b_us) = if bit { timing.data1 } else { timing.data0 };
        self.pair(timing, a_us * a_pct / 100, b_us * b_pct / 100);
    }

    pub fn bit(&mut self, timing: &TxTiming, bit: bool) {
        self.bit_scaled(timing, bit, 100, 100);
    }

    /// `count` data bits of `value`, first transmitted bit taken from the
    /// most significant position.
    pub fn bits(&mut self, timing: &TxTiming, value: u32, count: usize) {
        for shift in (0..count).rev() {
            self.bit(timing, value >> shift & 1 != 0);
        }
    }

    /// A complete packet; the terminating sync belongs to the *next*
    /// repetition, so follow up with at least a [`sync`](Self::sync).
    pub fn packet(&mut self, timing: &TxTiming, value: u32, count: usize) {
        self.sync(timing);
        self.bits(timing, value, count);
    }
}
