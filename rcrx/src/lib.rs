//! # Rcrx
//!
//! This library decodes 433/315 MHz remote control packets from the edge
//! stream of a digital input pin in no_std environments. The RF front end
//! chip does the demodulation; the library gets one interrupt per edge with
//! nothing but a microsecond timestamp and the new pin level, and turns that
//! into message packets. It requires no dynamic memory allocation.
//!
//! The decoder runs entirely in interrupt context with bounded work per
//! edge, keeping all critical section durations short.
//!
//! ## Architecture
//!
//! ```text
//!  edge ISR                                 main loop
//! ┌──────────────┐                         ┌──────────────────┐
//! │ trampoline   │                         │ poll / configure │
//! └──────┬───────┘                         └───┬──────────────┘
//!        ▼                                     ▼
//! ┌─────────────────────────────┐   ┌─────────────────────┐
//! │ Receiver                    │◄──┤ available (atomic)  │
//! │ ┌─────────┐ ┌─────────────┐ │   └─────────────────────┘
//! │ │ 2-pulse │ │ candidate   │ │
//! │ │ ring    │ │ set         │ │   ┌─────────────────────┐
//! │ └─────────┘ └─────────────┘ │◄──┤ timing table        │
//! │ ┌─────────┐ ┌─────────────┐ │   │ (sorted, immutable) │
//! │ │ message │ │ pulse trace │ │   └─────────────────────┘
//! │ │ packet  │ │ (optional)  │ │
//! │ └─────────┘ └──────┬──────┘ │
//! └────────────────────┼────────┘
//!                      ▼
//!               ┌────────────┐
//!               │ analyzer   │ (on demand, main loop)
//!               └────────────┘
//! ```
//!
//! Components:
//! * The _timing table_ is a sorted, immutable array of [`RxTimingSpec`]
//!   acceptance windows, expanded at compile time from human readable
//!   [`ProtocolDef`] rows (`rcrx_core::defaults` ships the stock remotes).
//! * The _receiver_ consumes edges, recognizes protocols by their
//!   synchronization signature, narrows the candidate set while data pulses
//!   arrive and publishes a completed packet behind an atomic flag.
//! * The _pulse trace_ optionally keeps the most recent pulses so the
//!   _analyzer_ can propose a timing spec for an unknown transmitter.
//!
//! ## Concurrency model
//!
//! Two contexts share a receiver: the edge interrupt and the cooperative
//! main loop. The decoder state sits behind an
//! `embassy_sync::blocking_mutex::Mutex`; with `CriticalSectionRawMutex`
//! every main loop accessor masks interrupts for a few loads, and the
//! interrupt pays one critical section per edge. The `available` and
//! `suspended` flags are single-writer atomics with release/acquire
//! ordering: observing `available == true` guarantees the packet and its
//! candidate set are fully visible. The pulse trace is not under the mutex
//! at all; the analyzer freezes trace writes with a flag while it reads, so
//! analysis never masks interrupts and decoding continues meanwhile.
//!
//! ## Usage
//!
//! ```no_run
//! # use critical_section as _;
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use rcrx::core::defaults;
//! use rcrx::receiver::Receiver;
//!
//! static RECEIVER: Receiver<CriticalSectionRawMutex> = Receiver::new();
//!
//! // Platform glue, e.g. a pin change interrupt handler:
//! fn on_pin_change() {
//!     RECEIVER.on_edge(read_pin(), micros());
//! }
//!
//! fn main() {
//!     RECEIVER.install(&defaults::TABLE);
//!     loop {
//!         if RECEIVER.available() {
//!             let _value = RECEIVER.received_value();
//!             let _protocol = RECEIVER.received_protocol(0);
//!             RECEIVER.reset_available();
//!         }
//!     }
//! }
//! # fn read_pin() -> bool { false }
//! # fn micros() -> u32 { 0 }
//! ```
//!
//! ## Limitations
//!
//! * Receive only; the symmetric transmit encoder is not implemented.
//! * Only protocols whose bit cells are exactly two pulses are supported.
//! * Pin I/O, the microsecond clock and interrupt registration are the
//!   platform glue's concern; the library never touches hardware.
#![no_std]

pub use rcrx_core as core;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod analyzer;
mod candidates;
pub mod classify;
pub mod container;
mod packet;
pub mod receiver;
pub mod trace;

pub use candidates::MAX_PROTOCOL_CANDIDATES;
pub use packet::{MAX_PACKET_BITS, MIN_PACKET_BITS};
pub use receiver::Receiver;

#[doc(no_inline)]
pub use rcrx_core::{ProtocolDef, RxTimingSpec};
