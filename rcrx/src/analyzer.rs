//! Offline analysis of traced pulses.
//!
//! The analyzer clusters the pulse trace of an unknown transmitter and, when
//! the trace looks like a supported protocol, proposes the protocol
//! definition row to add to the timing table. It runs in the main loop on a
//! frozen trace; decoding continues while it works.

use core::fmt;

use crate::container::Stack;
use crate::core::{ProtocolDef, Pulse, PulseLevel};

/// Sync B must be at least this much longer than sync A.
pub const SYNC_RATIO_MIN: u32 = 8;

/// The long pulse of a data pair must be at least this much longer than the
/// short one, in percent.
pub const DATA_RATIO_MIN_PCT: u32 = 150;

/// A supported protocol produces at most six pulse shapes: sync A and B,
/// and the A and B pulses of the two data symbols.
const SYNC_CATEGORY_COUNT: usize = 2;
const DATA_CATEGORY_COUNT: usize = 4;
const ALL_CATEGORY_COUNT: usize = SYNC_CATEGORY_COUNT + DATA_CATEGORY_COUNT;

/// A cluster of traced pulses with matching level and similar duration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PulseCategory {
    pub level: PulseLevel,
    pub mean_us: u32,
    pub min_us: u32,
    pub max_us: u32,
    pub count: u32,
}

impl PulseCategory {
    fn seed(pulse: &Pulse) -> Self {
        Self {
            level: pulse.level,
            mean_us: pulse.duration_us,
            min_us: pulse.duration_us,
            max_us: pulse.duration_us,
            count: 1,
        }
    }

    fn fold(&mut self, pulse: &Pulse) {
        let n = u64::from(self.count);
        self.mean_us =
            ((n * u64::from(self.mean_us) + u64::from(pulse.duration_us)) / (n + 1)) as u32;
        self.min_us = self.min_us.min(pulse.duration_us);
        self.max_us = self.max_us.max(pulse.duration_us);
        self.count += 1;
    }

    fn accepts(&self, pulse: &Pulse, tolerance_pct: u32) -> bool {
        self.level == pulse.level
            && within_tolerance(self.mean_us, pulse.duration_us, tolerance_pct)
    }

    /// Worst deviation of the cluster from its mean, in percent.
    pub fn spread_pct(&self) -> u32 {
        if self.mean_us == 0 {
            return 0;
        }
        let above = self.max_us - self.mean_us;
        let below = self.mean_us - self.min_us;
        above.max(below) * 100 / self.mean_us
    }
}

impl fmt::Display for PulseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            PulseLevel::High => "HIGH",
            PulseLevel::Low => " LOW",
            PulseLevel::Unknown => "  ??",
        };
        write!(
            f,
            "{} for {:6} us (+-{}%, {} pulses)",
            level,
            self.mean_us,
            self.spread_pct(),
            self.count
        )
    }
}

/// Why an analysis run could not propose a spec.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalyzeError {
    /// The trace holds no pulses.
    NoPulses,
    /// More distinct pulse shapes than any supported protocol produces.
    PulseShapeOverflow { dropped: u32 },
    /// No cluster is long enough against the shortest one to be a sync B.
    NoDominantSyncPulse,
    /// Re-clustering did not find exactly one sync A and one sync B shape.
    SyncShapeCount { found: usize },
    /// Both sync shapes sit on the same line level.
    SyncLevelsEqual,
    /// The sync pair ratio is below [`SYNC_RATIO_MIN`].
    SyncRatio,
    /// Re-clustering did not find exactly four data shapes.
    DataShapeCount { found: usize },
    /// The data shapes do not split into two per line level.
    DataLevelSplit,
    /// A data pair ratio is below [`DATA_RATIO_MIN_PCT`].
    DataPairRatio,
    /// The chosen clock is too coarse; a multiplier rounded to zero.
    ClockTooCoarse,
}

impl fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzeError::NoPulses => write!(f, "no pulses traced"),
            AnalyzeError::PulseShapeOverflow { dropped } => write!(
                f,
                "more than {ALL_CATEGORY_COUNT} pulse shapes ({dropped} pulses not classified)"
            ),
            AnalyzeError::NoDominantSyncPulse => {
                write!(f, "no pulse shape is {SYNC_RATIO_MIN}x longer than the shortest one")
            }
            AnalyzeError::SyncShapeCount { found } => {
                write!(f, "expected {SYNC_CATEGORY_COUNT} sync pulse shapes, found {found}")
            }
            AnalyzeError::SyncLevelsEqual => {
                write!(f, "sync pulse shapes do not alternate line levels")
            }
            AnalyzeError::SyncRatio => {
                write!(f, "sync pulse pair ratio is below {SYNC_RATIO_MIN}")
            }
            AnalyzeError::DataShapeCount { found } => {
                write!(f, "expected {DATA_CATEGORY_COUNT} data pulse shapes, found {found}")
            }
            AnalyzeError::DataLevelSplit => {
                write!(f, "data pulse shapes do not split into two per line level")
            }
            AnalyzeError::DataPairRatio => write!(
                f,
                "data pulse pair ratio is below {}.{}",
                DATA_RATIO_MIN_PCT / 100,
                DATA_RATIO_MIN_PCT % 100 / 10
            ),
            AnalyzeError::ClockTooCoarse => {
                write!(f, "clock is too coarse, a multiplier rounded to zero")
            }
        }
    }
}

/// A proposed protocol definition, together with the clusters it was
/// derived from.
///
/// Displays as a [`ProtocolDef`] literal row (with `#` in place of the
/// protocol id) followed by one summary line per cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedSpec {
    pub clock_us: u32,
    pub tolerance_pct: u32,
    pub sync_a: u32,
    pub sync_b: u32,
    pub data0_a: u32,
    pub data0_b: u32,
    pub data1_a: u32,
    pub data1_b: u32,
    pub inverse_level: bool,
    /// All identified clusters, shortest first.
    pub categories: heapless::Vec<PulseCategory, ALL_CATEGORY_COUNT>,
}

impl ProposedSpec {
    /// The proposal as a protocol definition under the given id.
    pub fn to_def(&self, protocol_id: u16) -> ProtocolDef {
        ProtocolDef::new(
            protocol_id,
            self.clock_us,
            self.tolerance_pct,
            self.sync_a,
            self.sync_b,
            self.data0_a,
            self.data0_b,
            self.data1_a,
            self.data1_b,
            self.inverse_level,
        )
    }
}

impl fmt::Display for ProposedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "(#, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            self.clock_us,
            self.tolerance_pct,
            self.sync_a,
            self.sync_b,
            self.data0_a,
            self.data0_b,
            self.data1_a,
            self.data1_b,
            self.inverse_level,
        )?;
        for category in &self.categories {
            writeln!(f, "{category}")?;
        }
        Ok(())
    }
}

/// Proposes a timing spec from a trace of pulses.
///
/// `clock_us` is the base clock the multipliers are expressed in (10 us is
/// a reasonable default when nothing about the transmitter is known);
/// `tolerance_pct` is the clustering tolerance.
///
/// The trace should span several packet repetitions so that every pulse
/// shape occurs repeatedly.
pub fn analyze<I>(
    pulses: I,
    tolerance_pct: u32,
    clock_us: u32,
) -> Result<ProposedSpec, AnalyzeError>
where
    I: Iterator<Item = Pulse> + Clone,
{
    let pulses = pulses.filter(|pulse| pulse.level.is_known());

    // First pass: cluster every pulse by level and duration.
    let mut all: Stack<PulseCategory, ALL_CATEGORY_COUNT> = Stack::new();
    for pulse in pulses.clone() {
        put_in_category(&mut all, &pulse, tolerance_pct);
    }
    if all.is_empty() {
        return Err(AnalyzeError::NoPulses);
    }
    if all.overflow_count() > 0 {
        return Err(AnalyzeError::PulseShapeOverflow {
            dropped: all.overflow_count(),
        });
    }
    all.sort_unstable_by_key(|category| category.mean_us);

    // The longest cluster is the only plausible sync B.
    let shortest_us = all[0].mean_us;
    let sync_b_us = all[all.len() - 1].mean_us;
    if u64::from(sync_b_us) < u64::from(SYNC_RATIO_MIN) * u64::from(shortest_us) {
        return Err(AnalyzeError::NoDominantSyncPulse);
    }

    // Second pass: a pulse near the sync B duration is a sync B and its
    // predecessor is the sync A; everything else is a data pulse. The last
    // pulse of the trace has no successor to tell a cut-off sync A from a
    // data pulse, so it only counts when it is a sync B itself.
    let mut sync: Stack<PulseCategory, SYNC_CATEGORY_COUNT> = Stack::new();
    let mut data: Stack<PulseCategory, DATA_CATEGORY_COUNT> = Stack::new();
    let mut iter = pulses.peekable();
    while let Some(pulse) = iter.next() {
        let is_sync_b = within_tolerance(sync_b_us, pulse.duration_us, tolerance_pct);
        let next_is_sync_b = iter
            .peek()
            .is_some_and(|next| within_tolerance(sync_b_us, next.duration_us, tolerance_pct));
        if is_sync_b || next_is_sync_b {
            put_in_category(&mut sync, &pulse, tolerance_pct);
        } else if iter.peek().is_some() {
            put_in_category(&mut data, &pulse, tolerance_pct);
        }
    }

    // Validation.
    let sync_found = sync.len() + sync.overflow_count() as usize;
    if sync_found != SYNC_CATEGORY_COUNT {
        return Err(AnalyzeError::SyncShapeCount { found: sync_found });
    }
    sync.sort_unstable_by_key(|category| category.mean_us);
    let (sync_a, sync_b) = (sync[0], sync[1]);
    if sync_a.level == sync_b.level {
        return Err(AnalyzeError::SyncLevelsEqual);
    }
    if u64::from(sync_b.mean_us) < u64::from(SYNC_RATIO_MIN) * u64::from(sync_a.mean_us) {
        return Err(AnalyzeError::SyncRatio);
    }

    let data_found = data.len() + data.overflow_count() as usize;
    if data_found != DATA_CATEGORY_COUNT {
        return Err(AnalyzeError::DataShapeCount { found: data_found });
    }
    data.sort_unstable_by_key(|category| (level_rank(category.level), category.mean_us));
    let low_shapes = data
        .iter()
        .filter(|category| category.level == PulseLevel::Low)
        .count();
    if low_shapes != DATA_CATEGORY_COUNT / 2 {
        return Err(AnalyzeError::DataLevelSplit);
    }

    // Sorted by (level, duration): [low short, low long, high short,
    // high long]. Data 0 is short-then-long, data 1 is long-then-short;
    // inverse protocols start their pairs on the low level.
    let inverse_level = sync_a.level == PulseLevel::Low;
    let (d0a, d0b, d1a, d1b) = if inverse_level {
        (data[0], data[3], data[1], data[2])
    } else {
        (data[2], data[1], data[3], data[0])
    };

    if u64::from(d0b.mean_us) * 100 < u64::from(DATA_RATIO_MIN_PCT) * u64::from(d0a.mean_us)
        || u64::from(d1a.mean_us) * 100 < u64::from(DATA_RATIO_MIN_PCT) * u64::from(d1b.mean_us)
    {
        return Err(AnalyzeError::DataPairRatio);
    }

    if clock_us == 0 {
        return Err(AnalyzeError::ClockTooCoarse);
    }
    let multiplier = |mean_us: u32| (mean_us + clock_us / 2) / clock_us;
    let proposal = ProposedSpec {
        clock_us,
        tolerance_pct,
        sync_a: multiplier(sync_a.mean_us),
        sync_b: multiplier(sync_b.mean_us),
        data0_a: multiplier(d0a.mean_us),
        data0_b: multiplier(d0b.mean_us),
        data1_a: multiplier(d1a.mean_us),
        data1_b: multiplier(d1b.mean_us),
        inverse_level,
        categories: unwrap!(heapless::Vec::from_slice(&all)),
    };
    if proposal.sync_a == 0
        || proposal.data0_a == 0
        || proposal.data0_b == 0
        || proposal.data1_a == 0
        || proposal.data1_b == 0
    {
        return Err(AnalyzeError::ClockTooCoarse);
    }

    debug!("analysis proposed a spec with clock {} us", clock_us);
    Ok(proposal)
}

fn put_in_category<const N: usize>(
    categories: &mut Stack<PulseCategory, N>,
    pulse: &Pulse,
    tolerance_pct: u32,
) {
    match categories
        .iter_mut()
        .find(|category| category.accepts(pulse, tolerance_pct))
    {
        Some(category) => category.fold(pulse),
        None => {
            let _ = categories.push(PulseCategory::seed(pulse));
        }
    }
}

fn within_tolerance(nominal_us: u32, duration_us: u32, tolerance_pct: u32) -> bool {
    let nominal = u64::from(nominal_us);
    let delta = nominal * u64::from(tolerance_pct) / 100;
    let duration = u64::from(duration_us);
    duration >= nominal.saturating_sub(delta) && duration <= nominal + delta
}

fn level_rank(level: PulseLevel) -> u8 {
    match level {
        PulseLevel::Unknown => 0,
        PulseLevel::Low => 1,
        PulseLevel::High => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE_CAPACITY: usize = 96;

    struct Synth {
        pulses: [Pulse; TRACE_CAPACITY],
        len: usize,
        level: PulseLevel,
        jitter: i32,
    }

    impl Synth {
        fn new(first_level: PulseLevel, jitter_pct: i32) -> Self {
            Self {
                pulses: [Pulse::default(); TRACE_CAPACITY],
                len: 0,
                level: first_level,
                jitter: jitter_pct,
            }
        }

        fn pulse(&mut self, duration_us: u32) {
            // Alternate a small deterministic jitter around the nominal
            // duration; packets have an odd pair count, so every pulse
            // shape sees both signs and cluster means stay near nominal.
            let sign = if (self.len / 2) % 2 == 0 { 1 } else { -1 };
            let duration =
                (duration_us as i32 + duration_us as i32 * self.jitter * sign / 100) as u32;
            self.pulses[self.len] = Pulse::new(duration, self.level);
            self.len += 1;
            self.level = self.level.opposite();
        }

        fn packet(&mut self, sync: (u32, u32), d0: (u32, u32), d1: (u32, u32), bits: u32) {
            self.pulse(sync.0);
            self.pulse(sync.1);
            for shift in (0..8).rev() {
                let (a, b) = if bits >> shift & 1 == 0 { d0 } else { d1 };
                self.pulse(a);
                self.pulse(b);
            }
        }

        fn iter(&self) -> impl Iterator<Item = Pulse> + Clone + '_ {
            self.pulses[..self.len].iter().copied()
        }
    }

    #[test]
    fn test_recovers_normal_protocol_multipliers() {
        // Protocol 1: clock 350, sync 1/31, data0 1/3, data1 3/1.
        let mut synth = Synth::new(PulseLevel::High, 3);
        for _ in 0..4 {
            synth.packet((350, 10850), (350, 1050), (1050, 350), 0b0100_1101);
        }

        let proposal = analyze(synth.iter(), 20, 350).unwrap();
        assert!(!proposal.inverse_level);
        assert_eq!(proposal.sync_a, 1);
        assert_eq!(proposal.sync_b, 31);
        assert_eq!(proposal.data0_a, 1);
        assert_eq!(proposal.data0_b, 3);
        assert_eq!(proposal.data1_a, 3);
        assert_eq!(proposal.data1_b, 1);
        assert_eq!(proposal.to_def(1).clock_us, 350);
    }

    #[test]
    fn test_recovers_inverse_protocol() {
        // Protocol 6 (HT6P20B): clock 450, sync 1/23, data0 1/2, data1 2/1,
        // inverse.
        let mut synth = Synth::new(PulseLevel::Low, 2);
        for _ in 0..4 {
            synth.packet((450, 10350), (450, 900), (900, 450), 0b1010_0110);
        }

        let proposal = analyze(synth.iter(), 20, 450).unwrap();
        assert!(proposal.inverse_level);
        assert_eq!(proposal.sync_a, 1);
        assert_eq!(proposal.sync_b, 23);
        assert_eq!(proposal.data0_a, 1);
        assert_eq!(proposal.data0_b, 2);
        assert_eq!(proposal.data1_a, 2);
        assert_eq!(proposal.data1_b, 1);
    }

    #[test]
    fn test_noise_yields_diagnostic_not_proposal() {
        // No dominant long pulse anywhere.
        let mut synth = Synth::new(PulseLevel::High, 0);
        for step in 0..20u32 {
            synth.pulse(300 + 100 * (step % 4));
        }

        assert_eq!(
            analyze(synth.iter(), 20, 10),
            Err(AnalyzeError::NoDominantSyncPulse)
        );
    }

    #[test]
    fn test_empty_trace() {
        assert_eq!(
            analyze(core::iter::empty(), 20, 10),
            Err(AnalyzeError::NoPulses)
        );
    }

    #[test]
    fn test_single_bit_value_lacks_data_shapes() {
        // All-zero payload produces only two data shapes.
        let mut synth = Synth::new(PulseLevel::High, 0);
        for _ in 0..3 {
            synth.packet((350, 10850), (350, 1050), (1050, 350), 0);
        }

        assert_eq!(
            analyze(synth.iter(), 20, 350),
            Err(AnalyzeError::DataShapeCount { found: 2 })
        );
    }
}
