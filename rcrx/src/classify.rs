//! Interrupt-time classification of one complete pulse pair.

use crate::core::{Pulse, RangeCheck, RxTimingSpec, TimeRange};

/// What a pulse pair means for one protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairClass {
    /// The pair is a synchronization pair; a new packet repetition starts.
    Sync,
    Data0,
    Data1,
    NotMatched,
}

/// Classifies the consecutive pulses `a` and `b` against `spec`.
///
/// The ranges of one protocol need not be disjoint, so a pulse can hold
/// several roles at once. Sync wins over data: a sync pair in the middle of
/// a data stream means the transmitter started the next repetition.
///
/// The sync A check tolerates overlong pulses. The first pulse of a packet
/// follows the idle gap to the previous transmission, so its measured
/// duration includes that gap.
pub fn classify_pair(spec: &RxTimingSpec, a: &Pulse, b: &Pulse) -> PairClass {
    if sync_a_matches(&spec.sync.a, a.duration_us) && spec.sync.b.contains(b.duration_us) {
        return PairClass::Sync;
    }
    if spec.data0.a.contains(a.duration_us) && spec.data0.b.contains(b.duration_us) {
        return PairClass::Data0;
    }
    if spec.data1.a.contains(a.duration_us) && spec.data1.b.contains(b.duration_us) {
        return PairClass::Data1;
    }
    PairClass::NotMatched
}

/// Sync A acceptance: within the window, or longer.
fn sync_a_matches(range: &TimeRange, duration_us: u32) -> bool {
    !matches!(range.check(duration_us), RangeCheck::TooShort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProtocolDef, PulseLevel};

    // (id, clock, %, syncA, syncB, d0A, d0B, d1A, d1B, inverse)
    const SPEC: RxTimingSpec =
        RxTimingSpec::from_def(&ProtocolDef::new(1, 350, 20, 1, 31, 1, 3, 3, 1, false));

    fn hi(duration_us: u32) -> Pulse {
        Pulse::new(duration_us, PulseLevel::High)
    }

    fn lo(duration_us: u32) -> Pulse {
        Pulse::new(duration_us, PulseLevel::Low)
    }

    #[test]
    fn test_nominal_pairs() {
        assert_eq!(classify_pair(&SPEC, &hi(350), &lo(10850)), PairClass::Sync);
        assert_eq!(classify_pair(&SPEC, &hi(350), &lo(1050)), PairClass::Data0);
        assert_eq!(classify_pair(&SPEC, &hi(1050), &lo(350)), PairClass::Data1);
        assert_eq!(classify_pair(&SPEC, &hi(2000), &lo(2000)), PairClass::NotMatched);
    }

    #[test]
    fn test_overlong_sync_a_is_accepted() {
        // 10x the upper bound; the leading pulse absorbs the inter-packet gap.
        assert_eq!(classify_pair(&SPEC, &hi(4200), &lo(10850)), PairClass::Sync);
    }

    #[test]
    fn test_range_boundaries() {
        // Sync B window is 8680..13020, half-open.
        assert_eq!(classify_pair(&SPEC, &hi(350), &lo(8680)), PairClass::Sync);
        assert_eq!(classify_pair(&SPEC, &hi(350), &lo(13020)), PairClass::NotMatched);
        assert_eq!(classify_pair(&SPEC, &hi(350), &lo(8679)), PairClass::NotMatched);
    }

    #[test]
    fn test_sync_wins_over_data() {
        // For a protocol whose data1 A range overlaps its sync A range the
        // sync interpretation of an ambiguous pair must win.
        let spec =
            RxTimingSpec::from_def(&ProtocolDef::new(5, 500, 20, 6, 14, 1, 2, 2, 1, false));
        // 3000 us fits both sync A (2400..3600) and nothing else; 7000 us
        // fits sync B (5600..8400).
        assert_eq!(classify_pair(&spec, &hi(3000), &lo(7000)), PairClass::Sync);
    }
}
