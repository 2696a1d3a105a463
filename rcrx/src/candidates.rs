//! Protocol candidates collected from a synchronization pulse pair.

use crate::container::Stack;
use crate::core::{Pulse, PulseLevel, RxTimingSpec};

/// The maximum number of protocols a sync pair can put in flight at once.
///
/// A synchronization pulse pair can satisfy several protocol
/// specifications. All of them are collected and narrowed down while data
/// pulses arrive; whatever survives until the trailing sync can be queried
/// through the receiver API.
pub const MAX_PROTOCOL_CANDIDATES: usize = 7;

/// Which timing table half the current packet is decoded against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ProtocolGroup {
    Unknown,
    /// Sync A pulse is high.
    Normal,
    /// Sync A pulse is low.
    Inverse,
}

/// Indices into one level group of the timing table that are still
/// consistent with every pulse seen in the current packet.
pub(crate) struct CandidateSet {
    indices: Stack<u8, MAX_PROTOCOL_CANDIDATES>,
    group: ProtocolGroup,
}

impl CandidateSet {
    pub const fn new() -> Self {
        Self {
            indices: Stack::new(),
            group: ProtocolGroup::Unknown,
        }
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.group = ProtocolGroup::Unknown;
    }

    pub fn group(&self) -> ProtocolGroup {
        self.group
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn at(&self, index: usize) -> usize {
        usize::from(self.indices[index])
    }

    pub fn remove(&mut self, index: usize) {
        self.indices.remove(index);
    }

    /// Collects every protocol of the group selected by `a.level` whose
    /// sync windows accept the pair.
    ///
    /// Pairs with equal or unknown levels carry no group information and
    /// are ignored.
    pub fn collect(
        &mut self,
        normal: &[RxTimingSpec],
        inverse: &[RxTimingSpec],
        a: &Pulse,
        b: &Pulse,
    ) {
        if !a.level.is_known() || !b.level.is_known() || a.level == b.level {
            return;
        }

        let (group, specs) = match a.level {
            PulseLevel::High => (ProtocolGroup::Normal, normal),
            PulseLevel::Low => (ProtocolGroup::Inverse, inverse),
            PulseLevel::Unknown => unreachable!(),
        };
        self.group = group;

        for (index, spec) in specs.iter().enumerate() {
            // The group is sorted by the sync A lower bound, so no later
            // entry can accept a shorter pulse either.
            if a.duration_us < spec.sync.a.lower_us {
                break;
            }
            if spec.sync.b.contains(b.duration_us) {
                self.indices.push(index as u8);
            }
        }
    }
}
