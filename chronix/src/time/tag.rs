//! Event tags.

use std::fmt;

use tai_time::MonotonicTime;

/// The ordering key of a scheduled event.
///
/// A tag is made of a timestamp, a microstep and a depth, compared in that
/// order. The timestamp is the model time at which the event is due. The
/// microstep distinguishes successive firing rounds at the same timestamp: a
/// component that requests another firing at the current timestamp is
/// re-fired at the next microstep rather than breaking the total order. The
/// depth is the topological priority of the destination and only decides the
/// firing order *within* a round.
///
/// Two tags denote the same firing round when their timestamp and microstep
/// are equal; the depth deliberately does not take part in that test.
//
// Implementation note: `Tag` derives `PartialOrd`/`Ord`, so the declaration
// order of the fields (time, then microstep, then depth) is what makes the
// lexicographic comparison match the event ordering and must be preserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag {
    /// Model time at which the event is due.
    pub time: MonotonicTime,
    /// Firing round counter within one timestamp.
    pub microstep: u64,
    /// Topological priority of the destination (0 = highest).
    pub depth: u64,
}

impl Tag {
    /// Creates a tag.
    pub const fn new(time: MonotonicTime, microstep: u64, depth: u64) -> Self {
        Self {
            time,
            microstep,
            depth,
        }
    }

    /// Returns `true` if both tags belong to the same firing round, i.e. if
    /// their timestamp and microstep are equal.
    pub fn same_round(&self, other: &Tag) -> bool {
        self.time == other.time && self.microstep == other.microstep
    }

    /// Returns a copy of this tag with the specified depth.
    pub(crate) fn with_depth(self, depth: u64) -> Self {
        Self { depth, ..self }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09}s (microstep {}, depth {})",
            self.time.as_secs(),
            self.time.subsec_nanos(),
            self.microstep,
            self.depth
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn tag_total_order() {
        let t0 = MonotonicTime::EPOCH;
        let t1 = t0 + Duration::from_secs(1);

        // Timestamp dominates microstep and depth.
        assert!(Tag::new(t0, 7, 9) < Tag::new(t1, 0, 0));
        // Microstep dominates depth.
        assert!(Tag::new(t0, 0, 9) < Tag::new(t0, 1, 0));
        // Depth breaks the remaining ties.
        assert!(Tag::new(t0, 1, 3) < Tag::new(t0, 1, 4));
        assert_eq!(Tag::new(t0, 1, 3), Tag::new(t0, 1, 3));
    }

    #[test]
    fn tag_simultaneity_ignores_depth() {
        let t0 = MonotonicTime::EPOCH;
        let t1 = t0 + Duration::from_millis(500);

        assert!(Tag::new(t0, 2, 0).same_round(&Tag::new(t0, 2, 42)));
        assert!(!Tag::new(t0, 2, 0).same_round(&Tag::new(t0, 3, 0)));
        assert!(!Tag::new(t0, 2, 0).same_round(&Tag::new(t1, 2, 0)));
    }
}
