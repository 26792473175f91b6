//! Commit positions for deliveries that settle out of order.
//!
//! An endpoint dispatches several messages of one partition at once, and they
//! finish in any order. Kafka stores a single position per partition, so the
//! position may only move up to the lowest offset still in flight.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_received: i64,
    committed: i64,
}

/// In-flight offsets of one consumer, per topic partition.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    /// Record a message handed to the endpoint.
    pub(crate) fn received(&mut self, topic: &str, partition: i32, offset: i64) {
        let offsets = self.partitions.entry((topic.to_string(), partition)).or_default();
        offsets.in_flight.insert(offset);
        offsets.highest_received = offsets.highest_received.max(offset);
    }

    /// Record a settled message.
    ///
    /// Returns the next position to commit when it moved forward: the lowest
    /// offset still in flight, or one past the highest received.
    pub(crate) fn settled(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let offsets = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !offsets.in_flight.remove(&offset) {
            return None;
        }

        let position = offsets
            .in_flight
            .first()
            .copied()
            .unwrap_or(offsets.highest_received + 1);
        if position > offsets.committed {
            offsets.committed = position;
            Some(position)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_settlement_advances_one_by_one() {
        let mut tracker = OffsetTracker::default();
        tracker.received("grant-items", 0, 0);
        tracker.received("grant-items", 0, 1);

        assert_eq!(tracker.settled("grant-items", 0, 0), Some(1));
        assert_eq!(tracker.settled("grant-items", 0, 1), Some(2));
    }

    #[test]
    fn position_waits_for_a_message_still_retrying() {
        let mut tracker = OffsetTracker::default();
        for offset in 10..13 {
            tracker.received("grant-items", 0, offset);
        }

        // 10 is still being retried, so nothing may be committed past it
        assert_eq!(tracker.settled("grant-items", 0, 11), Some(10));
        assert_eq!(tracker.settled("grant-items", 0, 12), None);
        assert_eq!(tracker.settled("grant-items", 0, 10), Some(13));
    }

    #[test]
    fn partitions_are_tracked_independently() {
        let mut tracker = OffsetTracker::default();
        tracker.received("grant-items", 0, 5);
        tracker.received("grant-items", 1, 7);

        assert_eq!(tracker.settled("grant-items", 1, 7), Some(8));
        assert_eq!(tracker.settled("grant-items", 0, 5), Some(6));
    }

    #[test]
    fn unknown_or_repeated_settlement_is_ignored() {
        let mut tracker = OffsetTracker::default();
        assert_eq!(tracker.settled("grant-items", 0, 3), None);

        tracker.received("grant-items", 0, 3);
        assert_eq!(tracker.settled("grant-items", 0, 3), Some(4));
        assert_eq!(tracker.settled("grant-items", 0, 3), None);
    }
}
