//! Automatic node-ID allocation.
//!
//! The node snoops on every inbound transfer to keep a Bloom filter of
//! occupied node-IDs. When the first heartbeat falls due without a
//! node-ID, one is picked from the filter's clear bits. An anonymous
//! node also delays its heartbeat a little every time a new neighbor
//! appears (CSMA/CD style), which de-synchronizes simultaneously
//! booting nodes before they claim anything.

use crate::platform::{Clock, Random, Transport};
use crate::time::Duration;

impl<T, R, C> crate::node::Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Record an observed neighbor node-ID.
    ///
    /// A high population count means the filter is mostly tombstones
    /// (nodes that left cannot be removed individually), so it is purged
    /// wholesale and rebuilt from live traffic.
    pub(crate) fn mark_neighbor(&mut self, remote_node_id: u16) {
        if self.bloom.popcount() > self.bloom.n_bits() * 31 / 32 {
            trace!(
                "bloom congested at popcount {}, purging tombstones",
                self.bloom.popcount()
            );
            self.bloom.purge();
        }
        if self.node_id.is_none() && !self.bloom.get(remote_node_id as usize) {
            // New neighbor while we are still anonymous: back off to
            // reduce the chance of simultaneous claims.
            let backoff = self.random_range(0, Duration::from_secs(2).as_micros());
            self.heartbeat_next += Duration::from_micros(backoff);
            trace!("discovered neighbor {}, deferring first heartbeat", remote_node_id);
        }
        self.bloom.set(remote_node_id as usize);
    }

    /// Pick a node-ID from the clear bits of the Bloom filter and mark
    /// it taken. Always returns a valid ID: if the filter is saturated
    /// (more nodes online than filter capacity), a uniformly random ID
    /// is returned instead. Constant time regardless of occupancy.
    pub(crate) fn pick_node_id(&mut self) -> u16 {
        let node_id_max = self.transport.node_id_max() as usize;
        let n_bits = self.bloom.n_bits();

        // Hierarchical: find a word with a clear bit, then a clear bit
        // within it. This trades some randomness for bounded time.
        let num_words = node_id_max.min(n_bits).div_ceil(64);
        let mut word_index = self.random_range(0, num_words as u64) as usize;
        for _ in 0..num_words {
            if self.bloom.word(word_index) != u64::MAX {
                break;
            }
            word_index = (word_index + 1) % num_words;
        }
        let word = self.bloom.word(word_index);
        if word == u64::MAX {
            // Saturated; any pick would alias an occupied entry anyway.
            return self.random_range(0, node_id_max as u64 + 1) as u16;
        }

        let mut bit_index = self.random_range(0, 64) as usize;
        while word & (1u64 << bit_index) != 0 {
            bit_index = (bit_index + 1) % 64; // a clear bit exists, see above
        }

        // The filter maps every multiple of its period to the same bit,
        // so spreading the pick by a random multiple costs nothing in
        // filter accuracy and widens the effective ID range.
        let mut candidate = word_index * 64 + bit_index;
        let spread = node_id_max / n_bits;
        if spread > 0 {
            candidate += self.random_range(0, spread as u64 + 1) as usize * n_bits;
        }
        while candidate > node_id_max && candidate >= n_bits {
            candidate -= n_bits;
        }
        if candidate > node_id_max {
            // No multiple of the period fits below the cap.
            return self.random_range(0, node_id_max as u64 + 1) as u16;
        }
        self.bloom.set(candidate);
        candidate as u16
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::node::tests::make_node;
    use crate::time::Timestamp;
    use crate::types::{OwnedTransfer, Priority, TransferMetadata};

    fn transfer_from(remote_node_id: u16) -> OwnedTransfer {
        OwnedTransfer {
            timestamp: Timestamp::ZERO,
            metadata: TransferMetadata {
                priority: Priority::Nominal,
                remote_node_id,
                transfer_id: 0,
            },
            payload: std::vec::Vec::new(),
        }
    }

    #[test]
    fn test_pick_avoids_observed_neighbors() {
        let (mut node, _clock) = make_node(Config::new(1));
        let topic = node.heartbeat_topic();
        for id in 0..100u16 {
            node.ingest_topic_transfer(topic, transfer_from(id));
        }
        // 128-bit filter with bits 0..100 set; every pick must land on a
        // clear bit pattern (bit index 100..127 modulo 128).
        for _ in 0..20 {
            let picked = node.pick_node_id();
            assert!((100..128).contains(&(picked as usize % 128)), "{}", picked);
            assert!(picked <= node.transport().node_id_max);
            // Undo the claim so subsequent picks see the same occupancy.
            node.bloom.purge();
            for id in 0..100u16 {
                node.bloom.set(id as usize);
            }
        }
    }

    #[test]
    fn test_pick_marks_filter() {
        let (mut node, _clock) = make_node(Config::new(1));
        let picked = node.pick_node_id();
        assert!(node.node_id_bloom().get(picked as usize));
        assert_eq!(node.node_id_bloom().popcount(), 1);
    }

    #[test]
    fn test_pick_saturated_filter_falls_back_to_random() {
        let (mut node, _clock) = make_node(Config::new(1));
        for i in 0..node.bloom.n_bits() {
            node.bloom.set(i);
        }
        let picked = node.pick_node_id();
        assert!(picked <= node.transport().node_id_max);
        // The filter is unchanged: nothing left to mark.
        assert_eq!(node.node_id_bloom().popcount(), node.bloom.n_bits());
    }

    #[test]
    fn test_pick_respects_node_id_max_on_can() {
        let clock = crate::platform::test_impls::MockClock::new();
        let mut node = crate::node::Node::new(
            crate::platform::test_impls::MockTransport::can_like(),
            crate::platform::test_impls::MockRandom::with_seed(7),
            clock,
            Config::new(7),
        )
        .unwrap();
        for i in 0..200 {
            let picked = node.pick_node_id();
            assert!(picked <= 127, "pick {} out of range at iter {}", picked, i);
            node.bloom.purge();
        }
    }

    #[test]
    fn test_anonymous_backoff_on_new_neighbor() {
        let (mut node, _clock) = make_node(Config::new(1));
        let topic = node.heartbeat_topic();
        let deadline_before = node.next_heartbeat_at();
        node.ingest_topic_transfer(topic, transfer_from(55));
        let deferred = node.next_heartbeat_at();
        assert!(deferred >= deadline_before);
        assert!(deferred - deadline_before < crate::time::Duration::from_secs(2));

        // A known neighbor does not defer again.
        node.ingest_topic_transfer(topic, transfer_from(55));
        assert_eq!(node.next_heartbeat_at(), deferred);
    }

    #[test]
    fn test_holder_of_node_id_never_backs_off() {
        let (mut node, _clock) = make_node(Config::new(1).with_node_id(3));
        let topic = node.heartbeat_topic();
        let deadline_before = node.next_heartbeat_at();
        node.ingest_topic_transfer(topic, transfer_from(55));
        assert_eq!(node.next_heartbeat_at(), deadline_before);
    }

    #[test]
    fn test_congestion_purge() {
        let (mut node, _clock) = make_node(Config::new(1).with_node_id(3));
        let topic = node.heartbeat_topic();
        let n_bits = node.node_id_bloom().n_bits();
        let threshold = n_bits * 31 / 32;

        // Saturate past the purge threshold with distinct neighbor IDs.
        let mut id = 0u16;
        while node.node_id_bloom().popcount() <= threshold {
            node.ingest_topic_transfer(topic, transfer_from(id));
            id += 1;
        }
        // The next observation purges the tombstones first.
        node.ingest_topic_transfer(topic, transfer_from(9999));
        assert_eq!(node.node_id_bloom().popcount(), 1);
        assert!(node.node_id_bloom().get(9999));
        node.check_invariants();
    }
}
