//! Subject-ID allocation and local arbitration.
//!
//! Places every local topic in a subject-ID slot such that no two local
//! topics share one, while matching the network-wide CRDT outcome.
//! Local arbitration uses the same rules as the networked merge, so a
//! freshly created topic can displace an existing lower-ranked one and
//! trigger a chain of moves; the chain terminates because each recursive
//! step moves a strictly lower-ranked topic.

use crate::platform::{Clock, Random, Transport};
use crate::time::Timestamp;
use crate::topic::{left_wins, subject_id_for};
use crate::types::{TopicId, TOPIC_SUBJECT_COUNT};

impl<T, R, C> crate::node::Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Move a topic to the slot implied by `new_evictions`, arbitrating
    /// against current tenants and displacing them when we outrank them.
    /// `virgin` marks a topic that is not yet in the subject-ID index.
    ///
    /// All affected topics are scheduled for immediate gossip, including
    /// this one; a caller that does not want that can restore the gossip
    /// time afterwards.
    ///
    /// Worst case O(N log N) in the local topic count; amortized
    /// O(log N) because the hash spreads topics sparsely.
    pub(crate) fn allocate_topic(&mut self, id: TopicId, new_evictions: u64, virgin: bool) {
        debug_assert!(self.topics.len() <= TOPIC_SUBJECT_COUNT as usize);
        let (hash, old_subject_id, was_subscribed) = {
            let topic = self.topic_ref(id);
            (
                topic.hash(),
                topic.subject_id(self.preferred_subject_id),
                topic.subscribed,
            )
        };
        trace!(
            "allocating #{:016x} @{} evict {}->{}",
            hash,
            old_subject_id,
            self.topic_ref(id).evictions(),
            new_evictions
        );

        // No underlying resources may sit on the topic while its
        // subject-ID changes.
        if was_subscribed {
            self.transport.topic_unsubscribe(old_subject_id);
            self.topic_mut(id).subscribed = false;
        }

        // The eviction counter must not change while the topic is in the
        // subject-ID index, so take it out first.
        if !virgin {
            let removed = self.topics_by_subject_id.remove(&old_subject_id);
            debug_assert_eq!(removed, Some(id));
        }
        self.topic_mut(id).evictions = new_evictions;

        // Find a free slot, arbitrating against every current tenant.
        // The new count may map back to the same subject-ID; that needs
        // no special case.
        loop {
            let subject_id = subject_id_for(
                hash,
                self.topic_ref(id).evictions,
                self.preferred_subject_id,
            );
            match self.topics_by_subject_id.get(&subject_id).copied() {
                None => {
                    self.topics_by_subject_id.insert(subject_id, id);
                    break;
                }
                Some(other) => {
                    debug_assert_ne!(other, id);
                    let (other_hash, other_age, other_evictions) = {
                        let o = self.topic_ref(other);
                        (o.hash(), o.age(), o.evictions())
                    };
                    // Both topics in one slot implies distinct hashes.
                    debug_assert_ne!(hash, other_hash);
                    if left_wins(hash, self.topic_ref(id).age, other_age, other_hash) {
                        // Our slot now; the tenant has to move, possibly
                        // cascading. A cascade may put some third topic
                        // back into this very slot, but that topic was
                        // pushed out by one that just lost to us, so it
                        // will lose to us again on the next iteration.
                        self.allocate_topic(other, other_evictions + 1, false);
                    } else {
                        self.topic_mut(id).evictions += 1;
                    }
                }
            }
        }

        // Everyone must learn about the move.
        self.schedule_gossip_asap(id);

        // Restore the subscription if anyone still wants it. A failure
        // here also retries earlier failures, as long as a subscriber
        // remains.
        let (sub_refs, subject_id, discriminator, extent, timeout) = {
            let topic = self.topic_ref(id);
            (
                topic.sub_refs,
                topic.subject_id(self.preferred_subject_id),
                topic.discriminator(),
                topic.sub_extent,
                topic.sub_transfer_id_timeout,
            )
        };
        if sub_refs > 0 {
            match self
                .transport
                .topic_subscribe(subject_id, discriminator, extent, timeout)
            {
                Ok(()) => self.topic_mut(id).subscribed = true,
                Err(error) => {
                    self.topic_mut(id).subscribed = false;
                    self.transport.handle_resubscription_error(subject_id, error);
                }
            }
        }
        trace!(
            "allocated #{:016x} @{} evict={}",
            hash,
            subject_id,
            self.topic_ref(id).evictions()
        );
    }

    /// Move a topic to the front of the gossip queue, unless it is
    /// already there. Pinned topics take rank 1 instead of 0: they are
    /// gossiped to announce "we also hold this slot", which must not
    /// preempt genuine conflict reports.
    pub(crate) fn schedule_gossip_asap(&mut self, id: TopicId) {
        let topic = self.topic_ref(id);
        if topic.last_gossip > Timestamp::ZERO {
            let rank = if topic.is_pinned() {
                Timestamp::from_micros(1)
            } else {
                Timestamp::ZERO
            };
            trace!("gossip asap '{}' #{:016x}", topic.name(), topic.hash());
            self.update_last_gossip_time(id, rank);
        }
    }

    /// Re-key a topic in the gossip-time index. Equal timestamps keep
    /// FIFO order, so repeated reinsertion cannot starve a topic.
    pub(crate) fn update_last_gossip_time(&mut self, id: TopicId, ts: Timestamp) {
        let (old_ts, old_seq) = {
            let topic = self.topic_ref(id);
            (topic.last_gossip, topic.gossip_seq)
        };
        let removed = self.topics_by_gossip_time.remove(old_ts, old_seq);
        debug_assert_eq!(removed, Some(id));
        let seq = self.topics_by_gossip_time.insert(ts, id);
        let topic = self.topic_mut(id);
        topic.last_gossip = ts;
        topic.gossip_seq = seq;
    }
}
