//! Heartbeat publication and CRDT merge.
//!
//! Each heartbeat gossips one local topic's allocation state. Receivers
//! apply deterministic merge rules, so all participants converge on the
//! same name → subject-ID mapping once the network is connected:
//!
//! - A *collision* (remote topic with a different hash occupying a local
//!   subject-ID) is arbitrated with the same rules the allocator uses
//!   locally; the loser moves.
//! - A *divergence* (same topic, different eviction counts) is resolved
//!   toward the older allocation, with the higher eviction count winning
//!   inside one age band: any lower count is known to have collided
//!   somewhere already.
//!
//! Ages merge by max, which is commutative, associative, and idempotent,
//! making the whole merge a valid CRDT join.

use crate::platform::{Clock, Random, Transport};
use crate::time::{Duration, Timestamp};
use crate::topic::{left_wins, log2_floor, subject_id_for};
use crate::types::{Event, OwnedTransfer, TopicId};
use crate::wire::{Heartbeat, TOPIC_FLAG_PUBLISHING, TOPIC_FLAG_SUBSCRIBED};

/// Transmission deadline offset for heartbeat messages.
const HEARTBEAT_PUB_TIMEOUT: Duration = Duration::from_secs(1);

impl<T, R, C> crate::node::Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Bump the age of a topic, at most once per second and by at most
    /// one, to avoid leaps when a topic goes a long time without gossip.
    pub(crate) fn age_topic(&mut self, id: TopicId, now: Timestamp) {
        let topic = self.topic_mut(id);
        let secs = now.since(topic.aged_at).as_secs();
        if secs > 0 {
            topic.age += 1;
        }
        topic.aged_at += Duration::from_secs(secs);
    }

    /// Publish a heartbeat gossiping the given topic.
    ///
    /// The gossip time advances even if the transport publish failed, so
    /// a broken transport cannot pin the scheduler to one topic.
    pub(crate) fn publish_heartbeat(&mut self, id: TopicId, now: Timestamp) -> Result<(), T::Error> {
        self.age_topic(id, now);

        let heartbeat = {
            let topic = self.topic_ref(id);
            let mut flags = 0u8;
            if topic.is_publishing() {
                flags |= TOPIC_FLAG_PUBLISHING;
            }
            if topic.has_subscribers() {
                flags |= TOPIC_FLAG_SUBSCRIBED;
            }
            Heartbeat {
                uptime_secs: now.since(self.started_at).as_secs() as u32,
                user_word: self.user_word(),
                uid: self.uid(),
                topic_hash: topic.hash(),
                flags,
                age: topic.age(),
                evictions: topic.evictions(),
                topic_name: topic.name().as_bytes().to_vec(),
            }
        };
        let payload = heartbeat.encode_to_vec();

        let (subject_id, discriminator, priority, transfer_id) = {
            let hb_topic = self.topic_ref(self.heartbeat_topic);
            (
                hb_topic.subject_id(self.preferred_subject_id),
                hb_topic.discriminator(),
                hb_topic.pub_priority,
                hb_topic.pub_transfer_id,
            )
        };
        let result = self.transport.topic_publish(
            subject_id,
            discriminator,
            priority,
            transfer_id,
            now + HEARTBEAT_PUB_TIMEOUT,
            &payload,
        );
        let heartbeat_topic = self.heartbeat_topic;
        self.topic_mut(heartbeat_topic).pub_transfer_id += 1;

        self.update_last_gossip_time(id, now);
        result
    }

    /// Ingest a transfer received on a subscribed topic.
    ///
    /// Updates the neighbor filter, ages the topic, runs the CRDT merge
    /// for heartbeats, and hands the payload to the application when it
    /// holds a subscription. Must be called before `update` within one
    /// tick so the next heartbeat reflects the freshest state.
    pub fn ingest_topic_transfer(&mut self, id: TopicId, transfer: OwnedTransfer) {
        if !self.topics.contains_key(&id) {
            return;
        }
        self.mark_neighbor(transfer.metadata.remote_node_id);

        // Reception-driven ageing: a topic that actually carries traffic
        // is worth keeping where it is. Not transmitted directly, so an
        // unconnected publisher cannot inflate its own age; subscribers
        // feed the publisher the grown age through the regular merge.
        self.topic_mut(id).age += 1;

        let is_heartbeat = id == self.heartbeat_topic;
        if is_heartbeat {
            self.merge_heartbeat(
                transfer.timestamp,
                transfer.metadata.remote_node_id,
                &transfer.payload,
            );
        }

        // The node itself holds one reference on the heartbeat topic.
        let app_refs = self
            .topic_ref(id)
            .sub_refs
            .saturating_sub(u32::from(is_heartbeat));
        if app_refs > 0 {
            self.events
                .push_back(Event::MessageReceived { topic: id, transfer });
        }
    }

    /// Apply the CRDT merge rules for one received heartbeat.
    pub(crate) fn merge_heartbeat(&mut self, ts: Timestamp, remote_node_id: u16, payload: &[u8]) {
        let Ok(heartbeat) = Heartbeat::decode(payload) else {
            return;
        };
        let other_hash = heartbeat.topic_hash;
        let other_evictions = heartbeat.evictions;
        let other_age = heartbeat.age;

        let Some(mine) = self.find_topic_by_hash(other_hash) else {
            // Unknown topic; it may still collide with a local one on
            // the subject-ID it resolves to.
            let subject_id =
                subject_id_for(other_hash, other_evictions, self.preferred_subject_id);
            let Some(mine) = self.find_topic_by_subject_id(subject_id) else {
                return; // Not our subject-ID, no concern.
            };
            let (my_age, my_evictions) = {
                let topic = self.topic_ref(mine);
                (topic.age(), topic.evictions())
            };
            let win = left_wins(self.topic_ref(mine).hash(), my_age, other_age, other_hash);
            trace!(
                "collision @{} vs nid={} #{:016x}: we {}",
                subject_id,
                remote_node_id,
                other_hash,
                if win { "win" } else { "lose" }
            );
            if win {
                // Nothing to change locally, but the infringing node
                // must learn that this subject-ID is taken.
                self.schedule_gossip_asap(mine);
            } else {
                // Every other participant on our topic will move too,
                // possibly to different slots; everyone announces their
                // new allocation and the max wins from there.
                self.allocate_topic(mine, my_evictions + 1, false);
                self.topic_mut(mine).last_local_event_ts = ts;
                self.last_local_event_ts = ts;
            }
            self.topic_mut(mine).last_event_ts = ts;
            self.last_event_ts = ts;
            return;
        };

        // Known topic: hashes agree, check the allocation consensus.
        let (my_age, my_evictions, my_last_gossip) = {
            let topic = self.topic_ref(mine);
            (topic.age(), topic.evictions(), topic.last_gossip)
        };
        if my_evictions != other_evictions {
            let my_lage = log2_floor(my_age);
            let other_lage = log2_floor(other_age);
            trace!(
                "divergence '{}' local evict={} lage={} remote evict={} lage={} from nid={}",
                self.topic_ref(mine).name(),
                my_evictions,
                my_lage,
                other_evictions,
                other_lage,
                remote_node_id
            );
            if my_lage > other_lage || (my_lage == other_lage && my_evictions > other_evictions) {
                // We won; the remote is expected to adjust.
                self.schedule_gossip_asap(mine);
            } else {
                // We lost: adopt the remote eviction count, or offer a
                // new alternative if that slot is taken locally.
                self.topic_mut(mine).age = my_age.max(other_age);
                self.allocate_topic(mine, other_evictions, false);
                if self.topic_ref(mine).evictions() == other_evictions {
                    // Perfect sync; no need to gossip what the network
                    // already agrees on.
                    self.update_last_gossip_time(mine, my_last_gossip);
                }
                self.topic_mut(mine).last_local_event_ts = ts;
                self.last_local_event_ts = ts;
            }
            self.topic_mut(mine).last_event_ts = ts;
            self.last_event_ts = ts;
        }
        let topic = self.topic_mut(mine);
        topic.age = topic.age.max(other_age);
    }
}
