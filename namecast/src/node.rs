//! Node implementation - the coordination state machine.
//!
//! The [`Node`] owns all protocol state and is driven entirely by the
//! embedder: `update` advances time (heartbeats, future timeouts,
//! node-ID allocation), `ingest_topic_transfer` and
//! `ingest_topic_response_transfer` feed inbound traffic, and
//! `poll_event` drains application events. There are no internal tasks
//! or locks; everything runs in-line on the caller's thread.
//!
//! Within one tick, ingestion must happen before `update` so that the
//! next heartbeat reflects the freshest state.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::new(transport, random, clock, Config::new(uid))?;
//! let topic = node.create_topic("telemetry/imu")?;
//! node.subscribe(topic, 512, TRANSFER_ID_TIMEOUT_DEFAULT)?;
//!
//! loop {
//!     // feed inbound transfers, then:
//!     node.update()?;
//!     while let Some(event) = node.poll_event() {
//!         // handle events
//!     }
//! }
//! ```

use alloc::collections::{BTreeMap, VecDeque};
use alloc::format;
use alloc::string::String;

use crate::bloom::Bloom64;
use crate::collections::{Registry, SequencedIndex};
use crate::config::Config;
use crate::futures::FutureRecord;
use crate::name;
use crate::platform::{Clock, Random, Transport};
use crate::time::{Duration, Timestamp};
use crate::topic::{subject_id_for, Topic};
use crate::types::{
    Error, Event, FutureId, Priority, TopicId, NAMESPACE_NAME_MAX, START_DELAY_MAX,
    START_DELAY_MIN, TOPIC_SUBJECT_COUNT, TRANSFER_ID_TIMEOUT_DEFAULT,
};
use crate::wire::HEARTBEAT_SIZE_MAX;

/// The coordination node.
///
/// Generic over:
/// - `T`: transport implementation
/// - `R`: entropy source
/// - `C`: monotonic clock
///
/// One value owns all state; multiple independent instances can coexist.
pub struct Node<T, R, C> {
    // Dependencies (injected)
    pub(crate) transport: T,
    random: R,
    pub(crate) clock: C,

    // Identity
    uid: u64,
    namespace: String,
    name: String,
    user_word: [u8; 3],
    pub(crate) preferred_subject_id: Option<u16>,

    pub(crate) node_id: Option<u16>,
    pub(crate) started_at: Timestamp,
    pub(crate) last_event_ts: Timestamp,
    pub(crate) last_local_event_ts: Timestamp,
    /// Set by `notify_node_id_collision`; handled on the next `update`.
    node_id_collision: bool,

    // Heartbeat scheduling
    pub(crate) heartbeat_topic: TopicId,
    pub(crate) heartbeat_next: Timestamp,
    heartbeat_period_max: Duration,
    gossip_cycle_period_max: Duration,

    // Node-ID occupancy filter
    pub(crate) bloom: Bloom64,

    // Topic registry and indices
    pub(crate) topics: Registry<TopicId, Topic>,
    pub(crate) topics_by_hash: BTreeMap<u64, TopicId>,
    pub(crate) topics_by_subject_id: BTreeMap<u16, TopicId>,
    pub(crate) topics_by_gossip_time: SequencedIndex<Timestamp, TopicId>,
    next_topic_id: u64,

    // Future registry; the per-topic transfer-ID indices live in topics
    pub(crate) futures: Registry<FutureId, FutureRecord>,
    pub(crate) futures_by_deadline: SequencedIndex<Timestamp, FutureId>,
    pub(crate) next_future_id: u64,

    // Application event queue
    pub(crate) events: VecDeque<Event>,
}

impl<T, R, C> Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Create a node and register its heartbeat topic.
    ///
    /// With an explicit node-ID the node claims it immediately and the
    /// first heartbeat goes out on the first `update`. Without one, the
    /// node listens for `[1 s, 3 s)` to learn occupied node-IDs before
    /// allocating its own.
    ///
    /// Failures leave no residual transport state beyond an already
    /// claimed node-ID.
    pub fn new(transport: T, random: R, clock: C, config: Config) -> Result<Self, Error<T::Error>> {
        if config.uid == 0 {
            return Err(Error::Argument);
        }
        let bloom_bits = transport.node_id_bloom_bits();
        if bloom_bits == 0 || bloom_bits % 64 != 0 {
            return Err(Error::Argument);
        }
        let namespace = if config.namespace.is_empty() {
            String::from("/")
        } else {
            config.namespace.clone()
        };
        if namespace.len() > NAMESPACE_NAME_MAX {
            return Err(Error::Name);
        }
        // Default display name derived from the UID; `~` expands to this.
        let name = format!(
            "{:04x}/{:04x}/{:08x}/",
            (config.uid >> 48) & 0xffff,
            (config.uid >> 32) & 0xffff,
            config.uid & 0xffff_ffff
        );
        let started_at = clock.now();

        let mut node = Self {
            transport,
            random,
            clock,
            uid: config.uid,
            namespace,
            name,
            user_word: [0; 3],
            preferred_subject_id: config.preferred_subject_id,
            node_id: None,
            started_at,
            last_event_ts: Timestamp::ZERO,
            last_local_event_ts: Timestamp::ZERO,
            node_id_collision: false,
            heartbeat_topic: TopicId(0),
            heartbeat_next: started_at,
            heartbeat_period_max: config.heartbeat_period_max,
            gossip_cycle_period_max: config.gossip_cycle_period_max,
            bloom: Bloom64::new(bloom_bits),
            topics: Registry::new(),
            topics_by_hash: BTreeMap::new(),
            topics_by_subject_id: BTreeMap::new(),
            topics_by_gossip_time: SequencedIndex::new(),
            next_topic_id: 1,
            futures: Registry::new(),
            futures_by_deadline: SequencedIndex::new(),
            next_future_id: 1,
            events: VecDeque::new(),
        };

        match config.node_id.filter(|&id| id <= node.transport.node_id_max()) {
            Some(id) => {
                // Claim immediately: a manually assigned ID takes
                // precedence, squatters will be forced to move.
                node.bloom.set(id as usize);
                node.transport.node_id_set(id).map_err(Error::Transport)?;
                node.node_id = Some(id);
                node.events.push_back(Event::NodeIdAcquired { node_id: id });
            }
            None => {
                let delay = node.random_range(
                    START_DELAY_MIN.as_micros(),
                    START_DELAY_MAX.as_micros(),
                );
                node.heartbeat_next += Duration::from_micros(delay);
                node.last_event_ts = started_at;
                node.last_local_event_ts = started_at;
            }
        }

        let heartbeat = node.create_topic(&config.heartbeat_topic_name)?;
        node.heartbeat_topic = heartbeat;
        node.subscribe(heartbeat, HEARTBEAT_SIZE_MAX, TRANSFER_ID_TIMEOUT_DEFAULT)?;
        Ok(node)
    }

    // --- Identity & state accessors ---

    /// Node UID.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Current node-ID, if one is allocated.
    pub fn node_id(&self) -> Option<u16> {
        self.node_id
    }

    /// Whether a node-ID is currently allocated. Emitting transfers
    /// without one may fail depending on the transport.
    pub fn has_node_id(&self) -> bool {
        self.node_id.is_some()
    }

    /// Heuristic: the node holds a node-ID and none of its topics had to
    /// move for at least one second. Can flip back to false while a
    /// conflict is being repaired.
    pub fn ready(&self) -> bool {
        self.has_node_id()
            && self.clock.now().since(self.last_local_event_ts) > Duration::from_secs(1)
    }

    /// When the node was created.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Last time any local topic was involved in a collision or
    /// divergence, even if the local entry won. A network stability
    /// metric: the further in the past, the more settled the network.
    pub fn last_event_ts(&self) -> Timestamp {
        self.last_event_ts
    }

    /// Last time a local topic had to move to another subject-ID.
    pub fn last_local_event_ts(&self) -> Timestamp {
        self.last_local_event_ts
    }

    /// The namespace prefix applied to relative topic names.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The node display name substituted for `~` in topic names.
    pub fn node_name(&self) -> &str {
        &self.name
    }

    /// Set the opaque 24-bit word carried in every heartbeat.
    pub fn set_user_word(&mut self, word: [u8; 3]) {
        self.user_word = word;
    }

    pub(crate) fn user_word(&self) -> [u8; 3] {
        self.user_word
    }

    /// The pinned heartbeat topic.
    pub fn heartbeat_topic(&self) -> TopicId {
        self.heartbeat_topic
    }

    /// When the next heartbeat is due.
    pub fn next_heartbeat_at(&self) -> Timestamp {
        self.heartbeat_next
    }

    /// Number of registered topics (including the heartbeat topic).
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Borrow the transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The node-ID occupancy Bloom filter.
    pub fn node_id_bloom(&self) -> &Bloom64 {
        &self.bloom
    }

    /// Current time as seen through the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Topic registry ---

    /// Register a topic for publishing, subscribing, or both.
    ///
    /// The name is canonicalized against the node namespace; it must be
    /// unique on this node. Registering a topic may displace already
    /// registered topics to other subject-IDs (local arbitration works
    /// exactly like the networked one).
    pub fn create_topic(&mut self, topic_name: &str) -> Result<TopicId, Error<T::Error>> {
        self.create_topic_with_hint(topic_name, None)
    }

    /// Register a topic with a saved subject-ID allocation.
    ///
    /// The hint restores a previously converged allocation (e.g. from
    /// non-volatile storage) so the network becomes operational without
    /// waiting for consensus. It is used as the initial state only; any
    /// conflict or divergence discards it without preference. Hints
    /// outside the dynamic pool [0, 6144) are ignored, as are hints for
    /// pinned topics.
    pub fn create_topic_with_hint(
        &mut self,
        topic_name: &str,
        subject_id_hint: Option<u16>,
    ) -> Result<TopicId, Error<T::Error>> {
        let canonical =
            name::canonicalize(&self.namespace, &self.name, topic_name).ok_or(Error::Name)?;
        if self.topics.len() >= TOPIC_SUBJECT_COUNT as usize {
            return Err(Error::Capacity);
        }
        let hash = name::topic_hash(&canonical);
        if self.topics_by_hash.contains_key(&hash) {
            return Err(Error::Name); // Name already taken on this node.
        }
        let now = self.clock.now();
        let pub_transfer_id = self.random_u64();

        let mut evictions = 0u64;
        let hint = subject_id_hint.filter(|&h| u64::from(h) < TOPIC_SUBJECT_COUNT);
        let topic_event_ts = match hint {
            Some(hinted) if !name::is_pinned(hash) => {
                // Smallest eviction count landing on the hinted subject;
                // the formula cycles through the whole pool, so this
                // terminates within TOPIC_SUBJECT_COUNT steps.
                while subject_id_for(hash, evictions, self.preferred_subject_id) != hinted {
                    evictions += 1;
                }
                Timestamp::ZERO
            }
            Some(_) => Timestamp::ZERO,
            None => {
                self.last_event_ts = now;
                self.last_local_event_ts = now;
                now
            }
        };

        let id = TopicId(self.next_topic_id);
        self.next_topic_id += 1;
        let topic = Topic {
            name: canonical,
            hash,
            evictions,
            age: 0,
            aged_at: now,
            last_gossip: Timestamp::ZERO,
            gossip_seq: 0,
            last_event_ts: topic_event_ts,
            last_local_event_ts: topic_event_ts,
            pub_transfer_id,
            pub_priority: Priority::Nominal,
            publishing: false,
            sub_refs: 0,
            sub_extent: 0,
            sub_transfer_id_timeout: Duration::ZERO,
            subscribed: false,
            futures_by_transfer_id: BTreeMap::new(),
        };
        self.topics.insert(id, topic);
        self.topics_by_hash.insert(hash, id);
        let seq = self.topics_by_gossip_time.insert(Timestamp::ZERO, id);
        self.topic_mut(id).gossip_seq = seq;

        // Find a subject-ID slot; this may displace lower-ranked topics.
        self.allocate_topic(id, evictions, true);
        trace!(
            "new topic '{}' #{:016x} @{}",
            self.topic_ref(id).name,
            hash,
            self.topic_ref(id).subject_id(self.preferred_subject_id)
        );
        Ok(id)
    }

    /// Destroy a topic: remove it from all indices, tear down the
    /// transport subscription, and fail every outstanding future bound
    /// to it. The heartbeat topic cannot be destroyed.
    pub fn topic_destroy(&mut self, id: TopicId) -> Result<(), Error<T::Error>> {
        if id == self.heartbeat_topic {
            return Err(Error::Argument);
        }
        let Some(topic) = self.topics.remove(&id) else {
            return Err(Error::Argument);
        };
        let subject_id = topic.subject_id(self.preferred_subject_id);
        self.topics_by_hash.remove(&topic.hash);
        self.topics_by_subject_id.remove(&subject_id);
        self.topics_by_gossip_time
            .remove(topic.last_gossip, topic.gossip_seq);
        if topic.subscribed {
            self.transport.topic_unsubscribe(subject_id);
        }
        for (_, future_id) in topic.futures_by_transfer_id {
            if let Some(fut) = self.futures.remove(&future_id) {
                self.futures_by_deadline.remove(fut.deadline, fut.deadline_seq);
                self.events.push_back(Event::FutureTimedOut {
                    future: future_id,
                    topic: id,
                });
            }
        }
        trace!("destroyed topic '{}' #{:016x}", topic.name, topic.hash);
        Ok(())
    }

    /// Look up a topic by raw name. The name is canonicalized the same
    /// way `create_topic` does, so the creating string finds the topic.
    pub fn find_topic_by_name(&self, topic_name: &str) -> Option<TopicId> {
        let canonical = name::canonicalize(&self.namespace, &self.name, topic_name)?;
        self.find_topic_by_hash(name::topic_hash(&canonical))
    }

    /// Look up a topic by name hash.
    pub fn find_topic_by_hash(&self, hash: u64) -> Option<TopicId> {
        self.topics_by_hash.get(&hash).copied()
    }

    /// Look up a topic by its currently allocated subject-ID.
    pub fn find_topic_by_subject_id(&self, subject_id: u16) -> Option<TopicId> {
        self.topics_by_subject_id.get(&subject_id).copied()
    }

    /// Borrow a topic.
    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.get(&id)
    }

    /// Currently allocated subject-ID of a topic.
    pub fn topic_subject_id(&self, id: TopicId) -> Option<u16> {
        self.topics
            .get(&id)
            .map(|t| t.subject_id(self.preferred_subject_id))
    }

    /// Iterate over all topics in name-hash order.
    pub fn topics(&self) -> impl Iterator<Item = (TopicId, &Topic)> {
        self.topics_by_hash
            .values()
            .map(move |&id| (id, self.topic_ref(id)))
    }

    /// Adjust the publication priority of a topic.
    pub fn set_publish_priority(
        &mut self,
        id: TopicId,
        priority: Priority,
    ) -> Result<(), Error<T::Error>> {
        let topic = self.topics.get_mut(&id).ok_or(Error::Argument)?;
        topic.pub_priority = priority;
        Ok(())
    }

    /// Announce (or retract) the intent to publish on a topic. `publish`
    /// sets the flag automatically; retract it when the application
    /// stops publishing so the rest of the network knows.
    pub fn set_publishing(&mut self, id: TopicId, publishing: bool) -> Result<(), Error<T::Error>> {
        let topic = self.topics.get_mut(&id).ok_or(Error::Argument)?;
        topic.publishing = publishing;
        Ok(())
    }

    // --- Subscriptions ---

    /// Add a subscription to a topic, activating the transport-level
    /// subscription if this is the first one.
    ///
    /// The extent and transfer-ID timeout of later subscriptions should
    /// not exceed those of earlier ones; growing either forces a
    /// transport resubscription which can lose transfers mid-reassembly.
    pub fn subscribe(
        &mut self,
        id: TopicId,
        extent: usize,
        transfer_id_timeout: Duration,
    ) -> Result<(), Error<T::Error>> {
        let Some(topic) = self.topics.get_mut(&id) else {
            return Err(Error::Argument);
        };
        let subject_id = topic.subject_id(self.preferred_subject_id);
        let discriminator = topic.discriminator();
        if topic.subscribed
            && (topic.sub_extent < extent || topic.sub_transfer_id_timeout < transfer_id_timeout)
        {
            self.transport.topic_unsubscribe(subject_id);
            let topic = self.topic_mut(id);
            topic.subscribed = false;
        }
        let topic = self.topic_mut(id);
        topic.sub_extent = topic.sub_extent.max(extent);
        topic.sub_transfer_id_timeout = topic.sub_transfer_id_timeout.max(transfer_id_timeout);
        topic.sub_refs += 1;
        if !topic.subscribed {
            let (extent, timeout) = (topic.sub_extent, topic.sub_transfer_id_timeout);
            let result =
                self.transport
                    .topic_subscribe(subject_id, discriminator, extent, timeout);
            self.topic_mut(id).subscribed = result.is_ok();
            result.map_err(Error::Transport)?;
        }
        Ok(())
    }

    /// Drop one subscription; the transport-level subscription is torn
    /// down with the last one.
    pub fn unsubscribe(&mut self, id: TopicId) -> Result<(), Error<T::Error>> {
        let Some(topic) = self.topics.get_mut(&id) else {
            return Err(Error::Argument);
        };
        topic.sub_refs = topic.sub_refs.saturating_sub(1);
        if topic.sub_refs == 0 && topic.subscribed {
            topic.subscribed = false;
            let subject_id = topic.subject_id(self.preferred_subject_id);
            self.transport.topic_unsubscribe(subject_id);
        }
        Ok(())
    }

    // --- Events ---

    /// Drain one application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        let event = self.events.pop_front();
        if self.events.is_empty() && self.events.capacity() > 32 {
            // A fully drained queue hands back the burst it grew for.
            self.events.shrink_to_fit();
        }
        event
    }

    // --- Driver ---

    /// Advance protocol time. Must be called at least as often as the
    /// heartbeat period; a few milliseconds is a good cadence.
    ///
    /// Retires timed-out futures, reacts to a pending node-ID collision,
    /// allocates a node-ID when one is due, and publishes at most one
    /// heartbeat carrying the least-recently-gossiped topic.
    pub fn update(&mut self) -> Result<(), Error<T::Error>> {
        let now = self.clock.now();

        self.sweep_timed_out_futures(now);

        if self.node_id_collision {
            self.node_id_collision = false;
            if self.node_id.is_some() {
                trace!("relinquishing node-ID {:?} after collision", self.node_id);
                self.node_id = None;
                self.transport.node_id_clear();
                self.heartbeat_next = now;
            }
        }

        if now >= self.heartbeat_next {
            // Heartbeat due without a node-ID: time to allocate one.
            if self.node_id.is_none() {
                let picked = self.pick_node_id();
                self.node_id = Some(picked);
                // Bail out on transport failure; the picked ID is kept
                // and the heartbeat goes out on a later tick.
                self.transport
                    .node_id_set(picked)
                    .map_err(Error::Transport)?;
                trace!(
                    "picked node-ID {} with Bloom popcount {}",
                    picked,
                    self.bloom.popcount()
                );
                self.events
                    .push_back(Event::NodeIdAcquired { node_id: picked });
            }

            // Gossip the least-recently-gossiped topic. The index is
            // never empty: the heartbeat topic itself is registered.
            let due = self.topics_by_gossip_time.min().map(|(_, _, &id)| id);
            let result = match due {
                Some(topic_id) => self.publish_heartbeat(topic_id, now),
                None => Ok(()),
            };

            // Advance without accumulating phase slip, even if this
            // heartbeat failed to publish.
            let period = (self.gossip_cycle_period_max / self.topics.len().max(1) as u64)
                .min(self.heartbeat_period_max);
            self.heartbeat_next += period;
            result.map_err(Error::Transport)?;
        }
        Ok(())
    }

    // --- Collision notifications ---

    /// The transport observed an inbound frame carrying our own node-ID
    /// as its source. Sets a flag; the next `update` relinquishes the ID
    /// and starts re-allocation. Constant time, safe from deep callbacks.
    pub fn notify_node_id_collision(&mut self) {
        if !self.node_id_collision {
            self.node_id_collision = true;
            trace!("node-ID collision reported on {:?}", self.node_id);
        }
    }

    /// The transport observed a frame whose discriminator does not match
    /// the topic on this subject-ID. Schedules the topic for immediate
    /// gossip to speed up collision repair; the heartbeat cadence is not
    /// changed. No-op for unknown subjects.
    pub fn notify_discriminator_collision(&mut self, subject_id: u16) {
        if let Some(id) = self.find_topic_by_subject_id(subject_id) {
            if self.topic_ref(id).last_gossip > Timestamp::ZERO {
                trace!("discriminator collision on subject {}", subject_id);
                self.schedule_gossip_asap(id);
            }
        }
    }

    // --- Internal helpers ---

    /// Infallible topic access for handles owned by the indices.
    /// A stale handle here means a broken index invariant.
    pub(crate) fn topic_ref(&self, id: TopicId) -> &Topic {
        self.topics.get(&id).expect("live topic handle")
    }

    pub(crate) fn topic_mut(&mut self, id: TopicId) -> &mut Topic {
        self.topics.get_mut(&id).expect("live topic handle")
    }

    /// Whitened 64-bit random value: the raw platform entropy is hashed
    /// with the UID so nodes sharing a PRNG sequence still diverge.
    pub(crate) fn random_u64(&mut self) -> u64 {
        let mut seed = [0u8; 16];
        seed[..8].copy_from_slice(&self.random.next_u64().to_le_bytes());
        seed[8..].copy_from_slice(&self.uid.to_le_bytes());
        rapidhash::rapidhash(&seed)
    }

    /// Uniform value in `[min, max)`; `min` when the range is empty.
    pub(crate) fn random_range(&mut self, min: u64, max: u64) -> u64 {
        if min < max {
            min + self.random_u64() % (max - min)
        } else {
            min
        }
    }
}

#[cfg(test)]
impl<T, R, C> Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Verify the structural invariants; panics on violation.
    pub(crate) fn check_invariants(&self) {
        let n = self.topics.len();
        assert_eq!(self.topics_by_hash.len(), n);
        assert_eq!(self.topics_by_subject_id.len(), n);
        assert_eq!(self.topics_by_gossip_time.len(), n);

        for (&subject_id, &id) in &self.topics_by_subject_id {
            let topic = self.topic_ref(id);
            assert_eq!(topic.subject_id(self.preferred_subject_id), subject_id);
            if self.preferred_subject_id.is_none() {
                let expected = if topic.is_pinned() {
                    topic.hash() as u16
                } else {
                    (topic.hash().wrapping_add(topic.evictions()) % TOPIC_SUBJECT_COUNT) as u16
                };
                assert_eq!(subject_id, expected);
            }
        }

        let mut gossip_positions = std::collections::HashMap::new();
        for (ts, seq, &tid) in self.topics_by_gossip_time.iter() {
            assert!(gossip_positions.insert(tid, (ts, seq)).is_none());
        }
        for (&hash, &id) in &self.topics_by_hash {
            let topic = self.topic_ref(id);
            assert_eq!(topic.hash(), hash);
            assert_eq!(
                gossip_positions.get(&id),
                Some(&(topic.last_gossip, topic.gossip_seq))
            );
        }

        assert_eq!(self.futures.len(), self.futures_by_deadline.len());
        for (deadline, _, &future_id) in self.futures_by_deadline.iter() {
            let fut = self.futures.get(&future_id).expect("indexed future");
            assert_eq!(fut.deadline, deadline);
            let topic = self.topic_ref(fut.topic);
            assert_eq!(
                topic.futures_by_transfer_id.get(&fut.transfer_id_masked),
                Some(&future_id)
            );
        }

        let exact: u32 = self.bloom.storage().iter().map(|w| w.count_ones()).sum();
        assert_eq!(self.bloom.popcount(), exact as usize);
    }
}
