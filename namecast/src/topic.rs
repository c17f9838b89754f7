//! Topic state and the local arbitration rules.
//!
//! Every named data stream used locally is a [`Topic`] placed in a
//! subject-ID slot under `subject_id = (hash + evictions) mod 6144`
//! (pinned topics bypass the formula). The CRDT merge rules, first rule
//! takes precedence:
//!
//! - on collision (same subject-ID, different hash):
//!     1. winner is pinned;
//!     2. winner is older (by `floor(log2(age))`);
//!     3. winner has the smaller hash.
//! - on divergence (same hash, different subject-ID):
//!     1. winner is older (by `floor(log2(age))`);
//!     2. winner has seen more evictions.
//!
//! A reallocated topic keeps its age; resetting it would leave the topic
//! unable to convince the rest of the network to follow.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::name;
use crate::time::{Duration, Timestamp};
use crate::types::{FutureId, Priority, TOPIC_SUBJECT_COUNT};

/// `floor(log2(x))`, or -1 for zero, for linear comparison of age bands.
/// The quantization creates a broad stability band so small age noise
/// does not flip arbitration winners.
pub(crate) fn log2_floor(x: u64) -> i8 {
    if x == 0 {
        -1
    } else {
        (63 - x.leading_zeros()) as i8
    }
}

/// Subject-ID for a topic hash and eviction count. The preferred-subject
/// override substitutes the hash for non-pinned topics (stress testing).
pub(crate) fn subject_id_for(hash: u64, evictions: u64, preferred: Option<u16>) -> u16 {
    if name::is_pinned(hash) {
        return hash as u16; // Pinned topics may exceed the dynamic pool.
    }
    let base = match preferred {
        Some(p) => u64::from(p),
        None => hash,
    };
    (base.wrapping_add(evictions) % TOPIC_SUBJECT_COUNT) as u16
}

/// Subject-ID allocation arbitration. Only applicable when the hashes
/// differ; returns whether the left contestant keeps the slot.
pub(crate) fn left_wins(l_hash: u64, l_age: u64, r_age: u64, r_hash: u64) -> bool {
    debug_assert_ne!(l_hash, r_hash);
    if name::is_pinned(l_hash) != name::is_pinned(r_hash) {
        // An age advantage would work too, but it would shrink the
        // effective age range by 2^32 and risk overflow.
        return name::is_pinned(l_hash);
    }
    let l_lage = log2_floor(l_age);
    let r_lage = log2_floor(r_age);
    if l_lage == r_lage {
        return l_hash < r_hash;
    }
    l_lage > r_lage // older topic wins
}

/// One named data stream used by the local application.
#[derive(Debug)]
pub struct Topic {
    /// Canonical name, at most 96 bytes.
    pub(crate) name: String,
    /// Name hash; equals the subject-ID for pinned topics.
    pub(crate) hash: u64,
    /// Lamport counter of local arbitration losses. A higher count wins a
    /// divergence tie because every lower value is known to have caused a
    /// collision somewhere. Only mutated while the topic is out of the
    /// subject-ID index.
    pub(crate) evictions: u64,
    /// Merge-by-max age counter; bumped at most once per second when
    /// gossiped, and on every received transfer. Never reset.
    pub(crate) age: u64,
    /// Wall clock of the last age bump, for the once-per-second rule.
    pub(crate) aged_at: Timestamp,
    /// Time of the last outbound gossip; zero means "scheduled ASAP".
    /// Not updated on received gossip: coordinated suppression could
    /// settle into a state where a semi-partitioned network never hears
    /// about some topics.
    pub(crate) last_gossip: Timestamp,
    /// Sequence disambiguating this topic in the gossip-time index.
    pub(crate) gossip_seq: u64,
    /// Last time this topic saw a collision or divergence anywhere,
    /// whether or not the local entry moved.
    pub(crate) last_event_ts: Timestamp,
    /// Last time the local entry itself had to move.
    pub(crate) last_local_event_ts: Timestamp,

    /// Publisher state. The transfer-ID counter is seeded randomly so
    /// that quick reboots do not resume an old counter value.
    pub(crate) pub_transfer_id: u64,
    pub(crate) pub_priority: Priority,
    pub(crate) publishing: bool,

    /// Subscriber state. `sub_refs` counts application subscriptions
    /// (plus the node's own on the heartbeat topic); `subscribed` tracks
    /// whether the transport-level subscription is currently live, which
    /// can lag on resubscription errors.
    pub(crate) sub_refs: u32,
    pub(crate) sub_extent: usize,
    pub(crate) sub_transfer_id_timeout: Duration,
    pub(crate) subscribed: bool,

    /// Pending response futures on this topic, by masked transfer-ID.
    pub(crate) futures_by_transfer_id: BTreeMap<u64, FutureId>,
}

impl Topic {
    /// Canonical topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 64-bit name hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Eviction counter.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Age counter.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Whether the name maps to a fixed subject-ID.
    pub fn is_pinned(&self) -> bool {
        name::is_pinned(self.hash)
    }

    /// Discriminator for transport-level collision detection.
    pub fn discriminator(&self) -> u64 {
        name::discriminator(self.hash)
    }

    /// Whether the local application publishes on this topic.
    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    /// Whether any local subscription exists (the transport-level
    /// subscription may still be down after a resubscription error).
    pub fn has_subscribers(&self) -> bool {
        self.sub_refs > 0
    }

    /// Last time this topic was involved in a collision or divergence.
    pub fn last_event_ts(&self) -> Timestamp {
        self.last_event_ts
    }

    /// Last time this topic was locally moved to a new subject-ID.
    pub fn last_local_event_ts(&self) -> Timestamp {
        self.last_local_event_ts
    }

    pub(crate) fn subject_id(&self, preferred: Option<u16>) -> u16 {
        subject_id_for(self.hash, self.evictions, preferred)
    }
}
