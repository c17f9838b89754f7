//! Node configuration.

use alloc::string::{String, ToString};

use crate::time::Duration;
use crate::types::HEARTBEAT_TOPIC_NAME_DEFAULT;

/// Construction-time configuration for a [`Node`](crate::node::Node).
///
/// Only the UID is mandatory; everything else has working defaults.
/// Setters follow the builder pattern:
///
/// ```
/// use namecast::config::Config;
///
/// let config = Config::new(0x0102_0304_0506_0708)
///     .with_namespace("robot1")
///     .with_node_id(42);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Node UID: 16-bit vendor-ID, 16-bit product-ID, 32-bit instance-ID
    /// from most to least significant. The protocol only needs a non-zero
    /// number unique on the network.
    pub uid: u64,

    /// Explicit node-ID. When given, it is claimed immediately and the
    /// first heartbeat goes out at once — a manually assigned ID takes
    /// precedence over auto-assigned ones and squatters have to move.
    /// When absent, the node listens for `[1 s, 3 s)` before allocating.
    pub node_id: Option<u16>,

    /// Prefix for topic names that do not start with `/`. Defaults to `/`.
    pub namespace: String,

    /// Heartbeat topic name. Must be identical network-wide, which is
    /// why it is pinned; overriding it is for testing only.
    pub heartbeat_topic_name: String,

    /// Makes every non-pinned topic prefer this subject-ID, maximizing
    /// allocation collisions. A stress-test knob: must be identical on
    /// all nodes or divergent allocations will occur.
    pub preferred_subject_id: Option<u16>,

    /// Shortest interval between heartbeats.
    pub heartbeat_period_max: Duration,

    /// Longest time for a full gossip pass over all local topics. The
    /// effective heartbeat period is
    /// `min(heartbeat_period_max, gossip_cycle_period_max / topic_count)`.
    pub gossip_cycle_period_max: Duration,
}

impl Config {
    /// Configuration with defaults for the given UID.
    pub fn new(uid: u64) -> Self {
        Self {
            uid,
            node_id: None,
            namespace: String::new(),
            heartbeat_topic_name: HEARTBEAT_TOPIC_NAME_DEFAULT.to_string(),
            preferred_subject_id: None,
            heartbeat_period_max: Duration::from_millis(100),
            gossip_cycle_period_max: Duration::from_secs(10),
        }
    }

    /// Claim an explicit node-ID at construction.
    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the topic namespace.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Override the heartbeat topic name (testing only).
    pub fn with_heartbeat_topic_name(mut self, name: &str) -> Self {
        self.heartbeat_topic_name = name.to_string();
        self
    }

    /// Force all non-pinned topics to prefer one subject-ID (stress
    /// testing only).
    pub fn with_preferred_subject_id(mut self, subject_id: u16) -> Self {
        self.preferred_subject_id = Some(subject_id);
        self
    }

    /// Set the heartbeat cadence bounds.
    pub fn with_heartbeat_periods(mut self, period_max: Duration, cycle_max: Duration) -> Self {
        self.heartbeat_period_max = period_max;
        self.gossip_cycle_period_max = cycle_max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::new(1);
        assert_eq!(c.heartbeat_topic_name, "/7509");
        assert_eq!(c.node_id, None);
        assert_eq!(c.heartbeat_period_max, Duration::from_millis(100));
        assert_eq!(c.gossip_cycle_period_max, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let c = Config::new(1)
            .with_node_id(7)
            .with_namespace("ns")
            .with_preferred_subject_id(100);
        assert_eq!(c.node_id, Some(7));
        assert_eq!(c.namespace, "ns");
        assert_eq!(c.preferred_subject_id, Some(100));
    }
}
