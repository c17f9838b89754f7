//! SimNode: a namecast node wired to simulated platform pieces.

use std::cell::Cell;
use std::rc::Rc;

use hashbrown::HashSet;
use namecast::{
    Clock, Config, Duration, Error, Node, OwnedTransfer, Priority, Random, Timestamp,
    TransferMetadata, Transport, RPC_SERVICE_ID_TOPIC_RESPONSE,
};

use crate::event::Outgoing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimTransportError {
    /// Emitting a transfer requires a bound node-ID on this transport.
    Anonymous,
}

/// Simulated transport: records outgoing transfers for the bus to route
/// and tracks the subject subscriptions used for delivery filtering.
pub struct SimTransport {
    pub node_id_max: u16,
    pub transfer_id_mask: u64,
    pub bloom_bits: usize,
    pub bound_node_id: Option<u16>,
    pub subscribed_subjects: HashSet<u16>,
    pub outgoing: Vec<Outgoing>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            node_id_max: 65534,
            transfer_id_mask: u64::MAX,
            bloom_bits: 128,
            bound_node_id: None,
            subscribed_subjects: HashSet::new(),
            outgoing: Vec::new(),
        }
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    type Error = SimTransportError;

    fn node_id_max(&self) -> u16 {
        self.node_id_max
    }

    fn transfer_id_mask(&self) -> u64 {
        self.transfer_id_mask
    }

    fn node_id_bloom_bits(&self) -> usize {
        self.bloom_bits
    }

    fn node_id_set(&mut self, node_id: u16) -> Result<(), Self::Error> {
        self.bound_node_id = Some(node_id);
        Ok(())
    }

    fn node_id_clear(&mut self) {
        self.bound_node_id = None;
    }

    fn request(
        &mut self,
        service_id: u16,
        metadata: TransferMetadata,
        _tx_deadline: Timestamp,
        payload: &[u8],
    ) -> Result<(), Self::Error> {
        if self.bound_node_id.is_none() {
            return Err(SimTransportError::Anonymous);
        }
        self.outgoing.push(Outgoing::Request {
            service_id,
            metadata,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn topic_publish(
        &mut self,
        subject_id: u16,
        discriminator: u64,
        priority: Priority,
        transfer_id: u64,
        _tx_deadline: Timestamp,
        payload: &[u8],
    ) -> Result<(), Self::Error> {
        if self.bound_node_id.is_none() {
            return Err(SimTransportError::Anonymous);
        }
        self.outgoing.push(Outgoing::Publish {
            subject_id,
            discriminator,
            priority,
            transfer_id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn topic_subscribe(
        &mut self,
        subject_id: u16,
        _discriminator: u64,
        _extent: usize,
        _transfer_id_timeout: Duration,
    ) -> Result<(), Self::Error> {
        self.subscribed_subjects.insert(subject_id);
        Ok(())
    }

    fn topic_unsubscribe(&mut self, subject_id: u16) {
        self.subscribed_subjects.remove(&subject_id);
    }
}

/// Simulated clock; time is set externally by the simulator through a
/// shared cell.
pub struct SimClock {
    current: Rc<Cell<Timestamp>>,
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        self.current.get()
    }
}

/// Deterministic LCG entropy source.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimTransport, SimRandom, SimClock>;

/// Wrapper around a namecast node for simulation.
pub struct SimNode {
    /// The underlying namecast node.
    pub node: SimNodeInner,
    clock: Rc<Cell<Timestamp>>,
}

impl SimNode {
    /// Create a node at the given simulation time. The seed drives both
    /// the entropy source and, through the config, the identity.
    pub fn new(seed: u64, config: Config, now: Timestamp) -> Self {
        let clock = Rc::new(Cell::new(now));
        let node = Node::new(
            SimTransport::new(),
            SimRandom::with_seed(seed),
            SimClock {
                current: Rc::clone(&clock),
            },
            config,
        )
        .expect("sim node construction");
        Self { node, clock }
    }

    /// Advance this node's view of time.
    pub fn set_time(&self, now: Timestamp) {
        self.clock.set(now);
    }

    /// Node-ID currently bound at the transport.
    pub fn bound_node_id(&self) -> Option<u16> {
        self.node.transport().bound_node_id
    }

    /// Take all outgoing transfers recorded since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.node.transport_mut().outgoing)
    }

    /// Drive the node's periodic update at the given time.
    pub fn tick(&mut self, now: Timestamp) -> Result<(), Error<SimTransportError>> {
        self.set_time(now);
        self.node.update()
    }

    /// Deliver one transfer from the bus.
    ///
    /// Performs the frame-level checks a real transport glue would:
    /// transfers carrying our own source node-ID report a collision and
    /// are dropped; published messages are accepted only on subscribed
    /// subjects; topic responses are matched by the RPC service-ID.
    pub fn deliver(&mut self, from_node_id: u16, outgoing: Outgoing, now: Timestamp) {
        self.set_time(now);
        if self.bound_node_id() == Some(from_node_id) {
            self.node.notify_node_id_collision();
            return;
        }
        match outgoing {
            Outgoing::Publish {
                subject_id,
                discriminator,
                priority,
                transfer_id,
                payload,
            } => {
                if !self
                    .node
                    .transport()
                    .subscribed_subjects
                    .contains(&subject_id)
                {
                    return;
                }
                let Some(topic) = self.node.find_topic_by_subject_id(subject_id) else {
                    return;
                };
                // Frame-level discriminator filtering: a mismatch means
                // a foreign topic is squatting on this subject-ID. The
                // frame must be dropped; reporting it lets the node
                // re-announce its claim ahead of schedule.
                let expected = self.node.topic(topic).map(|t| t.discriminator());
                if expected != Some(discriminator) {
                    self.node.notify_discriminator_collision(subject_id);
                    return;
                }
                self.node.ingest_topic_transfer(
                    topic,
                    OwnedTransfer {
                        timestamp: now,
                        metadata: TransferMetadata {
                            priority,
                            remote_node_id: from_node_id,
                            transfer_id,
                        },
                        payload,
                    },
                );
            }
            Outgoing::Request {
                service_id,
                metadata,
                payload,
            } => {
                if service_id != RPC_SERVICE_ID_TOPIC_RESPONSE {
                    return;
                }
                self.node.ingest_topic_response_transfer(OwnedTransfer {
                    timestamp: now,
                    metadata: TransferMetadata {
                        priority: metadata.priority,
                        remote_node_id: from_node_id,
                        transfer_id: metadata.transfer_id,
                    },
                    payload,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simnode_creation() {
        let node = SimNode::new(42, Config::new(42), Timestamp::ZERO);
        assert_eq!(node.node.topic_count(), 1);
        assert_eq!(node.bound_node_id(), None);
    }

    #[test]
    fn test_simnode_determinism() {
        let a = SimNode::new(42, Config::new(42), Timestamp::ZERO);
        let b = SimNode::new(42, Config::new(42), Timestamp::ZERO);
        assert_eq!(a.node.next_heartbeat_at(), b.node.next_heartbeat_at());

        let c = SimNode::new(43, Config::new(43), Timestamp::ZERO);
        assert_ne!(a.node.next_heartbeat_at(), c.node.next_heartbeat_at());
    }

    #[test]
    fn test_anonymous_node_rejects_publish() {
        let mut node = SimNode::new(1, Config::new(1), Timestamp::ZERO);
        let topic = node.node.create_topic("t").unwrap();
        let result = node
            .node
            .publish(topic, Timestamp::from_secs(1), b"x", None);
        assert!(matches!(result, Err(Error::Anonymous)));
    }

    #[test]
    fn test_discriminator_mismatch_drops_frame_and_repairs() {
        let mut node = SimNode::new(1, Config::new(1).with_node_id(5), Timestamp::ZERO);
        let topic = node.node.create_topic("x").unwrap();
        node.node
            .subscribe(topic, 64, namecast::TRANSFER_ID_TIMEOUT_DEFAULT)
            .unwrap();
        let subject = node.node.topic_subject_id(topic).unwrap();
        let x_hash = node.node.topic(topic).unwrap().hash();
        let good = node.node.topic(topic).unwrap().discriminator();

        // Gossip both topics once so nothing is scheduled ASAP anymore.
        let mut t = Timestamp::ZERO;
        for _ in 0..4 {
            node.tick(t).unwrap();
            t = t + Duration::from_millis(100);
        }
        node.take_outgoing();
        while node.node.poll_event().is_some() {}

        // A matching discriminator reaches the application.
        node.deliver(
            9,
            Outgoing::Publish {
                subject_id: subject,
                discriminator: good,
                priority: Priority::Nominal,
                transfer_id: 1,
                payload: vec![1],
            },
            t,
        );
        assert!(matches!(
            node.node.poll_event(),
            Some(namecast::Event::MessageReceived { .. })
        ));

        // A foreign discriminator on the same subject is dropped and
        // the topic jumps the gossip queue to re-announce its claim.
        node.deliver(
            9,
            Outgoing::Publish {
                subject_id: subject,
                discriminator: good ^ 1,
                priority: Priority::Nominal,
                transfer_id: 2,
                payload: vec![2],
            },
            t,
        );
        assert!(node.node.poll_event().is_none());

        // Without the repair, the heartbeat topic would be next in the
        // round-robin; instead the contested topic goes out first.
        node.tick(t).unwrap();
        let sent = node.take_outgoing();
        let first_gossip = sent
            .iter()
            .find_map(|o| match o {
                Outgoing::Publish { payload, .. } => {
                    namecast::wire::Heartbeat::decode(payload).ok()
                }
                _ => None,
            })
            .expect("heartbeat published");
        assert_eq!(first_gossip.topic_hash, x_hash);
    }

    #[test]
    fn test_own_source_id_reports_collision() {
        let mut node = SimNode::new(1, Config::new(1).with_node_id(9), Timestamp::ZERO);
        node.deliver(
            9,
            Outgoing::Publish {
                subject_id: 7509,
                discriminator: 0,
                priority: Priority::Nominal,
                transfer_id: 0,
                payload: vec![],
            },
            Timestamp::from_millis(1),
        );
        // The next update relinquishes the ID and, with the heartbeat
        // now due, immediately allocates a fresh one from the filter.
        node.tick(Timestamp::from_millis(2)).unwrap();
        assert!(node.node.has_node_id());
        assert_ne!(node.node.node_id(), Some(9));
        assert_eq!(node.bound_node_id(), node.node.node_id());
    }
}
