//! Discrete event simulator for namecast networks.
//!
//! The timeline is an ordered map of events keyed by `(time, insertion
//! sequence)`, driving many nodes in one process with no real-time
//! delays. The main loop pops the earliest entry, advances simulation
//! time, calls the node entry points directly, and routes any transfers
//! the node emitted through the bus: published messages broadcast to
//! every connected node subscribed to the subject, topic responses
//! unicast to the addressed node-ID.

use std::collections::BTreeMap;

use namecast::{Config, Duration, Timestamp};

use crate::event::{Outgoing, ScenarioAction, SimEvent};
use crate::node::SimNode;

/// Discrete event simulator for a broadcast bus.
pub struct Simulator {
    /// All nodes, indexed by creation order.
    nodes: Vec<SimNode>,
    /// Partition group of each node; equal group = connected.
    groups: Vec<usize>,
    /// Current simulation time.
    current_time: Timestamp,
    /// Timeline keyed by `(time, insertion sequence)`: same-time events
    /// run in the order they were scheduled.
    timeline: BTreeMap<(Timestamp, u64), SimEvent>,
    /// Next insertion sequence number.
    next_seq: u64,
    /// One-way delivery delay on every link.
    delay: Duration,
    /// How often each node's `update` runs.
    tick_interval: Duration,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            groups: Vec::new(),
            current_time: Timestamp::ZERO,
            timeline: BTreeMap::new(),
            next_seq: 0,
            delay: Duration::from_millis(1),
            tick_interval: Duration::from_millis(5),
        }
    }

    /// Set the bus delivery delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a node; returns its index. The first update tick is scheduled
    /// at the current simulation time.
    pub fn add_node(&mut self, seed: u64, config: Config) -> usize {
        let index = self.nodes.len();
        self.nodes.push(SimNode::new(seed, config, self.current_time));
        self.groups.push(0);
        self.schedule(self.current_time, SimEvent::Tick { node: index });
        index
    }

    /// Borrow a node.
    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    /// Borrow a node mutably (to create topics, publish, poll events).
    pub fn node_mut(&mut self, index: usize) -> &mut SimNode {
        &mut self.nodes[index]
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Current simulation time.
    pub fn now(&self) -> Timestamp {
        self.current_time
    }

    /// Whether two nodes can currently hear each other.
    pub fn is_connected(&self, a: usize, b: usize) -> bool {
        self.groups[a] == self.groups[b]
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, SimEvent::Action(action));
    }

    /// Run the simulation until the given time (inclusive).
    pub fn run_until(&mut self, until: Timestamp) {
        while let Some((&(time, _), _)) = self.timeline.first_key_value() {
            if time > until {
                break;
            }
            let ((time, _), event) = self.timeline.pop_first().expect("nonempty timeline");
            debug_assert!(time >= self.current_time);
            self.current_time = time;
            self.handle(event);
        }
        self.current_time = until;
        for node in &self.nodes {
            node.set_time(until);
        }
    }

    /// Run the simulation for the given span.
    pub fn run_for(&mut self, span: Duration) {
        self.run_until(self.current_time + span);
    }

    fn schedule(&mut self, time: Timestamp, event: SimEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timeline.insert((time, seq), event);
    }

    fn handle(&mut self, event: SimEvent) {
        match event {
            SimEvent::Tick { node } => {
                let now = self.current_time;
                // Transport errors surface through the driver; in the
                // simulator they only mean "nothing could be sent yet".
                let _ = self.nodes[node].tick(now);
                self.route_outgoing(node);
                self.schedule(now + self.tick_interval, SimEvent::Tick { node });
            }
            SimEvent::Deliver {
                to,
                from,
                from_node_id,
                outgoing,
            } => {
                // A partition taking effect mid-flight drops the frame.
                if !self.is_connected(from, to) {
                    return;
                }
                let now = self.current_time;
                self.nodes[to].deliver(from_node_id, outgoing, now);
                // Reactions (responses sent from drained events are the
                // embedder's business); protocol-level reactions surface
                // on the node's next tick.
                self.route_outgoing(to);
            }
            SimEvent::Action(action) => self.apply_action(action),
        }
    }

    /// Route everything a node emitted since its last turn.
    pub fn route_outgoing(&mut self, from: usize) {
        let Some(from_node_id) = self.nodes[from].bound_node_id() else {
            debug_assert!(self.nodes[from].node.transport().outgoing.is_empty());
            return;
        };
        let batch = self.nodes[from].take_outgoing();
        for outgoing in batch {
            match &outgoing {
                Outgoing::Publish { .. } => {
                    // Broadcast to every connected peer; subject-level
                    // filtering happens at the receiving transport.
                    for to in 0..self.nodes.len() {
                        if to != from && self.is_connected(from, to) {
                            self.schedule(
                                self.current_time + self.delay,
                                SimEvent::Deliver {
                                    to,
                                    from,
                                    from_node_id,
                                    outgoing: outgoing.clone(),
                                },
                            );
                        }
                    }
                }
                Outgoing::Request { metadata, .. } => {
                    // Unicast to the addressed node-ID.
                    let dest = metadata.remote_node_id;
                    for to in 0..self.nodes.len() {
                        if to != from
                            && self.is_connected(from, to)
                            && self.nodes[to].bound_node_id() == Some(dest)
                        {
                            self.schedule(
                                self.current_time + self.delay,
                                SimEvent::Deliver {
                                    to,
                                    from,
                                    from_node_id,
                                    outgoing: outgoing.clone(),
                                },
                            );
                        }
                    }
                }
            }
        }
    }

    fn apply_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => {
                for (group_id, members) in groups.iter().enumerate() {
                    for &member in members {
                        self.groups[member] = group_id + 1;
                    }
                }
            }
            ScenarioAction::HealPartition => {
                for group in &mut self.groups {
                    *group = 0;
                }
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
