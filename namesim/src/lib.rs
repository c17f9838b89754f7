//! namesim - discrete event network simulator for namecast testing.
//!
//! Drives many namecast nodes in a single process with deterministic,
//! discrete-event timing - no real-time delays. The simulated bus
//! broadcasts published messages to every connected node subscribed to
//! the subject and unicasts topic responses by node-ID, with a
//! configurable delivery delay and partition/heal control.
//!
//! # Example
//!
//! ```
//! use namesim::{ScenarioBuilder};
//! use namecast::Duration;
//!
//! let mut sim = ScenarioBuilder::new(3).with_explicit_node_ids().build();
//! let topic = sim.node_mut(0).node.create_topic("demo").unwrap();
//! sim.run_for(Duration::from_secs(2));
//! assert!(sim.node(0).node.topic_subject_id(topic).is_some());
//! ```
//!
//! # Architecture
//!
//! An ordered-map timeline keyed by `(time, insertion sequence)` drives
//! the loop:
//! 1. Pop the earliest event and advance simulation time
//! 2. Process it (node update tick, bus delivery, scenario action)
//! 3. Collect transfers the node emitted
//! 4. Route them through the bus, scheduling deliveries
//!
//! The simulator calls the node entry points (`update`,
//! `ingest_topic_transfer`, `ingest_topic_response_transfer`) directly;
//! there is no real transport underneath.

pub mod event;
pub mod node;
pub mod scenario;
pub mod sim;

pub use event::{Outgoing, ScenarioAction, SimEvent};
pub use node::{SimNode, SimTransport};
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
