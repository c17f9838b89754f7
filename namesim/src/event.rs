//! Bus and control events processed by the simulator.
//!
//! The simulator keeps its timeline in an ordered map keyed by
//! `(time, insertion sequence)`, so same-time events run in the order
//! they were scheduled; these enums are the vocabulary of that timeline.

use namecast::{Priority, TransferMetadata};

/// One transfer emitted by a simulated node, captured for bus routing.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// A message published on a subject.
    Publish {
        subject_id: u16,
        discriminator: u64,
        priority: Priority,
        transfer_id: u64,
        payload: Vec<u8>,
    },
    /// An RPC request addressed to the node in the metadata.
    Request {
        service_id: u16,
        metadata: TransferMetadata,
        payload: Vec<u8>,
    },
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the bus into isolated groups of node indices.
    Partition { groups: Vec<Vec<usize>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
}

/// Everything the simulator schedules on its timeline.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Deliver a transfer emitted by another node.
    Deliver {
        to: usize,
        from: usize,
        from_node_id: u16,
        outgoing: Outgoing,
    },
    /// Drive one node's periodic update.
    Tick { node: usize },
    /// Execute a scenario action.
    Action(ScenarioAction),
}
