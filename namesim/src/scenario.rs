//! Scenario builder and end-to-end protocol scenarios.

use namecast::{Config, Duration};

use crate::sim::Simulator;

/// Builder for multi-node simulation scenarios.
pub struct ScenarioBuilder {
    /// Number of nodes to create.
    num_nodes: usize,
    /// Base seed for deterministic entropy and UIDs.
    seed: u64,
    /// Assign node-IDs 1..=N at construction instead of auto-allocating.
    explicit_node_ids: bool,
    /// One-way bus delivery delay.
    delay: Duration,
}

impl ScenarioBuilder {
    /// Create a scenario with the specified number of nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            explicit_node_ids: false,
            delay: Duration::from_millis(1),
        }
    }

    /// Set the base seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Give every node an explicit node-ID (1..=N), skipping the
    /// listen-and-allocate phase.
    pub fn with_explicit_node_ids(mut self) -> Self {
        self.explicit_node_ids = true;
        self
    }

    /// Set the bus delivery delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Build the simulator with all nodes attached.
    pub fn build(self) -> Simulator {
        let mut sim = Simulator::new().with_delay(self.delay);
        for i in 0..self.num_nodes {
            let uid = self.seed.wrapping_mul(1000).wrapping_add(i as u64 + 1);
            let mut config = Config::new(uid);
            if self.explicit_node_ids {
                config = config.with_node_id(i as u16 + 1);
            }
            sim.add_node(self.seed.wrapping_add(i as u64 * 1000), config);
        }
        sim
    }
}
