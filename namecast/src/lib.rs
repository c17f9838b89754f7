//! namecast - decentralized named-topic allocation for numeric-subject
//! publish/subscribe buses.
//!
//! The underlying transport knows only numeric subject identifiers
//! (0..8191) and numeric node identifiers; applications want to address
//! data streams by hierarchical names like `/sensors/imu/accel`. This
//! crate lets every participant independently agree, without a central
//! broker, on:
//!
//! - a unique node identifier in a bounded range,
//! - a consistent topic-name → subject-ID mapping across the network,
//! - timely repair of that mapping when collisions or divergent
//!   allocations are discovered.
//!
//! Agreement rides on a CRDT gossip payload piggy-backed on a periodic
//! heartbeat; deterministic merge rules applied on reception make the
//! mapping eventually consistent once the network is connected.
//!
//! # Key properties
//!
//! - Single-threaded, non-suspending: the embedder drives everything
//!   through `update` / `ingest_*` / `poll_event`
//! - Platform access via traits ([`Transport`], [`Random`], [`Clock`])
//! - Pinned topics (decimal names below 8192) bypass allocation
//! - `no_std` + `alloc`; no internal tasks, channels, or locks
//!
//! # Example
//!
//! ```ignore
//! use namecast::{Config, Node};
//!
//! // Implement Transport, Random, and Clock for your platform...
//! let mut node = Node::new(transport, random, clock, Config::new(uid))?;
//! let topic = node.create_topic("telemetry/imu")?;
//!
//! loop {
//!     // Route received transfers into the node...
//!     node.update()?;
//!     while let Some(event) = node.poll_event() {
//!         // React to messages, responses, timeouts.
//!     }
//! }
//! ```
//!
//! # Module structure
//!
//! - [`types`] - Core types and constants
//! - [`time`] - Microsecond timestamps and durations
//! - [`name`] - Name canonicalization and hashing
//! - [`bloom`] - Node-ID occupancy filter
//! - [`wire`] - Heartbeat wire codec
//! - [`platform`] - Transport/Random/Clock traits
//! - [`node`] - The coordination node and driver loop
//! - [`topic`] - Topic state and arbitration rules
//! - [`config`] - Construction-time configuration

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(feature = "trace")]
macro_rules! trace {
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}
#[cfg(not(feature = "trace"))]
macro_rules! trace {
    ($($arg:tt)*) => {
        if false {
            let _ = ::core::format_args!($($arg)*);
        }
    };
}

pub mod bloom;
pub mod collections;
pub mod config;
pub mod name;
pub mod node;
pub mod platform;
pub mod time;
pub mod topic;
pub mod types;
pub mod wire;

mod allocator;
mod futures;
mod gossip;
mod nodeid;

// Re-export main types at crate root
pub use bloom::Bloom64;
pub use config::Config;
pub use node::Node;
pub use platform::{Clock, Random, Transport};
pub use time::{Duration, Timestamp};
pub use topic::Topic;
pub use types::{
    Error, Event, FutureId, OwnedTransfer, Priority, TopicId, TransferMetadata,
    HEARTBEAT_TOPIC_NAME_DEFAULT, RPC_SERVICE_ID_TOPIC_RESPONSE, TOPIC_NAME_MAX,
    TOPIC_SUBJECT_COUNT, TRANSFER_ID_TIMEOUT_DEFAULT,
};
