//! Core types and constants for the namecast protocol.

use alloc::vec::Vec;
use core::fmt;

use crate::time::{Duration, Timestamp};

/// Maximum length of a canonical topic name in bytes.
///
/// A middle ground between worst-case gossip traffic and longest-name
/// support. On CAN-class transports names should be short to keep the
/// heartbeat within a few frames.
pub const TOPIC_NAME_MAX: usize = 96;

/// Maximum length of a namespace. Leaves room for a separator and a
/// one-character topic name within [`TOPIC_NAME_MAX`].
pub const NAMESPACE_NAME_MAX: usize = TOPIC_NAME_MAX - 2;

/// Default transfer-ID timeout for subscriptions.
pub const TRANSFER_ID_TIMEOUT_DEFAULT: Duration = Duration::from_secs(2);

/// Initial listen-only delay bounds for nodes without an explicit node-ID.
/// While waiting, the node learns occupied node-IDs from inbound traffic.
pub const START_DELAY_MIN: Duration = Duration::from_secs(1);
pub const START_DELAY_MAX: Duration = Duration::from_secs(3);

/// Size of the dynamically allocated subject-ID pool. The range must be
/// identical across the whole network.
pub const TOPIC_SUBJECT_COUNT: u64 = 6144;

/// Width of the subject-ID field; the low bits of the name hash feed the
/// subject-ID formula, the high bits form the discriminator.
pub const SUBJECT_BITS: u32 = 13;

/// Total number of subject-IDs; pinned topics may sit anywhere below this.
pub const TOTAL_SUBJECT_COUNT: u64 = 1 << SUBJECT_BITS;

/// Responses to messages published on a topic are delivered as RPC
/// *request* transfers to this service-ID. The first 8 bytes of the
/// payload carry the full topic hash; the receiver matches the response
/// to a pending future by the masked transfer-ID.
pub const RPC_SERVICE_ID_TOPIC_RESPONSE: u16 = 510;

/// Default pinned heartbeat topic name. All nodes must use the same one.
pub const HEARTBEAT_TOPIC_NAME_DEFAULT: &str = "/7509";

/// Transfer priority levels, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    #[default]
    Nominal = 4,
    Low = 5,
    Slow = 6,
    Optional = 7,
}

/// Handle to a topic registered with a node.
///
/// Handles stay valid until the topic is destroyed; using a stale handle
/// is detected and reported as an argument error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicId(pub(crate) u64);

/// Handle to a pending response future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutureId(pub(crate) u64);

/// Metadata accompanying a transfer on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferMetadata {
    pub priority: Priority,
    pub remote_node_id: u16,
    pub transfer_id: u64,
}

/// A received transfer. The payload is owned; ownership moves into the
/// node on ingestion and back out through the application event queue.
#[derive(Debug, Clone)]
pub struct OwnedTransfer {
    /// Reception timestamp assigned by the transport.
    pub timestamp: Timestamp,
    pub metadata: TransferMetadata,
    pub payload: Vec<u8>,
}

/// Events surfaced to the application, drained with [`Node::poll_event`].
///
/// [`Node::poll_event`]: crate::node::Node::poll_event
#[derive(Debug, Clone)]
pub enum Event {
    /// A transfer arrived on a subscribed topic. Payload ownership is
    /// transferred to the application.
    MessageReceived {
        topic: TopicId,
        transfer: OwnedTransfer,
    },
    /// A response matched a pending future. The future is retired; the
    /// 8-byte topic hash prefix has been stripped from the payload.
    ResponseReceived {
        future: FutureId,
        topic: TopicId,
        transfer: OwnedTransfer,
    },
    /// A future's response deadline passed. The future is retired.
    FutureTimedOut { future: FutureId, topic: TopicId },
    /// The node acquired a node-ID (explicitly claimed or auto-allocated).
    NodeIdAcquired { node_id: u16 },
}

/// Error type for node operations.
///
/// `E` is the transport's error type; transport failures are forwarded
/// verbatim so the embedder can react to its own error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// Null, malformed, or stale input (unknown handle, zero UID).
    Argument,
    /// Local capacity exhausted (topic table full, transfer-ID in flight).
    Capacity,
    /// Topic name is invalid or not unique.
    Name,
    /// The operation requires a node-ID which is not allocated yet.
    Anonymous,
    /// Error forwarded from the transport layer.
    Transport(E),
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Argument => write!(f, "malformed or stale argument"),
            Error::Capacity => write!(f, "local capacity exhausted"),
            Error::Name => write!(f, "invalid or non-unique topic name"),
            Error::Anonymous => write!(f, "node-ID not allocated"),
            Error::Transport(e) => write!(f, "transport error: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Exceptional < Priority::Nominal);
        assert!(Priority::Nominal < Priority::Optional);
        assert_eq!(Priority::default(), Priority::Nominal);
    }

    #[test]
    fn test_subject_constants() {
        assert_eq!(TOTAL_SUBJECT_COUNT, 8192);
        assert!(TOPIC_SUBJECT_COUNT < TOTAL_SUBJECT_COUNT);
    }

    #[test]
    fn test_error_display() {
        let e: Error<&str> = Error::Transport("enospc");
        assert_eq!(std::format!("{}", e), "transport error: \"enospc\"");
        let e: Error<&str> = Error::Name;
        assert_eq!(std::format!("{}", e), "invalid or non-unique topic name");
    }
}
