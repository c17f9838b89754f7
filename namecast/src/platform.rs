//! Platform traits for transport, time, and randomness abstraction.
//!
//! These traits let the protocol run on different:
//! - Transport layers (UDP, CAN, serial) with their glue libraries
//! - Clock sources (OS monotonic clock, MCU timer, simulated time)
//! - Entropy sources (TRNG, seeded PRNG)
//!
//! The node is generic over all three; a deployment injects concrete
//! implementations at construction. All hooks are invoked from the
//! embedder's thread, never concurrently.

use core::fmt::Debug;

use crate::time::{Duration, Timestamp};
use crate::types::{Priority, TransferMetadata};

/// Transport trait for the pub/sub bus backend.
///
/// The transport addresses data streams by numeric subject-ID only; the
/// node maintains the name → subject-ID mapping on top of it.
pub trait Transport {
    /// Transport-specific error type, forwarded verbatim to the embedder.
    type Error: Debug;

    /// Highest valid node-ID: 127 for CAN-class transports, 65534 for
    /// UDP/serial-class transports.
    fn node_id_max(&self) -> u16;

    /// Mask applied to transfer-IDs when matching responses to pending
    /// futures. 31 on CAN (5-bit cyclic counter), `u64::MAX` elsewhere.
    /// Always one less than a power of two.
    fn transfer_id_mask(&self) -> u64;

    /// Size of the node-ID occupancy Bloom filter in bits, a multiple of
    /// 64. This bounds the number of concurrently observable neighbors;
    /// 128 bits suit CAN, 4096-8192 bits everything else.
    fn node_id_bloom_bits(&self) -> usize {
        8192
    }

    /// Adopt a node-ID. Invoked from construction when an explicit ID is
    /// given, or from `update` when one is auto-allocated. Never invoked
    /// while an ID is already bound.
    fn node_id_set(&mut self, node_id: u16) -> Result<(), Self::Error>;

    /// Abandon the current node-ID. Invoked only on a node-ID collision;
    /// in a well-managed network this never happens. Never invoked
    /// unless an ID is currently bound.
    fn node_id_clear(&mut self);

    /// Send an RPC request transfer to the given service on the peer
    /// named in the metadata.
    fn request(
        &mut self,
        service_id: u16,
        metadata: TransferMetadata,
        tx_deadline: Timestamp,
        payload: &[u8],
    ) -> Result<(), Self::Error>;

    /// Publish a message on a subject. The node manages the transfer-ID
    /// counter; the transport must not increment it.
    fn topic_publish(
        &mut self,
        subject_id: u16,
        discriminator: u64,
        priority: Priority,
        transfer_id: u64,
        tx_deadline: Timestamp,
        payload: &[u8],
    ) -> Result<(), Self::Error>;

    /// Create a subscription on a subject.
    fn topic_subscribe(
        &mut self,
        subject_id: u16,
        discriminator: u64,
        extent: usize,
        transfer_id_timeout: Duration,
    ) -> Result<(), Self::Error>;

    /// Destroy an existing subscription. Infallible.
    fn topic_unsubscribe(&mut self, subject_id: u16);

    /// Invoked when the node moved a topic to a new subject-ID and the
    /// re-subscription failed. The topic is left unsubscribed; the node
    /// retries only on the next reallocation. The embedder may repair
    /// out of band and call `subscribe` again.
    fn handle_resubscription_error(&mut self, subject_id: u16, error: Self::Error) {
        let _ = (subject_id, error);
    }
}

/// Entropy source.
///
/// A TRNG is preferred; a PRNG suffices if its state is likely distinct
/// across quick reboots. The node hashes every value with the local UID
/// for whitening, so nodes sharing one PRNG sequence still diverge.
pub trait Random {
    /// Produce a raw 64-bit value.
    fn next_u64(&mut self) -> u64;
}

/// Monotonic time source.
pub trait Clock {
    /// Current monotonic time in microseconds, non-negative at start.
    fn now(&self) -> Timestamp;
}

#[cfg(test)]
pub mod test_impls {
    //! Deterministic platform implementations for unit testing.

    use super::*;
    use alloc::vec::Vec;
    use std::cell::Cell;
    use std::rc::Rc;

    /// One transport publish recorded by [`MockTransport`].
    #[derive(Debug, Clone)]
    pub struct SentMessage {
        pub subject_id: u16,
        pub discriminator: u64,
        pub priority: Priority,
        pub transfer_id: u64,
        pub tx_deadline: Timestamp,
        pub payload: Vec<u8>,
    }

    /// One RPC request recorded by [`MockTransport`].
    #[derive(Debug, Clone)]
    pub struct SentRequest {
        pub service_id: u16,
        pub metadata: TransferMetadata,
        pub tx_deadline: Timestamp,
        pub payload: Vec<u8>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockTransportError;

    /// Mock transport recording every call for inspection.
    pub struct MockTransport {
        pub node_id_max: u16,
        pub transfer_id_mask: u64,
        pub bloom_bits: usize,
        pub bound_node_id: Option<u16>,
        pub sent: Vec<SentMessage>,
        pub requests: Vec<SentRequest>,
        pub subscriptions: Vec<u16>,
        pub resubscription_errors: Vec<u16>,
        /// When set, `topic_subscribe` fails.
        pub fail_subscribe: bool,
        /// When set, `topic_publish` fails.
        pub fail_publish: bool,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                node_id_max: 65534,
                transfer_id_mask: u64::MAX,
                bloom_bits: 128,
                bound_node_id: None,
                sent: Vec::new(),
                requests: Vec::new(),
                subscriptions: Vec::new(),
                resubscription_errors: Vec::new(),
                fail_subscribe: false,
                fail_publish: false,
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn can_like() -> Self {
            Self {
                node_id_max: 127,
                transfer_id_mask: 31,
                bloom_bits: 128,
                ..Self::default()
            }
        }
    }

    impl Transport for MockTransport {
        type Error = MockTransportError;

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
            tx_deadline: Timestamp,
            payload: &[u8],
        ) -> Result<(), Self::Error> {
            self.requests.push(SentRequest {
                service_id,
                metadata,
                tx_deadline,
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
            tx_deadline: Timestamp,
            payload: &[u8],
        ) -> Result<(), Self::Error> {
            if self.fail_publish {
                return Err(MockTransportError);
            }
            self.sent.push(SentMessage {
                subject_id,
                discriminator,
                priority,
                transfer_id,
                tx_deadline,
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
            if self.fail_subscribe {
                return Err(MockTransportError);
            }
            self.subscriptions.push(subject_id);
            Ok(())
        }

        fn topic_unsubscribe(&mut self, subject_id: u16) {
            if let Some(pos) = self.subscriptions.iter().position(|&s| s == subject_id) {
                self.subscriptions.remove(pos);
            }
        }

        fn handle_resubscription_error(&mut self, subject_id: u16, _error: Self::Error) {
            self.resubscription_errors.push(subject_id);
        }
    }

    /// Mock random (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self { state: 12345 }
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Random for MockRandom {
        fn next_u64(&mut self) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            self.state
        }
    }

    /// Mock clock sharing its cell with the test body, so time can be
    /// advanced while the node owns the clock.
    #[derive(Clone)]
    pub struct MockClock {
        current: Rc<Cell<Timestamp>>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self {
                current: Rc::new(Cell::new(Timestamp::ZERO)),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            self.current.get()
        }
    }
}
