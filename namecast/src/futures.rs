//! Response futures: publish-with-response, matching, and timeouts.
//!
//! A publisher expecting responses registers a future under the masked
//! transfer-ID of the outgoing message. Responders send an RPC request
//! to the topic-response service with the 8-byte topic hash prepended to
//! the payload; the publisher matches it back to the future by topic
//! hash and masked transfer-ID. Futures that see no response by their
//! deadline fail on a later `update`.

use alloc::vec::Vec;

use crate::platform::{Clock, Random, Transport};
use crate::time::Timestamp;
use crate::types::{
    Error, Event, FutureId, OwnedTransfer, TopicId, TransferMetadata,
    RPC_SERVICE_ID_TOPIC_RESPONSE,
};

/// Registry record for one pending future. A record exists exactly while
/// the future is pending; completion removes it and emits an event.
#[derive(Debug)]
pub(crate) struct FutureRecord {
    pub(crate) topic: TopicId,
    pub(crate) transfer_id_masked: u64,
    pub(crate) deadline: Timestamp,
    pub(crate) deadline_seq: u64,
}

impl<T, R, C> crate::node::Node<T, R, C>
where
    T: Transport,
    R: Random,
    C: Clock,
{
    /// Publish a message on a topic, optionally expecting a response.
    ///
    /// With `response_deadline` set, the returned [`FutureId`] resolves
    /// through [`Event::ResponseReceived`] or [`Event::FutureTimedOut`].
    /// A deadline in the past still publishes; the future then times out
    /// on the next `update`. Publishing requires an allocated node-ID.
    ///
    /// The transfer-ID is incremented even when the transport fails, to
    /// signal lost messages; the future registration is rolled back in
    /// that case. Exactly one transfer is emitted, no auxiliary traffic.
    pub fn publish(
        &mut self,
        id: TopicId,
        tx_deadline: Timestamp,
        payload: &[u8],
        response_deadline: Option<Timestamp>,
    ) -> Result<Option<FutureId>, Error<T::Error>> {
        if self.node_id.is_none() {
            return Err(Error::Anonymous);
        }
        let Some(topic) = self.topics.get_mut(&id) else {
            return Err(Error::Argument);
        };
        topic.publishing = true;
        let transfer_id = topic.pub_transfer_id;
        let masked = transfer_id & self.transport.transfer_id_mask();
        let subject_id = topic.subject_id(self.preferred_subject_id);
        let discriminator = topic.discriminator();
        let priority = topic.pub_priority;

        // Register the expectation before sending: with a cyclic
        // transfer-ID space the masked ID may still be in flight, and
        // that must fail the publish before anything hits the wire.
        let future = match response_deadline {
            Some(deadline) => {
                if topic.futures_by_transfer_id.contains_key(&masked) {
                    return Err(Error::Capacity);
                }
                let future_id = FutureId(self.next_future_id);
                self.next_future_id += 1;
                topic.futures_by_transfer_id.insert(masked, future_id);
                Some((future_id, deadline))
            }
            None => None,
        };

        let result = self.transport.topic_publish(
            subject_id,
            discriminator,
            priority,
            transfer_id,
            tx_deadline,
            payload,
        );

        let registered = match (&result, future) {
            (Ok(()), Some((future_id, deadline))) => {
                let deadline_seq = self.futures_by_deadline.insert(deadline, future_id);
                self.futures.insert(
                    future_id,
                    FutureRecord {
                        topic: id,
                        transfer_id_masked: masked,
                        deadline,
                        deadline_seq,
                    },
                );
                Some(future_id)
            }
            (Err(_), Some((_, _))) => {
                self.topic_mut(id).futures_by_transfer_id.remove(&masked);
                None
            }
            (_, None) => None,
        };

        self.topic_mut(id).pub_transfer_id = transfer_id.wrapping_add(1);
        result.map_err(Error::Transport)?;
        Ok(registered)
    }

    /// Send a response to a message received on a topic. The response
    /// goes point-to-point to the original publisher; other subscribers
    /// never see it. Pass the metadata of the received transfer — the
    /// transfer-ID is reused for matching, not incremented.
    ///
    /// Works from any point after reception; the topic may even have
    /// been reallocated in between, the hash prefix still matches.
    pub fn respond(
        &mut self,
        id: TopicId,
        tx_deadline: Timestamp,
        metadata: TransferMetadata,
        payload: &[u8],
    ) -> Result<(), Error<T::Error>> {
        if self.node_id.is_none() {
            return Err(Error::Anonymous);
        }
        let Some(topic) = self.topics.get(&id) else {
            return Err(Error::Argument);
        };
        let mut framed = Vec::with_capacity(8 + payload.len());
        framed.extend_from_slice(&topic.hash().to_le_bytes());
        framed.extend_from_slice(payload);
        self.transport
            .request(RPC_SERVICE_ID_TOPIC_RESPONSE, metadata, tx_deadline, &framed)
            .map_err(Error::Transport)
    }

    /// Cancel a pending future without firing its event. Needed only
    /// when the caller stops caring before completion; unknown (already
    /// completed) futures are ignored.
    pub fn future_cancel(&mut self, future_id: FutureId) {
        if let Some(record) = self.futures.remove(&future_id) {
            self.futures_by_deadline
                .remove(record.deadline, record.deadline_seq);
            self.topic_mut(record.topic)
                .futures_by_transfer_id
                .remove(&record.transfer_id_masked);
        }
    }

    /// Ingest a response transfer delivered on the topic-response RPC
    /// service. The first 8 bytes of the payload carry the topic hash;
    /// unknown topics, unmatched transfer-IDs, and duplicates are
    /// silently dropped.
    pub fn ingest_topic_response_transfer(&mut self, mut transfer: OwnedTransfer) {
        self.mark_neighbor(transfer.metadata.remote_node_id);

        if transfer.payload.len() < 8 {
            return; // Malformed: the hash prefix is mandatory.
        }
        let mut hash_bytes = [0u8; 8];
        hash_bytes.copy_from_slice(&transfer.payload[..8]);
        let topic_hash = u64::from_le_bytes(hash_bytes);

        let Some(topic_id) = self.find_topic_by_hash(topic_hash) else {
            return;
        };
        let masked = transfer.metadata.transfer_id & self.transport.transfer_id_mask();
        let Some(&future_id) = self
            .topic_ref(topic_id)
            .futures_by_transfer_id
            .get(&masked)
        else {
            return; // Unexpected or duplicate response.
        };

        self.topic_mut(topic_id)
            .futures_by_transfer_id
            .remove(&masked);
        if let Some(record) = self.futures.remove(&future_id) {
            self.futures_by_deadline
                .remove(record.deadline, record.deadline_seq);
        }
        transfer.payload.drain(..8);
        self.events.push_back(Event::ResponseReceived {
            future: future_id,
            topic: topic_id,
            transfer,
        });
    }

    /// Fail every future whose deadline has passed. The index minimum is
    /// re-read after each retirement rather than held across iterations;
    /// the embedder may mutate the registry from the event it receives.
    pub(crate) fn sweep_timed_out_futures(&mut self, now: Timestamp) {
        loop {
            let due = match self.futures_by_deadline.min() {
                Some((deadline, seq, &future_id)) if deadline < now => {
                    Some((deadline, seq, future_id))
                }
                _ => None,
            };
            let Some((deadline, seq, future_id)) = due else {
                break;
            };
            self.futures_by_deadline.remove(deadline, seq);
            let Some(record) = self.futures.remove(&future_id) else {
                continue;
            };
            self.topic_mut(record.topic)
                .futures_by_transfer_id
                .remove(&record.transfer_id_masked);
            self.events.push_back(Event::FutureTimedOut {
                future: future_id,
                topic: record.topic,
            });
        }
    }
}
