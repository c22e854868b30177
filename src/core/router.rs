// Copyright (c) 2026 Emberlink
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Routing engine: one bounded-work decision per inbound datagram, plus
//! the originator protocol for SOS, DIRECT, and ACK.
//!
//! The engine never blocks on I/O. It is a pure decision function over
//! the local node id and the caller-supplied wall clock; its only side
//! effects are the duplicate cache and the drop counters. Datagram state
//! is terminal in one pass: NEW -> VALIDATED -> DECRYPTED -> {DELIVERED,
//! RELAYED, DELIVERED+RELAYED, DROPPED}.

use crate::core::codec::{CodecError, Frame};
use crate::core::dup_cache::DuplicateCache;
use crate::core::types::{
    AckRecord, DatagramKind, DirectRecord, GeoLocation, InnerRecord, MessageId, NetworkKey,
    NodeId, Recipient, SosRecord, SosType,
};
use crate::monitoring::metrics::Metrics;
use std::sync::Arc;
use tracing::debug;

/// Why a datagram was silently discarded. Each reason has a dedicated
/// metrics counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// CRC mismatch or unparseable header.
    Checksum,
    /// Structurally invalid frame or record schema violation.
    Malformed,
    /// Kind byte out of range.
    UnknownKind,
    /// Timestamp outside the freshness window (replay guard).
    Stale,
    /// Already seen this (message id, sender id) pair.
    Duplicate,
    /// Payload does not open under the local network key.
    Decrypt,
    /// Hop budget exhausted at a non-delivering node.
    TtlExhausted,
}

/// The routing verdict for one ingested datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Discard; no further action.
    Drop(DropReason),
    /// Surface to the local application only.
    Deliver,
    /// Re-emit only.
    Relay,
    /// Surface locally and re-emit.
    DeliverAndRelay,
}

/// Everything the controller needs to dispatch one ingest.
#[derive(Debug)]
pub struct IngestOutcome {
    /// The verdict.
    pub decision: Decision,
    /// Originator-assigned message id (available once the header parsed).
    pub message_id: Option<MessageId>,
    /// Hops traversed by the arriving copy.
    pub hop_count: u8,
    /// Decrypted record, present when delivering.
    pub delivery: Option<InnerRecord>,
    /// Fresh RELAY copy for the wire, present when relaying.
    pub relay: Option<Frame>,
    /// ACK to originate (a DIRECT was delivered to this node), already
    /// self-marked in the duplicate cache.
    pub ack: Option<Frame>,
}

impl IngestOutcome {
    fn drop(reason: DropReason, message_id: Option<MessageId>) -> Self {
        Self {
            decision: Decision::Drop(reason),
            message_id,
            hop_count: 0,
            delivery: None,
            relay: None,
            ack: None,
        }
    }
}

/// Tunables for the engine, lifted from [`MeshConfig`](crate::core::config::MeshConfig).
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Local node id; deliveries match against this.
    pub local_id: NodeId,
    /// Hop budget for originated datagrams.
    pub initial_ttl: u8,
    /// Freshness window in ms (|now - datagram.timestamp| must not exceed it).
    pub timestamp_tolerance_ms: u64,
}

/// The per-node routing engine.
pub struct RoutingEngine {
    cfg: RouterConfig,
    key: NetworkKey,
    cache: Arc<DuplicateCache>,
    metrics: Arc<Metrics>,
}

impl RoutingEngine {
    /// Create an engine over a shared duplicate cache.
    pub fn new(
        cfg: RouterConfig,
        key: NetworkKey,
        cache: Arc<DuplicateCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cfg,
            key,
            cache,
            metrics,
        }
    }

    /// Local node id.
    pub fn local_id(&self) -> NodeId {
        self.cfg.local_id
    }

    /// Ingest one inbound datagram and decide deliver / relay / both /
    /// neither. `now_ms` is the caller's wall clock.
    pub fn ingest(&self, bytes: &[u8], now_ms: u64) -> IngestOutcome {
        // 1. Structure and checksum.
        let frame = match Frame::parse(bytes) {
            Ok(f) => f,
            Err(e) => {
                let reason = Self::parse_drop_reason(e);
                self.count_drop(reason);
                debug!(?reason, "inbound frame rejected");
                return IngestOutcome::drop(reason, None);
            }
        };
        let message_id = frame.message_id;

        // 2. Freshness (replay guard). The edge of the window is accepted.
        let ts_ms = u64::from(frame.timestamp) * 1000;
        if now_ms.abs_diff(ts_ms) > self.cfg.timestamp_tolerance_ms {
            self.count_drop(DropReason::Stale);
            debug!(%message_id, "stale datagram dropped");
            return IngestOutcome::drop(DropReason::Stale, Some(message_id));
        }

        // 3. Duplicate suppression. Marked before decryption on purpose: a
        // malformed duplicate of this datagram must also be dropped.
        if self.cache.mark_and_check(&frame.duplicate_key(), now_ms) {
            self.count_drop(DropReason::Duplicate);
            return IngestOutcome::drop(DropReason::Duplicate, Some(message_id));
        }

        // 4-5. Decrypt and schema-check.
        let record = match frame.open(&self.key) {
            Ok(r) => r,
            Err(e) => {
                let reason = if e == CodecError::DecryptFailed {
                    DropReason::Decrypt
                } else {
                    DropReason::Malformed
                };
                self.count_drop(reason);
                debug!(%message_id, ?reason, "payload rejected");
                return IngestOutcome::drop(reason, Some(message_id));
            }
        };

        // 6. Addressing. Policy keys on the record's semantic kind: the
        // header kind of every relayed copy is RELAY.
        let for_me = record.recipient() == Recipient::Node(self.cfg.local_id);
        let broadcast = record.recipient().is_broadcast();
        let semantic = record.kind();

        // 7. Delivery, and an ACK when a DIRECT reached its destination.
        let deliver = for_me || broadcast;
        let ack = if deliver && semantic == DatagramKind::Direct && for_me {
            Some(self.originate_ack(&record, message_id, now_ms))
        } else {
            None
        };

        // 8. Relay policy. SOS floods even when delivered locally; unicast
        // kinds (DIRECT and its ACK) relay while in transit.
        let should_relay = frame.ttl > 0
            && (semantic == DatagramKind::Sos
                || broadcast
                || (!for_me
                    && (semantic == DatagramKind::Direct || semantic == DatagramKind::Ack)));

        if !deliver && !should_relay {
            self.count_drop(DropReason::TtlExhausted);
            debug!(%message_id, ttl = frame.ttl, "ttl exhausted");
            return IngestOutcome::drop(DropReason::TtlExhausted, Some(message_id));
        }

        // 9. Relay copy: hop consumed, same id/sender/ciphertext.
        let relay = if should_relay {
            self.metrics.relayed_total.inc();
            Some(frame.relay_copy())
        } else {
            None
        };
        if deliver {
            self.metrics.delivered_total.inc();
        }

        let decision = match (deliver, relay.is_some()) {
            (true, true) => Decision::DeliverAndRelay,
            (true, false) => Decision::Deliver,
            (false, true) => Decision::Relay,
            (false, false) => unreachable!("drop handled above"),
        };

        IngestOutcome {
            decision,
            message_id: Some(message_id),
            hop_count: frame.hop_count,
            delivery: deliver.then_some(record),
            relay,
            ack,
        }
    }

    /// Originate an SOS broadcast. The frame is marked in the duplicate
    /// cache before it is handed out, so the echo from a neighbor cannot
    /// loop back.
    pub fn originate_sos(
        &self,
        content: &str,
        location: GeoLocation,
        sos_type: SosType,
        now_ms: u64,
    ) -> Result<Frame, CodecError> {
        let record = InnerRecord::Sos(SosRecord {
            sender: self.cfg.local_id,
            recipient: Recipient::Broadcast,
            content: content.to_string(),
            location,
            priority: 5,
            timestamp: now_ms / 1000,
            sos_type,
        });
        self.originate(DatagramKind::Sos, record, now_ms)
    }

    /// Originate a DIRECT note to one peer.
    pub fn originate_direct(
        &self,
        recipient: NodeId,
        content: &str,
        now_ms: u64,
    ) -> Result<Frame, CodecError> {
        let record = InnerRecord::Direct(DirectRecord {
            sender: self.cfg.local_id,
            recipient: Recipient::Node(recipient),
            content: content.to_string(),
            priority: 3,
            timestamp: now_ms / 1000,
        });
        self.originate(DatagramKind::Direct, record, now_ms)
    }

    fn originate_ack(&self, delivered: &InnerRecord, original: MessageId, now_ms: u64) -> Frame {
        let record = InnerRecord::Ack(AckRecord {
            sender: self.cfg.local_id,
            recipient: Recipient::Node(delivered.sender()),
            original_message_id: original,
            priority: 2,
            timestamp: now_ms / 1000,
        });
        // An ACK record has a bounded shape; seal can only fail on
        // oversized payloads, which cannot happen here.
        self.originate(DatagramKind::Ack, record, now_ms)
            .expect("ack records always fit one datagram")
    }

    fn originate(
        &self,
        kind: DatagramKind,
        record: InnerRecord,
        now_ms: u64,
    ) -> Result<Frame, CodecError> {
        let message_id = MessageId::generate();
        let frame = Frame::seal(
            kind,
            message_id,
            0,
            self.cfg.initial_ttl,
            (now_ms / 1000) as u32,
            self.cfg.local_id,
            &record,
            &self.key,
        )?;
        self.cache.mark_and_check(&frame.duplicate_key(), now_ms);
        self.metrics.originated_total.inc();
        Ok(frame)
    }

    fn parse_drop_reason(e: CodecError) -> DropReason {
        match e {
            CodecError::BadChecksum => DropReason::Checksum,
            CodecError::UnknownKind => DropReason::UnknownKind,
            _ => DropReason::Malformed,
        }
    }

    fn count_drop(&self, reason: DropReason) {
        match reason {
            DropReason::Checksum => self.metrics.drop_checksum_total.inc(),
            DropReason::Malformed => self.metrics.drop_malformed_total.inc(),
            DropReason::UnknownKind => self.metrics.drop_unknown_kind_total.inc(),
            DropReason::Stale => self.metrics.drop_stale_total.inc(),
            DropReason::Duplicate => self.metrics.drop_duplicate_total.inc(),
            DropReason::Decrypt => self.metrics.drop_decrypt_total.inc(),
            DropReason::TtlExhausted => self.metrics.drop_ttl_total.inc(),
        }
    }
}
