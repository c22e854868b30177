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

use std::sync::Arc;

use emberlink::core::codec::Frame;
use emberlink::core::dup_cache::DuplicateCache;
use emberlink::core::router::{Decision, DropReason, RouterConfig, RoutingEngine};
use emberlink::core::types::{
    AckRecord, DatagramKind, DirectRecord, GeoLocation, InnerRecord, MessageId, NetworkKey,
    NodeId, Recipient, SosRecord, SosType,
};
use emberlink::monitoring::metrics::Metrics;

const TOLERANCE_MS: u64 = 300_000;
const NOW_MS: u64 = 1_700_000_000_000;

fn key() -> NetworkKey {
    NetworkKey::from_bytes(b"shared mesh key!")
}

fn node(n: u8) -> NodeId {
    NodeId::from_bytes([n; 6])
}

fn engine(local: NodeId) -> RoutingEngine {
    engine_with_key(local, key())
}

fn engine_with_key(local: NodeId, key: NetworkKey) -> RoutingEngine {
    RoutingEngine::new(
        RouterConfig {
            local_id: local,
            initial_ttl: 5,
            timestamp_tolerance_ms: TOLERANCE_MS,
        },
        key,
        Arc::new(DuplicateCache::new(500, TOLERANCE_MS)),
        Arc::new(Metrics::new().expect("metrics")),
    )
}

fn sos_from(sender: NodeId, ttl: u8) -> Vec<u8> {
    let record = InnerRecord::Sos(SosRecord {
        sender,
        recipient: Recipient::Broadcast,
        content: "flooding on the north road".to_string(),
        location: GeoLocation {
            latitude: 46.9,
            longitude: 7.44,
        },
        priority: 5,
        timestamp: NOW_MS / 1000,
        sos_type: SosType::General,
    });
    Frame::seal(
        DatagramKind::Sos,
        MessageId::generate(),
        0,
        ttl,
        (NOW_MS / 1000) as u32,
        sender,
        &record,
        &key(),
    )
    .expect("seal")
    .to_bytes()
}

fn direct_from_to(sender: NodeId, to: NodeId, ttl: u8) -> Vec<u8> {
    let record = InnerRecord::Direct(DirectRecord {
        sender,
        recipient: Recipient::Node(to),
        content: "meet at the bridge".to_string(),
        priority: 3,
        timestamp: NOW_MS / 1000,
    });
    Frame::seal(
        DatagramKind::Direct,
        MessageId::generate(),
        0,
        ttl,
        (NOW_MS / 1000) as u32,
        sender,
        &record,
        &key(),
    )
    .expect("seal")
    .to_bytes()
}

fn ack_from_to(sender: NodeId, to: NodeId) -> Vec<u8> {
    let record = InnerRecord::Ack(AckRecord {
        sender,
        recipient: Recipient::Node(to),
        original_message_id: MessageId::generate(),
        priority: 2,
        timestamp: NOW_MS / 1000,
    });
    Frame::seal(
        DatagramKind::Ack,
        MessageId::generate(),
        0,
        5,
        (NOW_MS / 1000) as u32,
        sender,
        &record,
        &key(),
    )
    .expect("seal")
    .to_bytes()
}

#[test]
fn broadcast_sos_is_delivered_and_relayed() {
    let eng = engine(node(2));
    let out = eng.ingest(&sos_from(node(1), 5), NOW_MS);
    assert_eq!(out.decision, Decision::DeliverAndRelay);
    assert!(out.delivery.is_some());
    let relay = out.relay.expect("relay copy");
    assert_eq!(relay.kind, DatagramKind::Relay);
    assert_eq!(relay.hop_count, 1);
    assert_eq!(relay.ttl, 4);
    assert!(out.ack.is_none(), "SOS never acks");
}

#[test]
fn second_ingest_of_the_same_datagram_drops() {
    let eng = engine(node(2));
    let bytes = sos_from(node(1), 5);
    let first = eng.ingest(&bytes, NOW_MS);
    assert_eq!(first.decision, Decision::DeliverAndRelay);
    let second = eng.ingest(&bytes, NOW_MS);
    assert_eq!(second.decision, Decision::Drop(DropReason::Duplicate));
    assert!(second.delivery.is_none() && second.relay.is_none());
}

#[test]
fn ttl_zero_delivers_but_never_relays() {
    let eng = engine(node(2));
    let out = eng.ingest(&sos_from(node(1), 0), NOW_MS);
    assert_eq!(out.decision, Decision::Deliver);
    assert!(out.relay.is_none());
}

#[test]
fn ttl_one_relays_a_spent_copy() {
    let eng = engine(node(2));
    let out = eng.ingest(&sos_from(node(1), 1), NOW_MS);
    assert_eq!(out.decision, Decision::DeliverAndRelay);
    assert_eq!(out.relay.expect("relay").ttl, 0);
}

#[test]
fn direct_for_me_delivers_and_acks() {
    let me = node(2);
    let eng = engine(me);
    let out = eng.ingest(&direct_from_to(node(1), me, 5), NOW_MS);
    assert_eq!(out.decision, Decision::Deliver);
    assert!(out.relay.is_none(), "a DIRECT at its destination stops");

    let ack = out.ack.expect("destination acks");
    assert_eq!(ack.kind, DatagramKind::Ack);
    assert_eq!(ack.ttl, 5);
    assert_eq!(ack.sender, me);
    let record = ack.open(&key()).expect("open ack");
    assert_eq!(record.recipient(), Recipient::Node(node(1)));

    // The engine pre-marks its own ACK, so the echo is a duplicate.
    let echo = eng.ingest(&ack.to_bytes(), NOW_MS);
    assert_eq!(echo.decision, Decision::Drop(DropReason::Duplicate));
}

#[test]
fn direct_in_transit_relays_without_acking() {
    let eng = engine(node(9));
    let out = eng.ingest(&direct_from_to(node(1), node(2), 5), NOW_MS);
    assert_eq!(out.decision, Decision::Relay);
    assert!(out.delivery.is_none());
    assert!(out.ack.is_none());
}

#[test]
fn ack_in_transit_relays_like_direct() {
    let eng = engine(node(9));
    let out = eng.ingest(&ack_from_to(node(2), node(1)), NOW_MS);
    assert_eq!(out.decision, Decision::Relay);
    assert!(out.ack.is_none(), "acks are not acked");
}

#[test]
fn ack_at_destination_delivers_without_relaying() {
    let me = node(1);
    let eng = engine(me);
    let out = eng.ingest(&ack_from_to(node(2), me), NOW_MS);
    assert_eq!(out.decision, Decision::Deliver);
    assert!(out.relay.is_none());
    assert!(matches!(out.delivery, Some(InnerRecord::Ack(_))));
}

#[test]
fn freshness_window_edge_is_inclusive() {
    let eng = engine(node(2));
    let at_edge = eng.ingest(&sos_from(node(1), 5), NOW_MS + TOLERANCE_MS);
    assert_eq!(at_edge.decision, Decision::DeliverAndRelay);

    let eng = engine(node(2));
    let beyond = eng.ingest(&sos_from(node(1), 5), NOW_MS + TOLERANCE_MS + 1);
    assert_eq!(beyond.decision, Decision::Drop(DropReason::Stale));
}

#[test]
fn replayed_old_datagram_drops_regardless_of_cache() {
    // Scenario: an attacker re-transmits a 10-minute-old, valid datagram.
    let eng = engine(node(2));
    let bytes = sos_from(node(1), 5);
    let out = eng.ingest(&bytes, NOW_MS + 600_000);
    assert_eq!(out.decision, Decision::Drop(DropReason::Stale));
    // The cache was never consulted; a fresh copy would still deliver.
    let fresh = eng.ingest(&bytes, NOW_MS);
    assert_eq!(fresh.decision, Decision::DeliverAndRelay);
}

#[test]
fn wrong_key_marks_the_cache_but_never_delivers() {
    // Scenario: node Z holds a different pre-shared key.
    let eng = engine_with_key(node(2), NetworkKey::from_bytes(b"the wrong key!!!"));
    let bytes = sos_from(node(1), 5);
    let out = eng.ingest(&bytes, NOW_MS);
    assert!(matches!(
        out.decision,
        Decision::Drop(DropReason::Decrypt) | Decision::Drop(DropReason::Malformed)
    ));
    assert!(out.delivery.is_none() && out.relay.is_none());

    // A malformed duplicate of the same datagram is dropped as a duplicate:
    // the cache was marked before decryption and must stay marked.
    let again = eng.ingest(&bytes, NOW_MS);
    assert_eq!(again.decision, Decision::Drop(DropReason::Duplicate));
}

#[test]
fn corrupted_bytes_drop_on_checksum() {
    let eng = engine(node(2));
    let mut bytes = sos_from(node(1), 5);
    bytes[20] ^= 0xFF;
    let out = eng.ingest(&bytes, NOW_MS);
    assert!(matches!(out.decision, Decision::Drop(DropReason::Checksum)));
}

#[test]
fn originated_datagrams_do_not_loop_back() {
    let eng = engine(node(1));
    let frame = eng
        .originate_sos(
            "test",
            GeoLocation {
                latitude: 0.0,
                longitude: 0.0,
            },
            SosType::General,
            NOW_MS,
        )
        .expect("originate");
    assert_eq!(frame.hop_count, 0);
    assert_eq!(frame.ttl, 5);
    // The echo from a neighbor arrives as our own bytes.
    let echo = eng.ingest(&frame.to_bytes(), NOW_MS);
    assert_eq!(echo.decision, Decision::Drop(DropReason::Duplicate));
}

#[test]
fn relay_chain_preserves_the_hop_budget_invariant() {
    // A -> B -> C -> D -> E, one engine per node.
    let origin = engine(node(1));
    let frame = origin
        .originate_sos(
            "chain",
            GeoLocation {
                latitude: 1.0,
                longitude: 2.0,
            },
            SosType::General,
            NOW_MS,
        )
        .expect("originate");
    let initial_ttl = frame.ttl;
    let origin_id = frame.message_id;

    let mut bytes = frame.to_bytes();
    for (i, n) in [2u8, 3, 4, 5].into_iter().enumerate() {
        let eng = engine(node(n));
        let out = eng.ingest(&bytes, NOW_MS);
        assert_eq!(out.decision, Decision::DeliverAndRelay, "node {n}");
        let relay = out.relay.expect("relay");
        assert_eq!(relay.message_id, origin_id);
        assert_eq!(relay.sender, node(1));
        assert_eq!(relay.hop_count as usize, i + 1);
        assert!(relay.hop_count >= 1);
        assert!(relay.ttl < initial_ttl);
        assert!(relay.hop_count + relay.ttl <= initial_ttl);
        bytes = relay.to_bytes();
    }
}

#[test]
fn direct_to_a_third_party_is_not_delivered_here() {
    let eng = engine(node(7));
    let out = eng.ingest(&direct_from_to(node(1), node(2), 0), NOW_MS);
    // Not addressed to us and no budget left: nothing to do.
    assert_eq!(out.decision, Decision::Drop(DropReason::TtlExhausted));
}
