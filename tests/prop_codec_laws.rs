// Copyright (c) 2026 Emberlink
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;

use emberlink::core::codec::{CodecError, Frame};
use emberlink::core::types::{
    DatagramKind, DirectRecord, GeoLocation, InnerRecord, MessageId, NetworkKey, NodeId,
    Recipient, SosRecord, SosType,
};

fn arb_node_id() -> impl Strategy<Value = NodeId> {
    any::<[u8; 6]>().prop_map(NodeId::from_bytes)
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<[u8; 16]>().prop_map(MessageId::from_bytes)
}

fn arb_record() -> impl Strategy<Value = (InnerRecord, DatagramKind)> {
    let sos = (
        arb_node_id(),
        "[a-zA-Z0-9 ]{1,200}",
        -90.0f64..90.0,
        -180.0f64..180.0,
        1u8..=5,
        any::<u32>(),
    )
        .prop_map(|(sender, content, latitude, longitude, priority, ts)| {
            (
                InnerRecord::Sos(SosRecord {
                    sender,
                    recipient: Recipient::Broadcast,
                    content,
                    location: GeoLocation {
                        latitude,
                        longitude,
                    },
                    priority,
                    timestamp: u64::from(ts),
                    sos_type: SosType::General,
                }),
                DatagramKind::Sos,
            )
        });
    let direct = (
        arb_node_id(),
        arb_node_id(),
        "[a-zA-Z0-9 ]{1,200}",
        1u8..=5,
        any::<u32>(),
    )
        .prop_map(|(sender, to, content, priority, ts)| {
            (
                InnerRecord::Direct(DirectRecord {
                    sender,
                    recipient: Recipient::Node(to),
                    content,
                    priority,
                    timestamp: u64::from(ts),
                }),
                DatagramKind::Direct,
            )
        });
    prop_oneof![sos, direct]
}

proptest! {
    #[test]
    fn decode_inverts_encode_for_any_key(
        (record, kind) in arb_record(),
        id in arb_message_id(),
        hops in 0u8..10,
        ttl in 0u8..10,
        ts in any::<u32>(),
        key_bytes in any::<[u8; 16]>(),
    ) {
        let key = NetworkKey::from_bytes(&key_bytes);
        let sender = record.sender();
        let frame = Frame::seal(kind, id, hops, ttl, ts, sender, &record, &key).expect("seal");
        let bytes = frame.to_bytes();

        let parsed = Frame::parse(&bytes).expect("parse");
        prop_assert_eq!(&parsed, &frame);
        let opened = parsed.open(&key).expect("open");
        prop_assert_eq!(opened, record);
    }

    #[test]
    fn mismatched_keys_never_open(
        (record, kind) in arb_record(),
        id in arb_message_id(),
        k1 in any::<[u8; 16]>(),
        k2 in any::<[u8; 16]>(),
    ) {
        prop_assume!(k1 != k2);
        let sender = record.sender();
        let frame = Frame::seal(kind, id, 0, 5, 1_700_000_000, sender, &record, &NetworkKey::from_bytes(&k1))
            .expect("seal");
        let err = frame.open(&NetworkKey::from_bytes(&k2)).expect_err("must not open");
        prop_assert!(matches!(err, CodecError::DecryptFailed | CodecError::MalformedRecord));
    }

    #[test]
    fn any_single_bit_corruption_is_rejected(
        (record, kind) in arb_record(),
        id in arb_message_id(),
        key_bytes in any::<[u8; 16]>(),
        bit in any::<prop::sample::Index>(),
    ) {
        let key = NetworkKey::from_bytes(&key_bytes);
        let sender = record.sender();
        let frame = Frame::seal(kind, id, 0, 5, 1_700_000_000, sender, &record, &key).expect("seal");
        let bytes = frame.to_bytes();

        let bit = bit.index(bytes.len() * 8);
        let mut corrupt = bytes;
        corrupt[bit / 8] ^= 1 << (bit % 8);

        // CRC-16 detects every single-bit error, so a flipped frame never
        // parses into a deliverable datagram.
        prop_assert!(Frame::parse(&corrupt).is_err());
    }
}
