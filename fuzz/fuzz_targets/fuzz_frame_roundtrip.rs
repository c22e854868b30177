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

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use emberlink::core::codec::{CodecError, Frame};
use emberlink::core::types::{
    DatagramKind, DirectRecord, InnerRecord, MessageId, NetworkKey, NodeId, Recipient,
};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    id: [u8; 16],
    hops: u8,
    ttl: u8,
    ts: u32,
    sender: [u8; 6],
    recipient: [u8; 6],
    content: String,
    priority: u8,
    key: [u8; 16],
}

fuzz_target!(|inp: Input| {
    let sender = NodeId::from_bytes(inp.sender);
    let mut content: String = inp.content.chars().take(128).collect();
    if content.is_empty() {
        content.push('x');
    }
    let record = InnerRecord::Direct(DirectRecord {
        sender,
        recipient: Recipient::Node(NodeId::from_bytes(inp.recipient)),
        content,
        priority: inp.priority % 5 + 1,
        timestamp: u64::from(inp.ts),
    });

    let key = NetworkKey::from_bytes(&inp.key);
    let frame = match Frame::seal(
        DatagramKind::Direct,
        MessageId::from_bytes(inp.id),
        inp.hops,
        inp.ttl,
        inp.ts,
        sender,
        &record,
        &key,
    ) {
        Ok(f) => f,
        Err(CodecError::OversizedPayload) => return,
        Err(e) => panic!("seal failed: {e:?}"),
    };

    // Encode/decode is lossless for any well-formed input.
    let bytes = frame.to_bytes();
    let parsed = Frame::parse(&bytes).expect("sealed frames parse");
    assert_eq!(parsed, frame);
    assert_eq!(parsed.open(&key).expect("sealed frames open"), record);
});
