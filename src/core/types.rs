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

//! Core mesh types: node/message identifiers, datagram kinds, the inner
//! payload record, and the pre-shared network key.

use ring::rand::{SecureRandom, SystemRandom};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Wire protocol version carried in every datagram header.
pub const PROTOCOL_VERSION: u8 = 1;
/// Datagram header size in bytes (checksum excluded).
pub const HEADER_LEN: usize = 32;
/// CRC field size in bytes.
pub const CRC_LEN: usize = 2;
/// Radio MTU ceiling: no datagram may exceed this on the wire.
pub const MAX_DATAGRAM_LEN: usize = 512;
/// Maximum declared payload length (`MAX_DATAGRAM_LEN - HEADER_LEN - CRC_LEN`).
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - HEADER_LEN - CRC_LEN;
/// AES block size; ciphertext payloads are positive multiples of this.
pub const CIPHER_BLOCK_LEN: usize = 16;
/// Length of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 6;

/// Recipient sentinel meaning "any and all nodes deliver".
pub const BROADCAST_LITERAL: &str = "broadcast";

/// 6-byte opaque node identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; NODE_ID_LEN]) -> Self {
        Self(b)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Generate a random identifier (first-start provisioning).
    pub fn random() -> Self {
        let rng = SystemRandom::new();
        let mut b = [0u8; NODE_ID_LEN];
        // SystemRandom only fails if the OS entropy source is broken.
        if rng.fill(&mut b).is_err() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos();
            b[..4].copy_from_slice(&nanos.to_be_bytes());
        }
        Self(b)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

/// Error parsing a hex node identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNodeIdError;

impl fmt::Display for ParseNodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {} hex characters", NODE_ID_LEN * 2)
    }
}

impl std::error::Error for ParseNodeIdError {}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseNodeIdError)?;
        if bytes.len() != NODE_ID_LEN {
            return Err(ParseNodeIdError);
        }
        let mut out = [0u8; NODE_ID_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Message recipient: a specific node or the broadcast sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every node delivers.
    Broadcast,
    /// Only the named node delivers.
    Node(NodeId),
}

impl Recipient {
    /// True for the broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::Broadcast)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Broadcast => write!(f, "{BROADCAST_LITERAL}"),
            Recipient::Node(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s == BROADCAST_LITERAL {
            return Ok(Recipient::Broadcast);
        }
        s.parse().map(Recipient::Node).map_err(de::Error::custom)
    }
}

/// 16-byte message identifier, generated at the originator and preserved
/// across relays.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Construct from the 16 raw header bytes.
    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(b))
    }

    /// Raw bytes as written into the header (also the payload IV).
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Canonical hyphenated string form, the input to the duplicate digest.
    pub fn canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0.hyphenated())
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Datagram kind byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatagramKind {
    /// Emergency broadcast.
    Sos,
    /// Person-to-person note.
    Direct,
    /// Re-emitted copy of another node's datagram.
    Relay,
    /// Delivery acknowledgment for a DIRECT.
    Ack,
}

impl DatagramKind {
    /// Wire encoding of the kind.
    pub fn as_byte(&self) -> u8 {
        match self {
            DatagramKind::Sos => 0x01,
            DatagramKind::Direct => 0x02,
            DatagramKind::Relay => 0x03,
            DatagramKind::Ack => 0x04,
        }
    }

    /// Parse the kind byte; `None` if out of range.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(DatagramKind::Sos),
            0x02 => Some(DatagramKind::Direct),
            0x03 => Some(DatagramKind::Relay),
            0x04 => Some(DatagramKind::Ack),
            _ => None,
        }
    }
}

/// Node status advertised over the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Normal operation.
    Active,
    /// Conserving power.
    LowBattery,
    /// Relaying at capacity.
    HighLoad,
}

impl NodeStatus {
    /// Wire encoding of the status byte.
    pub fn as_byte(&self) -> u8 {
        match self {
            NodeStatus::Active => 0x01,
            NodeStatus::LowBattery => 0x02,
            NodeStatus::HighLoad => 0x03,
        }
    }

    /// Parse the status byte; `None` if out of range.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(NodeStatus::Active),
            0x02 => Some(NodeStatus::LowBattery),
            0x03 => Some(NodeStatus::HighLoad),
            _ => None,
        }
    }
}

/// Latitude/longitude pair attached to SOS messages.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoLocation {
    /// Degrees, positive north.
    pub latitude: f64,
    /// Degrees, positive east.
    pub longitude: f64,
}

/// Categorical SOS tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SosType {
    /// Injury or illness.
    Medical,
    /// Trapped or immobilized.
    Trapped,
    /// Active fire.
    Fire,
    /// Food/water/shelter needed.
    Supplies,
    /// Unclassified emergency.
    General,
}

/// SOS record body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SosRecord {
    /// Originator id (duplicated from the clear header; routing needs the
    /// header, semantics need the payload).
    pub sender: NodeId,
    /// Always the broadcast sentinel for SOS.
    pub recipient: Recipient,
    /// Free-text description.
    pub content: String,
    /// Originator position.
    pub location: GeoLocation,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
    /// Originator wall clock, seconds since epoch.
    pub timestamp: u64,
    /// Emergency category.
    #[serde(rename = "sosType")]
    pub sos_type: SosType,
}

/// DIRECT record body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectRecord {
    /// Originator id.
    pub sender: NodeId,
    /// Target node.
    pub recipient: Recipient,
    /// Free-text note.
    pub content: String,
    /// 1 to 5.
    pub priority: u8,
    /// Originator wall clock, seconds since epoch.
    pub timestamp: u64,
}

/// ACK record body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckRecord {
    /// Acknowledging node.
    pub sender: NodeId,
    /// Originator of the acknowledged DIRECT.
    pub recipient: Recipient,
    /// Id of the acknowledged message.
    #[serde(rename = "originalMessageId")]
    pub original_message_id: MessageId,
    /// 1 to 5.
    pub priority: u8,
    /// Acknowledger wall clock, seconds since epoch.
    pub timestamp: u64,
}

/// Plaintext record carried inside the encrypted payload, schema-tagged
/// by kind. A relayed copy carries the originator's record unchanged, so
/// the record kind is the message's semantic kind regardless of how many
/// hops it has traversed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InnerRecord {
    /// Emergency broadcast.
    Sos(SosRecord),
    /// Person-to-person note.
    Direct(DirectRecord),
    /// Delivery acknowledgment.
    Ack(AckRecord),
}

impl InnerRecord {
    /// Originator id as echoed inside the payload.
    pub fn sender(&self) -> NodeId {
        match self {
            InnerRecord::Sos(r) => r.sender,
            InnerRecord::Direct(r) => r.sender,
            InnerRecord::Ack(r) => r.sender,
        }
    }

    /// Addressed recipient.
    pub fn recipient(&self) -> Recipient {
        match self {
            InnerRecord::Sos(r) => r.recipient,
            InnerRecord::Direct(r) => r.recipient,
            InnerRecord::Ack(r) => r.recipient,
        }
    }

    /// Message priority.
    pub fn priority(&self) -> u8 {
        match self {
            InnerRecord::Sos(r) => r.priority,
            InnerRecord::Direct(r) => r.priority,
            InnerRecord::Ack(r) => r.priority,
        }
    }

    /// Semantic kind (never `Relay`).
    pub fn kind(&self) -> DatagramKind {
        match self {
            InnerRecord::Sos(_) => DatagramKind::Sos,
            InnerRecord::Direct(_) => DatagramKind::Direct,
            InnerRecord::Ack(_) => DatagramKind::Ack,
        }
    }

    /// Schema checks beyond what serde enforces structurally.
    pub fn validate(&self) -> bool {
        if !(1..=5).contains(&self.priority()) {
            return false;
        }
        match self {
            InnerRecord::Sos(r) => {
                r.recipient.is_broadcast()
                    && !r.content.is_empty()
                    && r.location.latitude.is_finite()
                    && r.location.longitude.is_finite()
            }
            InnerRecord::Direct(r) => !r.content.is_empty(),
            InnerRecord::Ack(_) => true,
        }
    }
}

/// 16-byte pre-shared symmetric network key. All nodes holding the same
/// key are trusted peers; there are no authenticated identities.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NetworkKey([u8; 16]);

impl NetworkKey {
    /// Build a key from arbitrary bytes, truncated or zero-padded to 16.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut k = [0u8; 16];
        let n = bytes.len().min(16);
        k[..n].copy_from_slice(&bytes[..n]);
        Self(k)
    }

    /// Key material for the cipher.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "NetworkKey(..)")
    }
}
