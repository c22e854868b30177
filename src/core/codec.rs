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

//! Wire codec: 32-byte big-endian header, CRC-16-CCITT, AES-128-CBC
//! payload envelope with PKCS#7 padding.
//!
//! ## Frame layout
//! ```text
//! ┌─────────────────────────── header (32B) ────────────────────────────┐
//! │ ver(1) kind(1) message_id(16) hops(1) ttl(1) ts(4) sender(6) len(2) │
//! └─────────────────────────────────────────────────────────────────────┘
//! ┌ crc(2) ┐┌──────────── ciphertext (len, multiple of 16) ────────────┐
//! └────────┘└───────────────────────────────────────────────────────────┘
//! ```
//! The CRC covers the 32 header bytes followed by the ciphertext. The IV
//! is the message id, so a relay re-encrypting the same record produces
//! the same ciphertext and the duplicate key stays valid network-wide.
//!
//! Decode is two-phase: [`Frame::parse`] verifies structure and checksum
//! without touching the key, so the routing engine can mark the duplicate
//! cache before [`Frame::open`] decrypts. A malformed duplicate of a
//! datagram must be dropped as a duplicate, not retried.

use crate::core::types::{
    DatagramKind, InnerRecord, MessageId, NetworkKey, NodeId, CIPHER_BLOCK_LEN, CRC_LEN,
    HEADER_LEN, MAX_PAYLOAD_LEN, NODE_ID_LEN, PROTOCOL_VERSION,
};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Codec failures. Every inbound variant is non-fatal: the routing engine
/// silently drops the datagram and bumps a counter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Too short for a header, or the version byte is not ours.
    #[error("malformed header")]
    MalformedHeader,
    /// CRC mismatch over header and payload.
    #[error("bad checksum")]
    BadChecksum,
    /// Kind byte out of range.
    #[error("unknown kind")]
    UnknownKind,
    /// Declared payload length inconsistent with the frame.
    #[error("length mismatch")]
    LengthMismatch,
    /// Ciphertext or padding invalid under the local key.
    #[error("decrypt failed")]
    DecryptFailed,
    /// Inner record violates its schema.
    #[error("malformed record")]
    MalformedRecord,
    /// Encode-side: record does not fit one datagram (no fragmentation).
    #[error("payload exceeds datagram budget")]
    OversizedPayload,
}

/// CRC-16-CCITT: polynomial 0x1021, initial state 0xFFFF, no final XOR,
/// bytes processed MSB-first.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Duplicate-detection key: first 16 hex characters of SHA-256 over the
/// message id's canonical string form concatenated with the hex sender id.
/// Two datagrams map to the same key iff they are relay copies of the same
/// originated message.
pub fn duplicate_key(message_id: &MessageId, sender: &NodeId) -> String {
    let input = format!("{}{}", message_id.canonical(), sender);
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_bytes());
    hex::encode(digest.as_ref())[..16].to_string()
}

/// A parsed datagram: validated header plus the opaque ciphertext payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Kind byte as carried on the wire (RELAY for re-emitted copies).
    pub kind: DatagramKind,
    /// Originator-assigned id, preserved across relays.
    pub message_id: MessageId,
    /// Relay edges traversed so far (originator = 0).
    pub hop_count: u8,
    /// Remaining hop budget.
    pub ttl: u8,
    /// Originator wall clock, seconds since epoch.
    pub timestamp: u32,
    /// Originator id.
    pub sender: NodeId,
    /// Encrypted inner record.
    pub ciphertext: Vec<u8>,
}

impl Frame {
    /// Encrypt `record` and assemble a frame ready for the wire.
    pub fn seal(
        kind: DatagramKind,
        message_id: MessageId,
        hop_count: u8,
        ttl: u8,
        timestamp: u32,
        sender: NodeId,
        record: &InnerRecord,
        key: &NetworkKey,
    ) -> Result<Self, CodecError> {
        let plain = serde_json::to_vec(record).map_err(|_| CodecError::MalformedRecord)?;
        let ciphertext = encrypt_payload(&plain, message_id, key);
        if ciphertext.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::OversizedPayload);
        }
        Ok(Self {
            kind,
            message_id,
            hop_count,
            ttl,
            timestamp,
            sender,
            ciphertext,
        })
    }

    /// Serialize to wire bytes: header, CRC, ciphertext.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = PROTOCOL_VERSION;
        header[1] = self.kind.as_byte();
        header[2..18].copy_from_slice(self.message_id.as_bytes());
        header[18] = self.hop_count;
        header[19] = self.ttl;
        header[20..24].copy_from_slice(&self.timestamp.to_be_bytes());
        header[24..30].copy_from_slice(self.sender.as_bytes());
        header[30..32].copy_from_slice(&(self.ciphertext.len() as u16).to_be_bytes());

        let mut crc_input = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        crc_input.extend_from_slice(&header);
        crc_input.extend_from_slice(&self.ciphertext);
        let crc = crc16_ccitt(&crc_input);

        let mut out = Vec::with_capacity(HEADER_LEN + CRC_LEN + self.ciphertext.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse and structurally validate wire bytes. Verifies the checksum
    /// but does not touch the payload ciphertext.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN + CRC_LEN {
            return Err(CodecError::MalformedHeader);
        }
        let header = &bytes[..HEADER_LEN];
        let payload = &bytes[HEADER_LEN + CRC_LEN..];

        let declared = u16::from_be_bytes([header[30], header[31]]) as usize;
        if declared != payload.len() || declared > MAX_PAYLOAD_LEN {
            return Err(CodecError::LengthMismatch);
        }

        let wire_crc = u16::from_be_bytes([bytes[HEADER_LEN], bytes[HEADER_LEN + 1]]);
        let mut crc_input = Vec::with_capacity(HEADER_LEN + payload.len());
        crc_input.extend_from_slice(header);
        crc_input.extend_from_slice(payload);
        if crc16_ccitt(&crc_input) != wire_crc {
            return Err(CodecError::BadChecksum);
        }

        if header[0] != PROTOCOL_VERSION {
            return Err(CodecError::MalformedHeader);
        }
        let kind = DatagramKind::from_byte(header[1]).ok_or(CodecError::UnknownKind)?;
        // A relayed copy has consumed at least one hop.
        if kind == DatagramKind::Relay && header[18] == 0 {
            return Err(CodecError::MalformedHeader);
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&header[2..18]);
        let mut sender = [0u8; NODE_ID_LEN];
        sender.copy_from_slice(&header[24..30]);

        Ok(Self {
            kind,
            message_id: MessageId::from_bytes(id),
            hop_count: header[18],
            ttl: header[19],
            timestamp: u32::from_be_bytes([header[20], header[21], header[22], header[23]]),
            sender: NodeId::from_bytes(sender),
            ciphertext: payload.to_vec(),
        })
    }

    /// Decrypt and schema-check the inner record.
    pub fn open(&self, key: &NetworkKey) -> Result<InnerRecord, CodecError> {
        if self.ciphertext.is_empty() {
            return Err(CodecError::MalformedRecord);
        }
        if self.ciphertext.len() % CIPHER_BLOCK_LEN != 0 {
            return Err(CodecError::DecryptFailed);
        }
        let plain = decrypt_payload(&self.ciphertext, self.message_id, key)?;
        let record: InnerRecord =
            serde_json::from_slice(&plain).map_err(|_| CodecError::MalformedRecord)?;
        if !record.validate() {
            return Err(CodecError::MalformedRecord);
        }
        // A relayed copy carries the originator's record; any other header
        // kind must agree with the record it wraps.
        if self.kind != DatagramKind::Relay && record.kind() != self.kind {
            return Err(CodecError::MalformedRecord);
        }
        Ok(record)
    }

    /// The duplicate key for this frame.
    pub fn duplicate_key(&self) -> String {
        duplicate_key(&self.message_id, &self.sender)
    }

    /// Fresh datagram for re-emission: kind becomes RELAY, one hop is
    /// consumed. The ciphertext is byte-identical (same record, key, IV),
    /// so only the header and CRC change on the wire. Caller must have
    /// checked `ttl > 0`.
    pub fn relay_copy(&self) -> Self {
        Self {
            kind: DatagramKind::Relay,
            message_id: self.message_id,
            hop_count: self.hop_count.saturating_add(1),
            ttl: self.ttl.saturating_sub(1),
            timestamp: self.timestamp,
            sender: self.sender,
            ciphertext: self.ciphertext.clone(),
        }
    }
}

fn encrypt_payload(plain: &[u8], message_id: MessageId, key: &NetworkKey) -> Vec<u8> {
    Aes128CbcEnc::new(key.as_bytes().into(), message_id.as_bytes().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plain)
}

fn decrypt_payload(
    ciphertext: &[u8],
    message_id: MessageId,
    key: &NetworkKey,
) -> Result<Vec<u8>, CodecError> {
    Aes128CbcDec::new(key.as_bytes().into(), message_id.as_bytes().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::DecryptFailed)
}
