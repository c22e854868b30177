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

//! Radio seam: the `Transport` trait a BLE driver implements, plus the
//! fixed 24-byte discovery advertisement blob.
//!
//! The adapter hides radio-stack idiosyncrasies (connection limits, link
//! establishment, advertisement parsing). It guarantees at-most-once
//! delivery to the inbound channel per received datagram on a single
//! link; cross-link deduplication is the duplicate cache's job.

use crate::core::types::{NodeId, NodeStatus, NODE_ID_LEN, PROTOCOL_VERSION};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Size of the discovery service-data blob.
pub const ADVERT_LEN: usize = 24;
/// Name field capacity inside the blob (bytes 8..24, zero-padded UTF-8).
pub const ADVERT_NAME_LEN: usize = ADVERT_LEN - NODE_ID_LEN - 2;

/// Transport failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The radio subsystem cannot be initialized.
    #[error("radio unavailable")]
    RadioUnavailable,
    /// No active logical connection to the target peer.
    #[error("peer not connected")]
    NotConnected,
    /// Link write failed.
    #[error("write failed")]
    WriteFailed,
    /// The transport is stopped.
    #[error("transport stopped")]
    Stopped,
}

/// What this node advertises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvertFrame {
    /// Local node id.
    pub node: NodeId,
    /// Advertised status byte.
    pub status: NodeStatus,
    /// Wire protocol version.
    pub protocol_version: u8,
    /// Display name (truncated to the blob's name capacity).
    pub name: String,
}

impl AdvertFrame {
    /// Advertisement with default status and current protocol version.
    pub fn new(node: NodeId, name: &str) -> Self {
        Self {
            node,
            status: NodeStatus::Active,
            protocol_version: PROTOCOL_VERSION,
            name: name.to_string(),
        }
    }

    /// Encode the fixed service-data blob: id (0..6), status (6),
    /// version (7), zero-padded name (8..24).
    pub fn encode(&self) -> [u8; ADVERT_LEN] {
        let mut out = [0u8; ADVERT_LEN];
        out[..NODE_ID_LEN].copy_from_slice(self.node.as_bytes());
        out[NODE_ID_LEN] = self.status.as_byte();
        out[NODE_ID_LEN + 1] = self.protocol_version;
        let name = self.name.as_bytes();
        let n = name.len().min(ADVERT_NAME_LEN);
        out[NODE_ID_LEN + 2..NODE_ID_LEN + 2 + n].copy_from_slice(&name[..n]);
        out
    }

    /// Parse a received blob; `None` when the length or status byte is
    /// out of contract.
    pub fn parse(blob: &[u8]) -> Option<Self> {
        if blob.len() != ADVERT_LEN {
            return None;
        }
        let mut id = [0u8; NODE_ID_LEN];
        id.copy_from_slice(&blob[..NODE_ID_LEN]);
        let status = NodeStatus::from_byte(blob[NODE_ID_LEN])?;
        let protocol_version = blob[NODE_ID_LEN + 1];
        let raw_name = &blob[NODE_ID_LEN + 2..];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
        Some(Self {
            node: NodeId::from_bytes(id),
            status,
            protocol_version,
            name,
        })
    }
}

/// A peer advertisement as seen by the local radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertising peer.
    pub peer: NodeId,
    /// Peer display name.
    pub name: String,
    /// Received signal strength, dBm.
    pub rssi: i16,
    /// Peer status byte.
    pub status: NodeStatus,
    /// Peer protocol version.
    pub protocol_version: u8,
}

/// Inbound streams handed to the controller by [`Transport::start`].
pub struct TransportRx {
    /// Peer advertisements.
    pub adverts: mpsc::Receiver<Advertisement>,
    /// Raw datagram bytes, at most once per datagram per link.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// Abstract radio capability set. The controller owns the transport
/// exclusively; no other component calls it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Initialize the radio, begin periodic advertisement, and start
    /// scanning. Fails with [`TransportError::RadioUnavailable`] when the
    /// radio subsystem cannot come up.
    async fn start(&self, advert: AdvertFrame) -> Result<TransportRx, TransportError>;

    /// Replace the outgoing advertisement (status changes).
    async fn set_advertisement(&self, advert: AdvertFrame);

    /// Peers with an active logical connection.
    async fn connected_peers(&self) -> Vec<NodeId>;

    /// Write one encoded datagram to one peer.
    async fn send(&self, peer: NodeId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Write to every connected peer; returns the success count. Failure
    /// toward one peer does not abort the rest.
    async fn broadcast(&self, bytes: Vec<u8>) -> usize;

    /// Stop advertising and scanning and drop all links.
    async fn shutdown(&self);
}
