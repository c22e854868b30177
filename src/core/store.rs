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

//! Durable store using sled: message history, peer sightings, routing
//! cache actions, the persisted forward queue, and statistics, with
//! retention sweeps (messages 30 days, peers 7 days, statistics 90 days).

use crate::core::peers::PeerRecord;
use crate::core::queue::QueueEntry;
use crate::core::types::{MessageId, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TREE_MESSAGES: &str = "messages";
const TREE_PEERS: &str = "peers";
const TREE_ROUTING_CACHE: &str = "routing_cache";
const TREE_FORWARD_QUEUE: &str = "forward_queue";
const TREE_STATISTICS: &str = "statistics";

const MESSAGE_RETENTION_MS: u64 = 30 * 24 * 3600 * 1000;
const PEER_RETENTION_MS: u64 = 7 * 24 * 3600 * 1000;
const STAT_RETENTION_MS: u64 = 90 * 24 * 3600 * 1000;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Cannot open the database directory.
    #[error("db open")]
    DbOpen,
    /// Read/write failure.
    #[error("db io")]
    DbIo,
    /// Row encode/decode failure.
    #[error("row codec")]
    Codec,
}

/// Delivery state of a stored message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Originated, not yet on the wire.
    Pending,
    /// Written to at least one peer.
    Sent,
    /// Acknowledged (DIRECT) or received locally.
    Delivered,
    /// Expired or over-retried.
    Failed,
}

/// One row of message history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    /// Originator-assigned id.
    pub id: MessageId,
    /// Semantic kind byte.
    pub kind: u8,
    /// Counterpart node (originator for inbound, recipient for outbound).
    pub peer: NodeId,
    /// Free-text content; empty for ACKs.
    pub content: String,
    /// Hops traversed when this copy arrived (0 for local originations).
    pub hops: u8,
    /// Row creation, ms since epoch.
    pub created_ms: u64,
    /// Current delivery state.
    pub status: DeliveryStatus,
    /// True once mirrored to an upstream bridge (out-of-scope consumer).
    pub synced: bool,
}

/// One routing-cache action row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheActionRow {
    /// Duplicate key (16 hex digest).
    pub key: String,
    /// What the router did: delivered, relayed, dropped.
    pub action: String,
    /// When, ms since epoch.
    pub marked_ms: u64,
}

/// One statistics sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatRow {
    /// Counter name.
    pub kind: String,
    /// Sampled value.
    pub value: i64,
    /// Sample time, ms since epoch.
    pub timestamp_ms: u64,
    /// Free-form annotation.
    pub metadata: Option<String>,
}

/// Counts removed by one retention sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Message rows removed.
    pub messages: usize,
    /// Peer rows removed.
    pub peers: usize,
    /// Cache rows removed.
    pub cache: usize,
    /// Statistics rows removed.
    pub stats: usize,
}

/// sled-backed mesh store.
#[derive(Clone)]
pub struct MeshStore {
    messages: sled::Tree,
    peers: sled::Tree,
    routing_cache: sled::Tree,
    forward_queue: sled::Tree,
    statistics: sled::Tree,
}

impl MeshStore {
    /// Open (or create) the store under `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        Ok(Self {
            messages: db.open_tree(TREE_MESSAGES).map_err(|_| StoreError::DbOpen)?,
            peers: db.open_tree(TREE_PEERS).map_err(|_| StoreError::DbOpen)?,
            routing_cache: db
                .open_tree(TREE_ROUTING_CACHE)
                .map_err(|_| StoreError::DbOpen)?,
            forward_queue: db
                .open_tree(TREE_FORWARD_QUEUE)
                .map_err(|_| StoreError::DbOpen)?,
            statistics: db
                .open_tree(TREE_STATISTICS)
                .map_err(|_| StoreError::DbOpen)?,
        })
    }

    /// Insert or replace a message row.
    pub fn record_message(&self, row: &MessageRow) -> Result<(), StoreError> {
        let value = bincode::serialize(row).map_err(|_| StoreError::Codec)?;
        self.messages
            .insert(row.id.as_bytes(), value)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Update the delivery status of a message, if stored.
    pub fn set_message_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<(), StoreError> {
        if let Some(raw) = self.messages.get(id.as_bytes()).map_err(|_| StoreError::DbIo)? {
            let mut row: MessageRow = bincode::deserialize(&raw).map_err(|_| StoreError::Codec)?;
            row.status = status;
            self.record_message(&row)?;
        }
        Ok(())
    }

    /// Fetch one message row.
    pub fn message(&self, id: &MessageId) -> Result<Option<MessageRow>, StoreError> {
        match self.messages.get(id.as_bytes()).map_err(|_| StoreError::DbIo)? {
            Some(raw) => Ok(Some(
                bincode::deserialize(&raw).map_err(|_| StoreError::Codec)?,
            )),
            None => Ok(None),
        }
    }

    /// Insert or replace a peer sighting.
    pub fn record_peer(&self, peer: &PeerRecord) -> Result<(), StoreError> {
        let value = bincode::serialize(peer).map_err(|_| StoreError::Codec)?;
        self.peers
            .insert(peer.id.as_bytes(), value)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Record what the router did for one duplicate key.
    pub fn record_cache_action(&self, row: &CacheActionRow) -> Result<(), StoreError> {
        let value = bincode::serialize(row).map_err(|_| StoreError::Codec)?;
        self.routing_cache
            .insert(row.key.as_bytes(), value)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Persist a forward-queue entry (survives restarts while partitioned).
    pub fn queue_put(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        let value = bincode::serialize(entry).map_err(|_| StoreError::Codec)?;
        self.forward_queue
            .insert(entry.message_id.as_bytes(), value)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Remove a forward-queue entry (sent or discarded).
    pub fn queue_remove(&self, id: &MessageId) -> Result<(), StoreError> {
        self.forward_queue
            .remove(id.as_bytes())
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// All persisted queue entries (restart recovery).
    pub fn queue_entries(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let mut out = Vec::new();
        for item in self.forward_queue.iter() {
            let (_, raw) = item.map_err(|_| StoreError::DbIo)?;
            out.push(bincode::deserialize(&raw).map_err(|_| StoreError::Codec)?);
        }
        Ok(out)
    }

    /// Append one statistics sample.
    pub fn record_stat(&self, row: &StatRow) -> Result<(), StoreError> {
        // Key: timestamp (big-endian, so iteration is chronological) + kind.
        let mut key = row.timestamp_ms.to_be_bytes().to_vec();
        key.extend_from_slice(row.kind.as_bytes());
        let value = bincode::serialize(row).map_err(|_| StoreError::Codec)?;
        self.statistics
            .insert(key, value)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Retention sweep: messages and cache actions after 30 days, peers
    /// 7 days after last contact, statistics after 90 days.
    pub fn purge_expired(&self, now_ms: u64) -> Result<PurgeReport, StoreError> {
        let mut report = PurgeReport::default();

        report.messages = purge_where(&self.messages, |raw| {
            bincode::deserialize::<MessageRow>(raw)
                .map(|r| now_ms.saturating_sub(r.created_ms) > MESSAGE_RETENTION_MS)
                .unwrap_or(true)
        })?;
        report.peers = purge_where(&self.peers, |raw| {
            bincode::deserialize::<PeerRecord>(raw)
                .map(|r| now_ms.saturating_sub(r.last_seen_ms) > PEER_RETENTION_MS)
                .unwrap_or(true)
        })?;
        report.cache = purge_where(&self.routing_cache, |raw| {
            bincode::deserialize::<CacheActionRow>(raw)
                .map(|r| now_ms.saturating_sub(r.marked_ms) > MESSAGE_RETENTION_MS)
                .unwrap_or(true)
        })?;
        report.stats = purge_where(&self.statistics, |raw| {
            bincode::deserialize::<StatRow>(raw)
                .map(|r| now_ms.saturating_sub(r.timestamp_ms) > STAT_RETENTION_MS)
                .unwrap_or(true)
        })?;

        Ok(report)
    }
}

fn purge_where(
    tree: &sled::Tree,
    mut expired: impl FnMut(&[u8]) -> bool,
) -> Result<usize, StoreError> {
    let mut stale: Vec<sled::IVec> = Vec::new();
    for item in tree.iter() {
        let (key, raw) = item.map_err(|_| StoreError::DbIo)?;
        if expired(&raw) {
            stale.push(key);
        }
    }
    let removed = stale.len();
    for key in stale {
        tree.remove(key).map_err(|_| StoreError::DbIo)?;
    }
    Ok(removed)
}
