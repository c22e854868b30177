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

//! Peer table: live neighbors observed through radio advertisements,
//! with signal strength and a liveness sweep.

use crate::core::types::{NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A neighbor as last advertised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// 6-byte peer id.
    pub id: NodeId,
    /// Display name from the advertisement.
    pub name: String,
    /// Latest signal strength in dBm (last-write-wins).
    pub rssi: i16,
    /// First advertisement, ms since epoch.
    pub first_seen_ms: u64,
    /// Most recent advertisement, ms since epoch.
    pub last_seen_ms: u64,
    /// Advertised node status.
    pub status: NodeStatus,
    /// Advertised protocol version.
    pub protocol_version: u8,
}

/// Internally synchronized table of live neighbors, keyed and ordered by
/// peer id. Entries age out after the liveness window.
pub struct PeerTable {
    inner: Mutex<BTreeMap<NodeId, PeerRecord>>,
    liveness_ms: u64,
}

impl PeerTable {
    /// Create a table with the given liveness window.
    pub fn new(liveness_ms: u64) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            liveness_ms,
        }
    }

    /// Upsert a sighting; returns true when the peer is newly discovered.
    pub fn observe(
        &self,
        id: NodeId,
        name: &str,
        rssi: i16,
        status: NodeStatus,
        protocol_version: u8,
        now_ms: u64,
    ) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(&id) {
            Some(rec) => {
                rec.name = name.to_string();
                rec.rssi = rssi;
                rec.last_seen_ms = now_ms;
                rec.status = status;
                rec.protocol_version = protocol_version;
                false
            }
            None => {
                map.insert(
                    id,
                    PeerRecord {
                        id,
                        name: name.to_string(),
                        rssi,
                        first_seen_ms: now_ms,
                        last_seen_ms: now_ms,
                        status,
                        protocol_version,
                    },
                );
                true
            }
        }
    }

    /// Snapshot of all live peers, ordered by id.
    pub fn list(&self) -> Vec<PeerRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Look up one peer.
    pub fn find(&self, id: &NodeId) -> Option<PeerRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Remove one peer.
    pub fn forget(&self, id: &NodeId) -> Option<PeerRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Evict peers unseen for longer than the liveness window; returns the
    /// evicted set so the controller can notify observers exactly once.
    pub fn sweep(&self, now_ms: u64) -> Vec<PeerRecord> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<NodeId> = map
            .values()
            .filter(|r| now_ms.saturating_sub(r.last_seen_ms) > self.liveness_ms)
            .map(|r| r.id)
            .collect();
        stale.iter().filter_map(|id| map.remove(id)).collect()
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when no peers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all peers (node shutdown).
    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
