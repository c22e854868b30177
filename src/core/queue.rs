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

//! Store-and-forward queue: buffers outbound datagrams while the node is
//! partitioned and retries them on a fixed interval until they expire or
//! exhaust their attempt budget.

use crate::core::types::MessageId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One buffered datagram. Carries the full encoded bytes so the routing
/// decisions made at origination are preserved exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Originator-assigned id (for `message_sent` notifications).
    pub message_id: MessageId,
    /// Complete wire image.
    pub bytes: Vec<u8>,
    /// Datagram origination time, ms since epoch; the expiry base.
    pub origin_ts_ms: u64,
    /// True when this node originated the datagram (relays carry no local
    /// observer contract).
    pub locally_originated: bool,
    /// Transmission attempts so far.
    pub attempts: u32,
    /// Earliest next transmission, ms since epoch.
    pub next_attempt_ms: u64,
}

/// FIFO retry queue with deadline scheduling. Internally synchronized;
/// only the maintenance ticker drains it.
pub struct ForwardQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    retry_interval_ms: u64,
    max_attempts: u32,
    expiry_ms: u64,
}

impl ForwardQueue {
    /// Create a queue with the given retry policy.
    pub fn new(retry_interval_ms: u64, max_attempts: u32, expiry_ms: u64) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retry_interval_ms,
            max_attempts,
            expiry_ms,
        }
    }

    /// Buffer a datagram whose send found no peers. The first attempt is
    /// scheduled one retry interval out. Datagrams already older than the
    /// expiry are rejected; returns the accepted entry (for persistence)
    /// or `None`.
    pub fn enqueue(
        &self,
        message_id: MessageId,
        bytes: Vec<u8>,
        origin_ts_ms: u64,
        locally_originated: bool,
        now_ms: u64,
    ) -> Option<QueueEntry> {
        if now_ms.saturating_sub(origin_ts_ms) > self.expiry_ms {
            return None;
        }
        let entry = QueueEntry {
            message_id,
            bytes,
            origin_ts_ms,
            locally_originated,
            attempts: 0,
            next_attempt_ms: now_ms + self.retry_interval_ms,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(entry.clone());
        Some(entry)
    }

    /// Re-insert an entry recovered from the durable store, scheduling
    /// and attempt counter intact.
    pub fn restore(&self, entry: QueueEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(entry);
    }

    /// Remove and return the entries due for transmission, preserving
    /// FIFO order. Produces nothing while no peers are reachable.
    pub fn drain(&self, now_ms: u64, has_peers: bool) -> Vec<QueueEntry> {
        if !has_peers {
            return Vec::new();
        }
        let mut q = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        let mut rest = VecDeque::with_capacity(q.len());
        for entry in q.drain(..) {
            if entry.next_attempt_ms <= now_ms {
                due.push(entry);
            } else {
                rest.push_back(entry);
            }
        }
        *q = rest;
        due
    }

    /// Put back a drained entry whose transmission failed, with the
    /// attempt counted and the deadline bumped by one interval. Returns
    /// the updated entry for persistence.
    pub fn requeue(&self, mut entry: QueueEntry, now_ms: u64) -> QueueEntry {
        entry.attempts += 1;
        entry.next_attempt_ms = now_ms + self.retry_interval_ms;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(entry.clone());
        entry
    }

    /// Discard expired and over-retried entries; returns them so the
    /// controller can notify `message_sent(id, false)` exactly once.
    pub fn sweep(&self, now_ms: u64) -> Vec<QueueEntry> {
        let mut q = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut discarded = Vec::new();
        let mut rest = VecDeque::with_capacity(q.len());
        for entry in q.drain(..) {
            let expired = now_ms.saturating_sub(entry.origin_ts_ms) > self.expiry_ms;
            if expired || entry.attempts >= self.max_attempts {
                discarded.push(entry);
            } else {
                rest.push_back(entry);
            }
        }
        *q = rest;
        discarded
    }

    /// Buffered entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries (node shutdown).
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
