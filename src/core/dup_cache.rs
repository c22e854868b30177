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

//! Duplicate suppression: remembers recently seen datagrams by their
//! duplicate key so each (message id, sender id) pair is delivered and
//! relayed at most once per node.

use std::collections::HashMap;
use std::sync::Mutex;

/// Bounded map of duplicate key to first-ingest timestamp. Internally
/// synchronized; a caller observes "already present" iff some prior
/// `mark_and_check` for the same key has returned.
pub struct DuplicateCache {
    inner: Mutex<HashMap<String, u64>>,
    capacity: usize,
    ttl_ms: u64,
}

impl DuplicateCache {
    /// Create a cache bounded to `capacity` entries living `ttl_ms` each.
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl_ms,
        }
    }

    /// Atomically insert `key` and report whether it was already present.
    /// When the bound is exceeded the oldest entry is evicted, keeping
    /// adversarial load finite.
    pub fn mark_and_check(&self, key: &str, now_ms: u64) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(key) {
            return true;
        }
        if map.len() >= self.capacity {
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, &ts)| ts)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }
        map.insert(key.to_string(), now_ms);
        false
    }

    /// Remove entries older than the TTL window; returns how many were
    /// expired.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, &mut ts| now_ms.saturating_sub(ts) <= self.ttl_ms);
        before - map.len()
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries (node shutdown).
    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
