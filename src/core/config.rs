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

//! Node configuration: every tunable of the mesh subsystem, TOML-loadable
//! with serde defaults.

use crate::core::types::{NetworkKey, NodeId};
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read config file.
    #[error("read config")]
    Read,
    /// Cannot parse TOML.
    #[error("parse config")]
    Parse,
    /// `self_id` is not 12 hex characters.
    #[error("invalid self id")]
    InvalidSelfId,
}

/// Radio duty cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Maximum duty cycle, maximum battery drain.
    Aggressive,
    /// Default trade-off.
    #[default]
    Balanced,
    /// Low duty cycle for long deployments.
    Conservative,
}

/// Mesh node configuration. Every field has a default, so an empty TOML
/// document is a valid config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Pre-shared symmetric network key, hex. Truncated or zero-padded
    /// to 16 bytes.
    pub network_key_hex: String,
    /// 6-byte node id as 12 hex chars; random at first start when unset.
    pub self_id: Option<String>,
    /// Display name carried in the advertisement.
    pub node_name: String,
    /// Hop budget for originated messages.
    pub initial_ttl: u8,
    /// Milliseconds between outgoing advertisements.
    pub advertise_period_ms: u64,
    /// Radio duty cycle.
    pub scan_mode: ScanMode,
    /// Duplicate cache bound.
    pub dup_cache_size: usize,
    /// Duplicate cache entry lifetime, ms.
    pub dup_cache_ttl_ms: u64,
    /// Freshness window for inbound timestamps, ms.
    pub timestamp_tolerance_ms: u64,
    /// Peer eviction window, ms.
    pub peer_liveness_ms: u64,
    /// Store-and-forward retry interval, ms.
    pub queue_retry_ms: u64,
    /// Store-and-forward attempt bound.
    pub queue_max_attempts: u32,
    /// Store-and-forward total entry lifetime, ms.
    pub queue_expiry_ms: u64,
    /// Durable store directory; None runs the node volatile.
    pub data_dir: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            // Pre-shared key of the open emergency network; deployments
            // override this.
            network_key_hex: hex::encode(b"emberlink-net-01"),
            self_id: None,
            node_name: "emberlink".to_string(),
            initial_ttl: 5,
            advertise_period_ms: 1_000,
            scan_mode: ScanMode::default(),
            dup_cache_size: 500,
            dup_cache_ttl_ms: 300_000,
            timestamp_tolerance_ms: 300_000,
            peer_liveness_ms: 30_000,
            queue_retry_ms: 30_000,
            queue_max_attempts: 20,
            queue_expiry_ms: 3_600_000,
            data_dir: None,
        }
    }
}

impl MeshConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|_| ConfigError::Parse)
    }

    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
        Self::from_toml_str(&raw)
    }

    /// Resolved network key. Surrounding whitespace is ignored on both
    /// branches so a padded TOML value derives the same key everywhere.
    pub fn network_key(&self) -> NetworkKey {
        let raw = self.network_key_hex.trim();
        match hex::decode(raw) {
            Ok(bytes) => NetworkKey::from_bytes(&bytes),
            // Non-hex strings are taken as raw passphrase bytes.
            Err(_) => NetworkKey::from_bytes(raw.as_bytes()),
        }
    }

    /// Resolved node id: the configured one, or a random one.
    pub fn resolve_self_id(&self) -> Result<NodeId, ConfigError> {
        match self.self_id.as_deref() {
            Some(s) => s.parse().map_err(|_| ConfigError::InvalidSelfId),
            None => Ok(NodeId::random()),
        }
    }
}
