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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Live peers gauge.
    pub peers: IntGauge,
    /// Store-and-forward queue depth gauge.
    pub queue_depth: IntGauge,

    /// Locally originated datagrams.
    pub originated_total: IntCounter,
    /// Local deliveries.
    pub delivered_total: IntCounter,
    /// Relay emissions.
    pub relayed_total: IntCounter,

    /// Drops: CRC/header failures.
    pub drop_checksum_total: IntCounter,
    /// Drops: malformed frames or records.
    pub drop_malformed_total: IntCounter,
    /// Drops: kind byte out of range.
    pub drop_unknown_kind_total: IntCounter,
    /// Drops: stale timestamp (replay guard).
    pub drop_stale_total: IntCounter,
    /// Drops: duplicate (message id, sender id).
    pub drop_duplicate_total: IntCounter,
    /// Drops: payload does not open under the local key.
    pub drop_decrypt_total: IntCounter,
    /// Drops: hop budget exhausted.
    pub drop_ttl_total: IntCounter,

    /// Radio writes that failed or timed out.
    pub send_failed_total: IntCounter,
    /// Queue entries discarded (expired or over-retried).
    pub queue_discarded_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers = IntGauge::new("emberlink_peers", "Live peers").map_err(|_| MetricsError::Prom)?;
        let queue_depth = IntGauge::new("emberlink_queue_depth", "Store-and-forward queue depth")
            .map_err(|_| MetricsError::Prom)?;

        let originated_total =
            IntCounter::new("emberlink_originated_total", "Locally originated datagrams")
                .map_err(|_| MetricsError::Prom)?;
        let delivered_total = IntCounter::new("emberlink_delivered_total", "Local deliveries")
            .map_err(|_| MetricsError::Prom)?;
        let relayed_total = IntCounter::new("emberlink_relayed_total", "Relay emissions")
            .map_err(|_| MetricsError::Prom)?;

        let drop_checksum_total =
            IntCounter::new("emberlink_drop_checksum_total", "Dropped: bad checksum")
                .map_err(|_| MetricsError::Prom)?;
        let drop_malformed_total =
            IntCounter::new("emberlink_drop_malformed_total", "Dropped: malformed")
                .map_err(|_| MetricsError::Prom)?;
        let drop_unknown_kind_total =
            IntCounter::new("emberlink_drop_unknown_kind_total", "Dropped: unknown kind")
                .map_err(|_| MetricsError::Prom)?;
        let drop_stale_total =
            IntCounter::new("emberlink_drop_stale_total", "Dropped: stale timestamp")
                .map_err(|_| MetricsError::Prom)?;
        let drop_duplicate_total =
            IntCounter::new("emberlink_drop_duplicate_total", "Dropped: duplicate")
                .map_err(|_| MetricsError::Prom)?;
        let drop_decrypt_total =
            IntCounter::new("emberlink_drop_decrypt_total", "Dropped: decrypt failed")
                .map_err(|_| MetricsError::Prom)?;
        let drop_ttl_total = IntCounter::new("emberlink_drop_ttl_total", "Dropped: ttl exhausted")
            .map_err(|_| MetricsError::Prom)?;

        let send_failed_total =
            IntCounter::new("emberlink_send_failed_total", "Failed radio writes")
                .map_err(|_| MetricsError::Prom)?;
        let queue_discarded_total = IntCounter::new(
            "emberlink_queue_discarded_total",
            "Queue entries expired or over-retried",
        )
        .map_err(|_| MetricsError::Prom)?;

        for c in [
            &originated_total,
            &delivered_total,
            &relayed_total,
            &drop_checksum_total,
            &drop_malformed_total,
            &drop_unknown_kind_total,
            &drop_stale_total,
            &drop_duplicate_total,
            &drop_decrypt_total,
            &drop_ttl_total,
            &send_failed_total,
            &queue_discarded_total,
        ] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|_| MetricsError::Prom)?;
        }
        registry
            .register(Box::new(peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            peers,
            queue_depth,
            originated_total,
            delivered_total,
            relayed_total,
            drop_checksum_total,
            drop_malformed_total,
            drop_unknown_kind_total,
            drop_stale_total,
            drop_duplicate_total,
            drop_decrypt_total,
            drop_ttl_total,
            send_failed_total,
            queue_discarded_total,
        })
    }
}
