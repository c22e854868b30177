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

//! Emberlink - BLE mesh relay node for off-grid emergency messaging.
//!
//! This crate provides:
//! - A binary wire codec with CRC-16 framing and an AES-128-CBC payload envelope
//! - Controlled-flooding routing with duplicate suppression and TTL budgets
//! - Peer discovery and liveness tracking driven by radio advertisements
//! - A store-and-forward queue for partitioned operation
//! - A node controller with start/stop lifecycle and an observer event bus
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (types, codec, routing, caches, queue, config, store).
pub mod core;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// Transport seam, loopback transport, and the node controller.
pub mod networking;
