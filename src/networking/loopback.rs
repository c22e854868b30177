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

//! In-process loopback transport: many nodes in one process wired through
//! a hub with an explicit link topology. Used by the demo binary and the
//! end-to-end tests (chains, triangles, partitions, cliques).
//!
//! The hub models the radio faithfully enough for the protocol engine:
//! advertisements fan out on a periodic cadence, datagrams are delivered
//! at most once per link, links can appear and disappear at any time, and
//! per-link and per-emission counters expose what "the wire" carried.

use crate::networking::transport::{
    AdvertFrame, Advertisement, Transport, TransportError, TransportRx,
};
use crate::core::types::NodeId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_RSSI: i16 = -50;

struct Port {
    advert_tx: mpsc::Sender<Advertisement>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    advert: AdvertFrame,
}

#[derive(Default)]
struct HubState {
    ports: HashMap<NodeId, Port>,
    links: HashMap<(NodeId, NodeId), i16>,
    radio_down: HashMap<NodeId, bool>,
    emissions: u64,
    link_copies: u64,
}

impl HubState {
    fn neighbors(&self, of: NodeId) -> Vec<(NodeId, i16)> {
        self.links
            .iter()
            .filter_map(|(&(a, b), &rssi)| {
                if a == of {
                    Some((b, rssi))
                } else if b == of {
                    Some((a, rssi))
                } else {
                    None
                }
            })
            .collect()
    }
}

fn link_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared medium connecting loopback transports.
#[derive(Default)]
pub struct LoopbackHub {
    state: Mutex<HubState>,
}

impl LoopbackHub {
    /// Empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport handle for one node.
    pub fn transport(
        self: &Arc<Self>,
        node: NodeId,
        advertise_period_ms: u64,
    ) -> LoopbackTransport {
        LoopbackTransport {
            hub: Arc::clone(self),
            node,
            advertise_period_ms,
            shutdown: Mutex::new(None),
        }
    }

    /// Connect two nodes at the default signal strength.
    pub fn link(&self, a: NodeId, b: NodeId) {
        self.link_with_rssi(a, b, DEFAULT_RSSI);
    }

    /// Connect two nodes with an explicit RSSI.
    pub fn link_with_rssi(&self, a: NodeId, b: NodeId, rssi: i16) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.links.insert(link_key(a, b), rssi);
    }

    /// Sever the link between two nodes (partition).
    pub fn unlink(&self, a: NodeId, b: NodeId) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.links.remove(&link_key(a, b));
    }

    /// Simulate a dead radio: subsequent `start` for `node` fails.
    pub fn set_radio_down(&self, node: NodeId, down: bool) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.radio_down.insert(node, down);
    }

    /// Broadcast/send calls that reached at least one link.
    pub fn emissions(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).emissions
    }

    /// Per-link datagram copies carried so far.
    pub fn link_copies(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .link_copies
    }
}

/// One node's handle onto the hub.
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    node: NodeId,
    advertise_period_ms: u64,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl LoopbackTransport {
    fn push_adverts(hub: &LoopbackHub, node: NodeId) {
        let st = hub.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(port) = st.ports.get(&node) else {
            return;
        };
        // Round-trip through the 24-byte blob, as a radio would.
        let Some(frame) = AdvertFrame::parse(&port.advert.encode()) else {
            return;
        };
        for (peer, rssi) in st.neighbors(node) {
            if let Some(peer_port) = st.ports.get(&peer) {
                let _ = peer_port.advert_tx.try_send(Advertisement {
                    peer: frame.node,
                    name: frame.name.clone(),
                    rssi,
                    status: frame.status,
                    protocol_version: frame.protocol_version,
                });
            }
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn start(&self, advert: AdvertFrame) -> Result<TransportRx, TransportError> {
        let (advert_tx, adverts) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        {
            let mut st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
            if st.radio_down.get(&self.node).copied().unwrap_or(false) {
                return Err(TransportError::RadioUnavailable);
            }
            st.ports.insert(
                self.node,
                Port {
                    advert_tx,
                    inbound_tx,
                    advert,
                },
            );
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.shutdown.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);

        let hub = Arc::clone(&self.hub);
        let node = self.node;
        let period = std::time::Duration::from_millis(self.advertise_period_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::push_adverts(&hub, node),
                    _ = stop_rx.changed() => {
                        debug!(%node, "advertiser stopped");
                        break;
                    }
                }
            }
        });

        Ok(TransportRx { adverts, inbound })
    }

    async fn set_advertisement(&self, advert: AdvertFrame) {
        let mut st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(port) = st.ports.get_mut(&self.node) {
            port.advert = advert;
        }
    }

    async fn connected_peers(&self) -> Vec<NodeId> {
        let st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        st.neighbors(self.node)
            .into_iter()
            .filter(|(peer, _)| st.ports.contains_key(peer))
            .map(|(peer, _)| peer)
            .collect()
    }

    async fn send(&self, peer: NodeId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        if !st.links.contains_key(&link_key(self.node, peer)) {
            return Err(TransportError::NotConnected);
        }
        let Some(port) = st.ports.get(&peer) else {
            return Err(TransportError::NotConnected);
        };
        port.inbound_tx
            .try_send(bytes)
            .map_err(|_| TransportError::WriteFailed)?;
        st.emissions += 1;
        st.link_copies += 1;
        Ok(())
    }

    async fn broadcast(&self, bytes: Vec<u8>) -> usize {
        let mut st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        let neighbors = st.neighbors(self.node);
        let mut successes = 0u64;
        for (peer, _) in &neighbors {
            if let Some(port) = st.ports.get(peer) {
                if port.inbound_tx.try_send(bytes.clone()).is_ok() {
                    successes += 1;
                }
            }
        }
        if successes > 0 {
            st.emissions += 1;
            st.link_copies += successes;
        }
        successes as usize
    }

    async fn shutdown(&self) {
        if let Some(stop) = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = stop.send(true);
        }
        let mut st = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        st.ports.remove(&self.node);
    }
}
