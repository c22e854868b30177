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

//! Node controller: owns every component handle, runs the inbound,
//! outbound, and maintenance tasks, and exposes the embedder API
//! (start/stop, send SOS/DIRECT, peers, observe).

use crate::core::codec::{duplicate_key, CodecError};
use crate::core::config::MeshConfig;
use crate::core::dup_cache::DuplicateCache;
use crate::core::peers::{PeerRecord, PeerTable};
use crate::core::queue::ForwardQueue;
use crate::core::router::{RouterConfig, RoutingEngine};
use crate::core::store::{CacheActionRow, DeliveryStatus, MeshStore, MessageRow, StatRow, StoreError};
use crate::core::types::{
    DatagramKind, GeoLocation, InnerRecord, MessageId, NodeId, NodeStatus, SosType,
};
use crate::monitoring::metrics::Metrics;
use crate::networking::events::{DeliveredMessage, MeshEvent, ObserverBus, ObserverId};
use crate::networking::transport::{AdvertFrame, Advertisement, Transport, TransportRx};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Radio-link write deadline.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on task teardown after `stop()` signals.
const STOP_GRACE: Duration = Duration::from_millis(250);
const OUTBOUND_CAPACITY: usize = 1024;

/// Controller errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// `start()` while already running.
    #[error("already running")]
    AlreadyRunning,
    /// Send or status change before `start()`.
    #[error("not running")]
    NotRunning,
    /// The radio subsystem cannot be initialized.
    #[error("radio unavailable")]
    RadioUnavailable,
    /// Recipient is not 12 hex characters.
    #[error("invalid recipient")]
    InvalidRecipient,
    /// Configured self id is invalid.
    #[error("invalid config")]
    Config,
    /// Record cannot be encoded into one datagram.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    /// Durable store failure at startup.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// Metrics registry failure at startup.
    #[error("metrics")]
    Metrics,
}

/// One datagram headed for the radio.
struct Outbound {
    message_id: MessageId,
    bytes: Vec<u8>,
    origin_ts_ms: u64,
    locally_originated: bool,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    outbound_tx: mpsc::Sender<Outbound>,
}

/// Everything the long-lived tasks share.
struct Ctx {
    self_id: NodeId,
    router: RoutingEngine,
    cache: Arc<DuplicateCache>,
    peers: PeerTable,
    queue: ForwardQueue,
    bus: ObserverBus,
    metrics: Arc<Metrics>,
    store: Option<MeshStore>,
    transport: Arc<dyn Transport>,
}

/// A mesh node. The embedder owns the value; `start`/`stop` bound its
/// lifecycle, and any number of nodes can coexist in one process.
pub struct MeshNode {
    cfg: MeshConfig,
    ctx: Arc<Ctx>,
    running: Mutex<Option<Running>>,
}

impl MeshNode {
    /// Build a node over the given transport. Opens the durable store
    /// when the config names a data directory.
    pub fn new(cfg: MeshConfig, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        let self_id = cfg.resolve_self_id().map_err(|_| NodeError::Config)?;
        let metrics = Arc::new(Metrics::new().map_err(|_| NodeError::Metrics)?);
        let store = match cfg.data_dir.as_deref() {
            Some(dir) => Some(MeshStore::open(dir)?),
            None => None,
        };
        let cache = Arc::new(DuplicateCache::new(cfg.dup_cache_size, cfg.dup_cache_ttl_ms));
        let router = RoutingEngine::new(
            RouterConfig {
                local_id: self_id,
                initial_ttl: cfg.initial_ttl,
                timestamp_tolerance_ms: cfg.timestamp_tolerance_ms,
            },
            cfg.network_key(),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        );
        let ctx = Arc::new(Ctx {
            self_id,
            router,
            cache,
            peers: PeerTable::new(cfg.peer_liveness_ms),
            queue: ForwardQueue::new(cfg.queue_retry_ms, cfg.queue_max_attempts, cfg.queue_expiry_ms),
            bus: ObserverBus::new(),
            metrics,
            store,
            transport,
        });
        Ok(Self {
            cfg,
            ctx,
            running: Mutex::new(None),
        })
    }

    /// Local node id.
    pub fn node_id(&self) -> NodeId {
        self.ctx.self_id
    }

    /// Metrics registry for scraping by the embedder.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.ctx.metrics)
    }

    /// Initialize components and start the transport. Fails with
    /// [`NodeError::AlreadyRunning`] on a second call and
    /// [`NodeError::RadioUnavailable`] when the radio cannot come up.
    pub async fn start(&self) -> Result<(), NodeError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let advert = AdvertFrame::new(self.ctx.self_id, &self.cfg.node_name);
        let rx = self
            .ctx
            .transport
            .start(advert)
            .await
            .map_err(|_| NodeError::RadioUnavailable)?;

        // Recover queue entries persisted before the last shutdown.
        if let Some(store) = &self.ctx.store {
            match store.queue_entries() {
                Ok(entries) => {
                    for e in entries {
                        self.ctx.queue.restore(e);
                    }
                }
                Err(e) => warn!(?e, "queue recovery failed"),
            }
            self.ctx
                .metrics
                .queue_depth
                .set(self.ctx.queue.len() as i64);
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            spawn_inbound(Arc::clone(&self.ctx), rx, outbound_tx.clone(), shutdown.subscribe()),
            spawn_outbound(Arc::clone(&self.ctx), outbound_rx, shutdown.subscribe()),
            spawn_maintenance(Arc::clone(&self.ctx), &self.cfg, shutdown.subscribe()),
        ];

        info!(node = %self.ctx.self_id, "mesh node started");
        *running = Some(Running {
            shutdown,
            tasks,
            outbound_tx,
        });
        Ok(())
    }

    /// Halt transport and tasks, then flush the peer table, duplicate
    /// cache, and in-memory queue. Idempotent; ACKs in flight may be
    /// dropped. Observers receive no further events after this returns.
    pub async fn stop(&self) {
        let Some(run) = self.running.lock().await.take() else {
            return;
        };
        let _ = run.shutdown.send(true);
        self.ctx.transport.shutdown().await;

        let aborts: Vec<_> = run.tasks.iter().map(|t| t.abort_handle()).collect();
        let joined = tokio::time::timeout(STOP_GRACE, futures::future::join_all(run.tasks)).await;
        if joined.is_err() {
            warn!("tasks exceeded stop grace; aborting");
            for a in aborts {
                a.abort();
            }
        }

        self.ctx.peers.clear();
        self.ctx.cache.clear();
        self.ctx.queue.clear();
        self.ctx.metrics.peers.set(0);
        self.ctx.metrics.queue_depth.set(0);
        info!(node = %self.ctx.self_id, "mesh node stopped");
    }

    /// Originate an SOS broadcast; returns its message id.
    pub async fn send_sos(
        &self,
        content: &str,
        location: GeoLocation,
        sos_type: SosType,
    ) -> Result<MessageId, NodeError> {
        let now = now_ms();
        let frame = self.ctx.router.originate_sos(content, location, sos_type, now)?;
        self.dispatch_origination(frame.message_id, frame.to_bytes(), content, self.ctx.self_id, DatagramKind::Sos, now)
            .await
    }

    /// Originate a DIRECT note. The recipient is the peer's 12-hex-char
    /// id; a malformed id is surfaced synchronously.
    pub async fn send_direct(
        &self,
        recipient: &str,
        content: &str,
    ) -> Result<MessageId, NodeError> {
        let recipient: NodeId = recipient.parse().map_err(|_| NodeError::InvalidRecipient)?;
        let now = now_ms();
        let frame = self.ctx.router.originate_direct(recipient, content, now)?;
        self.dispatch_origination(frame.message_id, frame.to_bytes(), content, recipient, DatagramKind::Direct, now)
            .await
    }

    async fn dispatch_origination(
        &self,
        message_id: MessageId,
        bytes: Vec<u8>,
        content: &str,
        peer: NodeId,
        kind: DatagramKind,
        now: u64,
    ) -> Result<MessageId, NodeError> {
        let outbound_tx = {
            let running = self.running.lock().await;
            let Some(run) = running.as_ref() else {
                return Err(NodeError::NotRunning);
            };
            run.outbound_tx.clone()
        };
        if let Some(store) = &self.ctx.store {
            let row = MessageRow {
                id: message_id,
                kind: kind.as_byte(),
                peer,
                content: content.to_string(),
                hops: 0,
                created_ms: now,
                status: DeliveryStatus::Pending,
                synced: false,
            };
            if let Err(e) = store.record_message(&row) {
                warn!(?e, "message row write failed");
            }
        }
        let item = Outbound {
            message_id,
            bytes,
            origin_ts_ms: now,
            locally_originated: true,
        };
        outbound_tx
            .send(item)
            .await
            .map_err(|_| NodeError::NotRunning)?;
        Ok(message_id)
    }

    /// Snapshot of live peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.ctx.peers.list()
    }

    /// Subscribe to mesh events.
    pub fn observe(&self) -> (ObserverId, mpsc::Receiver<MeshEvent>) {
        self.ctx.bus.observe()
    }

    /// Unsubscribe.
    pub fn unobserve(&self, id: ObserverId) {
        self.ctx.bus.unobserve(id);
    }

    /// Change the advertised node status (battery/load signals).
    pub async fn set_status(&self, status: NodeStatus) -> Result<(), NodeError> {
        if self.running.lock().await.is_none() {
            return Err(NodeError::NotRunning);
        }
        let mut advert = AdvertFrame::new(self.ctx.self_id, &self.cfg.node_name);
        advert.status = status;
        self.ctx.transport.set_advertisement(advert).await;
        Ok(())
    }
}

fn spawn_inbound(
    ctx: Arc<Ctx>,
    rx: TransportRx,
    outbound_tx: mpsc::Sender<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let TransportRx {
        mut adverts,
        mut inbound,
    } = rx;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = inbound.recv() => match maybe {
                    Some(bytes) => ctx.process_inbound(&bytes, &outbound_tx).await,
                    None => break,
                },
                maybe = adverts.recv() => match maybe {
                    Some(adv) => ctx.process_advert(adv),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("inbound task stopped");
    })
}

fn spawn_outbound(
    ctx: Arc<Ctx>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = outbound_rx.recv() => match maybe {
                    Some(item) => ctx.transmit_or_queue(item).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("outbound task stopped");
    })
}

fn spawn_maintenance(
    ctx: Arc<Ctx>,
    cfg: &MeshConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Cadences scale with the configured windows; the defaults land on
    // 60 s / 10 s / 30 s.
    let dup_period = Duration::from_millis((cfg.dup_cache_ttl_ms / 5).max(1));
    let peer_period = Duration::from_millis((cfg.peer_liveness_ms / 3).max(1));
    let queue_period = Duration::from_millis(cfg.queue_retry_ms.max(1));
    tokio::spawn(async move {
        let mut dup_tick = tokio::time::interval(dup_period);
        let mut peer_tick = tokio::time::interval(peer_period);
        let mut queue_tick = tokio::time::interval(queue_period);
        loop {
            tokio::select! {
                _ = dup_tick.tick() => ctx.sweep_cache_and_store(),
                _ = peer_tick.tick() => ctx.sweep_peers(),
                _ = queue_tick.tick() => ctx.drain_queue().await,
                _ = shutdown.changed() => break,
            }
        }
        debug!("maintenance task stopped");
    })
}

impl Ctx {
    fn process_advert(&self, adv: Advertisement) {
        if adv.peer == self.self_id {
            return;
        }
        let newly = self.peers.observe(
            adv.peer,
            &adv.name,
            adv.rssi,
            adv.status,
            adv.protocol_version,
            now_ms(),
        );
        self.metrics.peers.set(self.peers.len() as i64);
        if newly {
            if let Some(record) = self.peers.find(&adv.peer) {
                info!(peer = %record.id, rssi = record.rssi, "peer discovered");
                if let Some(store) = &self.store {
                    if let Err(e) = store.record_peer(&record) {
                        warn!(?e, "peer row write failed");
                    }
                }
                self.bus.emit(MeshEvent::PeerDiscovered(record));
            }
        } else if let Some(store) = &self.store {
            if let Some(record) = self.peers.find(&adv.peer) {
                let _ = store.record_peer(&record);
            }
        }
    }

    async fn process_inbound(&self, bytes: &[u8], outbound_tx: &mpsc::Sender<Outbound>) {
        let now = now_ms();
        let outcome = self.router.ingest(bytes, now);

        if let Some(record) = outcome.delivery {
            let message_id = outcome
                .message_id
                .expect("delivery implies a parsed header");
            let key = duplicate_key(&message_id, &record.sender());
            self.record_cache_action(&key, "delivered", now);
            match &record {
                InnerRecord::Ack(ack) => {
                    let original_id = ack.original_message_id;
                    if let Some(store) = &self.store {
                        let _ = store.set_message_status(&original_id, DeliveryStatus::Delivered);
                    }
                    self.bus.emit(MeshEvent::AckReceived { original_id });
                }
                InnerRecord::Sos(_) | InnerRecord::Direct(_) => {
                    if let Some(store) = &self.store {
                        let content = match &record {
                            InnerRecord::Sos(r) => r.content.clone(),
                            InnerRecord::Direct(r) => r.content.clone(),
                            InnerRecord::Ack(_) => String::new(),
                        };
                        let row = MessageRow {
                            id: message_id,
                            kind: record.kind().as_byte(),
                            peer: record.sender(),
                            content,
                            hops: outcome.hop_count,
                            created_ms: now,
                            status: DeliveryStatus::Delivered,
                            synced: false,
                        };
                        if let Err(e) = store.record_message(&row) {
                            warn!(?e, "message row write failed");
                        }
                    }
                    self.bus.emit(MeshEvent::MessageDelivered(DeliveredMessage {
                        message_id,
                        hop_count: outcome.hop_count,
                        record,
                    }));
                }
            }
        }

        if let Some(ack) = outcome.ack {
            let item = Outbound {
                message_id: ack.message_id,
                bytes: ack.to_bytes(),
                origin_ts_ms: u64::from(ack.timestamp) * 1000,
                locally_originated: false,
            };
            let _ = outbound_tx.send(item).await;
        }

        if let Some(relay) = outcome.relay {
            let key = duplicate_key(&relay.message_id, &relay.sender);
            self.record_cache_action(&key, "relayed", now);
            let item = Outbound {
                message_id: relay.message_id,
                origin_ts_ms: u64::from(relay.timestamp) * 1000,
                bytes: relay.to_bytes(),
                locally_originated: false,
            };
            let _ = outbound_tx.send(item).await;
        }
    }

    async fn transmit_or_queue(&self, item: Outbound) {
        let successes = self.broadcast_timed(item.bytes.clone()).await;
        let now = now_ms();
        if successes == 0 {
            match self.queue.enqueue(
                item.message_id,
                item.bytes,
                item.origin_ts_ms,
                item.locally_originated,
                now,
            ) {
                Some(entry) => {
                    debug!(id = %item.message_id, "no peers reachable; queued");
                    if let Some(store) = &self.store {
                        let _ = store.queue_put(&entry);
                    }
                }
                None => {
                    self.metrics.queue_discarded_total.inc();
                    if item.locally_originated {
                        self.bus.emit(MeshEvent::MessageSent {
                            message_id: item.message_id,
                            success: false,
                        });
                    }
                }
            }
            self.metrics.queue_depth.set(self.queue.len() as i64);
        } else if item.locally_originated {
            if let Some(store) = &self.store {
                let _ = store.set_message_status(&item.message_id, DeliveryStatus::Sent);
            }
            self.bus.emit(MeshEvent::MessageSent {
                message_id: item.message_id,
                success: true,
            });
        }
    }

    async fn broadcast_timed(&self, bytes: Vec<u8>) -> usize {
        match tokio::time::timeout(SEND_TIMEOUT, self.transport.broadcast(bytes)).await {
            Ok(n) => {
                if n == 0 {
                    self.metrics.send_failed_total.inc();
                }
                n
            }
            Err(_) => {
                warn!("broadcast timed out");
                self.metrics.send_failed_total.inc();
                0
            }
        }
    }

    fn sweep_cache_and_store(&self) {
        let now = now_ms();
        let expired = self.cache.sweep(now);
        if expired > 0 {
            debug!(expired, "duplicate cache swept");
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.purge_expired(now) {
                warn!(?e, "store purge failed");
            }
            let samples = [
                ("delivered_total", self.metrics.delivered_total.get()),
                ("relayed_total", self.metrics.relayed_total.get()),
                ("originated_total", self.metrics.originated_total.get()),
            ];
            for (kind, value) in samples {
                let _ = store.record_stat(&StatRow {
                    kind: kind.to_string(),
                    value: value as i64,
                    timestamp_ms: now,
                    metadata: None,
                });
            }
        }
    }

    fn sweep_peers(&self) {
        let evicted = self.peers.sweep(now_ms());
        for peer in evicted {
            info!(peer = %peer.id, "peer lost");
            self.bus.emit(MeshEvent::PeerLost(peer.id));
        }
        self.metrics.peers.set(self.peers.len() as i64);
    }

    async fn drain_queue(&self) {
        let now = now_ms();
        let has_peers = !self.transport.connected_peers().await.is_empty();
        for entry in self.queue.drain(now, has_peers) {
            let successes = self.broadcast_timed(entry.bytes.clone()).await;
            if successes > 0 {
                if let Some(store) = &self.store {
                    let _ = store.queue_remove(&entry.message_id);
                    if entry.locally_originated {
                        let _ = store.set_message_status(&entry.message_id, DeliveryStatus::Sent);
                    }
                }
                if entry.locally_originated {
                    self.bus.emit(MeshEvent::MessageSent {
                        message_id: entry.message_id,
                        success: true,
                    });
                }
            } else {
                let entry = self.queue.requeue(entry, now);
                if let Some(store) = &self.store {
                    let _ = store.queue_put(&entry);
                }
            }
        }
        for entry in self.queue.sweep(now) {
            self.metrics.queue_discarded_total.inc();
            if let Some(store) = &self.store {
                let _ = store.queue_remove(&entry.message_id);
                let _ = store.set_message_status(&entry.message_id, DeliveryStatus::Failed);
            }
            if entry.locally_originated {
                self.bus.emit(MeshEvent::MessageSent {
                    message_id: entry.message_id,
                    success: false,
                });
            }
        }
        self.metrics.queue_depth.set(self.queue.len() as i64);
    }

    fn record_cache_action(&self, key: &str, action: &str, now: u64) {
        if let Some(store) = &self.store {
            let _ = store.record_cache_action(&CacheActionRow {
                key: key.to_string(),
                action: action.to_string(),
                marked_ms: now,
            });
        }
    }
}

/// Wall clock in ms since the UNIX epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
