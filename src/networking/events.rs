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

//! Observer bus: a tagged-variant event stream fanned out to registered
//! subscribers. Events are delivered from the controller's tasks, never
//! under an internal lock.

use crate::core::peers::PeerRecord;
use crate::core::types::{InnerRecord, MessageId, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Per-subscriber channel capacity. A subscriber that stops draining
/// loses events rather than stalling the node.
const OBSERVER_CAPACITY: usize = 256;

/// A message surfaced to the local application.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredMessage {
    /// Originator-assigned id.
    pub message_id: MessageId,
    /// Relay edges the arriving copy traversed.
    pub hop_count: u8,
    /// The decrypted record.
    pub record: InnerRecord,
}

/// Everything observers can see.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshEvent {
    /// A peer advertisement was seen for the first time.
    PeerDiscovered(PeerRecord),
    /// A peer aged out of the liveness window.
    PeerLost(NodeId),
    /// An SOS or DIRECT reached this node.
    MessageDelivered(DeliveredMessage),
    /// A locally originated message left the radio (or was given up on).
    MessageSent {
        /// The originated message.
        message_id: MessageId,
        /// False when the queue expired or exhausted its attempts.
        success: bool,
    },
    /// A peer acknowledged one of our DIRECT messages.
    AckReceived {
        /// Id of the acknowledged DIRECT.
        original_id: MessageId,
    },
}

/// Handle returned by [`ObserverBus::observe`]; pass it back to
/// [`ObserverBus::unobserve`] to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fan-out of [`MeshEvent`] to any number of subscribers.
#[derive(Default)]
pub struct ObserverBus {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<MeshEvent>>>,
    next_id: AtomicU64,
}

impl ObserverBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events arrive on the returned channel.
    pub fn observe(&self) -> (ObserverId, mpsc::Receiver<MeshEvent>) {
        let (tx, rx) = mpsc::channel(OBSERVER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        (ObserverId(id), rx)
    }

    /// Remove a subscriber. Dropping the receiver has the same effect
    /// lazily.
    pub fn unobserve(&self, id: ObserverId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id.0);
    }

    /// Deliver an event to every live subscriber. Closed and saturated
    /// subscribers are pruned and skipped respectively.
    pub fn emit(&self, event: MeshEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|_, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}
