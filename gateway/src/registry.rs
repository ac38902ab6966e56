//! Device Registry (C6, §4.6): the one piece of shared mutable state in the
//! gateway, keyed by device id, backed by a [`DashMap`] the way the teacher's
//! `AppState` keys its connection table (no single global mutex).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::info;

use crate::model::{ActiveDevice, DeviceId};

/// §4.6: reconnect-while-connected policy. The new session always wins; the
/// old one is told to close via its `Notify` handle.
pub struct Registered {
    pub peer_address: String,
    pub connected_at_ms: i64,
    pub last_activity_at_ms: i64,
    pub bytes_received: u64,
    pub packets_processed: u64,
    /// Signaled to tell a previous session for this device to close (`Replaced`).
    pub evict: Arc<Notify>,
}

#[derive(Default)]
pub struct Registry {
    devices: DashMap<DeviceId, Registered>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registers a newly-authenticated session, evicting any prior session
    /// for the same device id (§4.6 "AlreadyConnected: replace the old
    /// session" policy). Returns the new session's own `Notify` handle so the
    /// caller can be told to close if it is later replaced in turn.
    pub fn register(&self, device_id: DeviceId, peer_address: String) -> Arc<Notify> {
        let evict = Arc::new(Notify::new());
        let ts = now_ms();
        if let Some((_, old)) = self.devices.remove(&device_id) {
            info!(device = %device_id, peer = %old.peer_address, "evicting prior session on reconnect");
            old.evict.notify_one();
        }
        self.devices.insert(
            device_id,
            Registered {
                peer_address,
                connected_at_ms: ts,
                last_activity_at_ms: ts,
                bytes_received: 0,
                packets_processed: 0,
                evict: evict.clone(),
            },
        );
        evict
    }

    /// Updates liveness counters after a frame is processed.
    pub fn touch(&self, device_id: &DeviceId, bytes: u64, packets: u64) {
        if let Some(mut e) = self.devices.get_mut(device_id) {
            e.last_activity_at_ms = now_ms();
            e.bytes_received += bytes;
            e.packets_processed += packets;
        }
    }

    /// Removes the device's entry, but only if `evict` still matches the
    /// registered handle — guards against a session racing its own eviction
    /// notice and deleting a newer session's row.
    pub fn unregister(&self, device_id: &DeviceId, evict: &Arc<Notify>) {
        self.devices.remove_if(device_id, |_, v| Arc::ptr_eq(&v.evict, evict));
    }

    pub fn snapshot(&self) -> Vec<ActiveDevice> {
        self.devices
            .iter()
            .map(|e| ActiveDevice {
                device_id: e.key().clone(),
                peer_address: e.value().peer_address.clone(),
                connected_at_ms: e.value().connected_at_ms,
                last_activity_at_ms: e.value().last_activity_at_ms,
                bytes_received: e.value().bytes_received,
                packets_processed: e.value().packets_processed,
            })
            .collect()
    }
}
