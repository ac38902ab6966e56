//! Repository Port (C8, §4.8) — the narrow interface this core depends on.
//!
//! Real persistence (schema, connection pooling, the actual `STORE_URI`
//! backend) is explicitly out of scope (spec.md §1); this module defines the
//! trait contract plus a small in-memory adapter used by the demo binary and
//! the test suite. A production deployment swaps in a different `Repository`
//! implementation without touching C5/C7.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use crate::error::RepositoryError;
use crate::model::{AVLRecord, DeviceId, Point, WalkSession};

/// An opaque reference to a device row, returned by `lookup_device`.
pub trait Repository: Clone + Send + Sync + 'static {
    type DeviceRef: Clone + Send + Sync + 'static;
    type WalkHandle: Clone + Send + Sync + 'static;

    fn lookup_device(
        &self,
        device_id: &DeviceId,
    ) -> impl std::future::Future<Output = Result<Self::DeviceRef, RepositoryError>> + Send;

    fn append_record(
        &self,
        device: &Self::DeviceRef,
        record: &AVLRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn open_walk(
        &self,
        device: &Self::DeviceRef,
        initial_points: Vec<Point>,
    ) -> impl std::future::Future<Output = Result<Self::WalkHandle, RepositoryError>> + Send;

    fn extend_walk(
        &self,
        handle: &Self::WalkHandle,
        point: Point,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn close_walk(
        &self,
        handle: &Self::WalkHandle,
        end_ts_ms: i64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    #[allow(dead_code)]
    fn snapshot_active(
        &self,
        device: &Self::DeviceRef,
    ) -> impl std::future::Future<Output = Result<Option<Self::WalkHandle>, RepositoryError>> + Send;
}

/// §7: bounded retry for `StoreTransient` failures (max 3 attempts, 1s backoff).
/// `StoreFatal` is only treated as terminal during startup; at runtime it is
/// handled the same as a transient failure (one more reason not to retry
/// forever: the record is dropped and the device is expected to retransmit).
pub async fn with_retry<T, F, Fut>(op_name: &'static str, mut f: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RepositoryError>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(op = op_name, attempt, error = %e, "store call failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// An in-memory stand-in for the real store. Devices must be pre-provisioned
/// via [`InMemoryRepository::provision`] before a matching IMEI can log in,
/// mirroring the "Device entity exists before connection" lifecycle rule (§3).
#[derive(Clone)]
pub struct InMemoryRepository {
    devices: Arc<DashMap<DeviceId, ()>>,
    walks: Arc<DashMap<DeviceId, WalkSession>>,
    records: Arc<DashMap<DeviceId, Vec<AVLRecord>>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRef(pub DeviceId);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkHandle(pub DeviceId);

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(DashMap::new()),
            walks: Arc::new(DashMap::new()),
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn provision(&self, device_id: impl Into<DeviceId>) {
        self.devices.insert(device_id.into(), ());
    }

    #[allow(dead_code)]
    pub fn record_count(&self, device_id: &DeviceId) -> u64 {
        self.records.get(device_id).map(|v| v.len() as u64).unwrap_or(0)
    }

    /// The last record actually handed to `append_record`, including its
    /// full `projections`/`extra_io`/`io` decode — used to confirm the
    /// decoded record reaches the store rather than just its timestamp.
    #[allow(dead_code)]
    pub fn last_record(&self, device_id: &DeviceId) -> Option<AVLRecord> {
        self.records.get(device_id).and_then(|v| v.last().cloned())
    }

    #[allow(dead_code)]
    pub fn active_walk(&self, device_id: &DeviceId) -> Option<WalkSession> {
        self.walks.get(device_id).map(|w| w.clone())
    }

    #[allow(dead_code)]
    pub fn closed_walks_snapshot(&self) -> HashMap<DeviceId, WalkSession> {
        self.walks
            .iter()
            .filter(|e| !e.value().is_active)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    type DeviceRef = DeviceRef;
    type WalkHandle = WalkHandle;

    async fn lookup_device(&self, device_id: &DeviceId) -> Result<DeviceRef, RepositoryError> {
        if self.devices.contains_key(device_id) {
            Ok(DeviceRef(device_id.clone()))
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn append_record(
        &self,
        device: &DeviceRef,
        record: &AVLRecord,
    ) -> Result<(), RepositoryError> {
        self.records
            .entry(device.0.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn open_walk(
        &self,
        device: &DeviceRef,
        initial_points: Vec<Point>,
    ) -> Result<WalkHandle, RepositoryError> {
        // §3 invariant: at most one active walk per device. Establishing
        // this here (rather than in the tracker) keeps the uniqueness
        // guarantee at the store layer as spec.md §4.7 requires.
        if self
            .walks
            .get(&device.0)
            .map(|w| w.is_active)
            .unwrap_or(false)
        {
            return Err(RepositoryError::Fatal("walk already active".into()));
        }
        let walk = WalkSession::new(device.0.clone(), initial_points);
        self.walks.insert(device.0.clone(), walk);
        Ok(WalkHandle(device.0.clone()))
    }

    async fn extend_walk(&self, handle: &WalkHandle, point: Point) -> Result<(), RepositoryError> {
        let mut w = self
            .walks
            .get_mut(&handle.0)
            .ok_or(RepositoryError::NotFound)?;
        w.push_point(point);
        Ok(())
    }

    async fn close_walk(&self, handle: &WalkHandle, end_ts_ms: i64) -> Result<(), RepositoryError> {
        let mut w = self
            .walks
            .get_mut(&handle.0)
            .ok_or(RepositoryError::NotFound)?;
        w.close(end_ts_ms);
        Ok(())
    }

    async fn snapshot_active(
        &self,
        device: &DeviceRef,
    ) -> Result<Option<WalkHandle>, RepositoryError> {
        Ok(self
            .walks
            .get(&device.0)
            .filter(|w| w.is_active)
            .map(|_| WalkHandle(device.0.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unprovisioned_device_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo.lookup_device(&"999999999999999".to_string()).await;
        assert_eq!(err, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn provisioned_device_is_found() {
        let repo = InMemoryRepository::new();
        repo.provision("353691841005134");
        let dev = repo
            .lookup_device(&"353691841005134".to_string())
            .await
            .unwrap();
        assert_eq!(dev.0, "353691841005134");
    }

    #[tokio::test]
    async fn append_record_retains_the_full_decoded_record() {
        use crate::model::{Gps, IoGroups, Projections};
        use std::collections::HashMap;

        let repo = InMemoryRepository::new();
        repo.provision("353691841005134");
        let dev = repo
            .lookup_device(&"353691841005134".to_string())
            .await
            .unwrap();

        let mut projections = Projections::default();
        projections.battery_level_pct = Some(87);
        let record = AVLRecord {
            timestamp_ms: 1_700_000_000_000,
            priority: 1,
            gps: Gps {
                longitude: 25.0,
                latitude: 54.0,
                altitude_m: 120,
                heading_deg: 90,
                satellites: 7,
                speed_kmh: 30,
            },
            event_io_id: 240,
            io: IoGroups::default(),
            projections,
            extra_io: HashMap::new(),
        };

        repo.append_record(&dev, &record).await.unwrap();

        assert_eq!(repo.record_count(&"353691841005134".to_string()), 1);
        let stored = repo.last_record(&"353691841005134".to_string()).unwrap();
        assert_eq!(stored.gps.latitude, 54.0);
        assert_eq!(stored.projections.battery_level_pct, Some(87));
    }

    #[tokio::test]
    async fn open_walk_rejects_second_concurrent_active_walk() {
        let repo = InMemoryRepository::new();
        repo.provision("353691841005134");
        let dev = repo
            .lookup_device(&"353691841005134".to_string())
            .await
            .unwrap();
        let points = vec![Point {
            lat: 1.0,
            lon: 1.0,
            ts_ms: 0,
        }];
        repo.open_walk(&dev, points.clone()).await.unwrap();
        assert!(repo.open_walk(&dev, points).await.is_err());
    }

    #[tokio::test]
    async fn retry_helper_gives_up_after_three_attempts() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);
        let result: Result<(), RepositoryError> = with_retry("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RepositoryError::Transient("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
