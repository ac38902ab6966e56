//! Movement Tracker (C7, §4.7): per-device Idle → WarmingUp → Saving state
//! machine driven by a stream of incoming [`AVLRecord`]s.
//!
//! One [`Tracker`] instance is owned by the [`crate::session::Session`] for a
//! device; there is no shared mutable state here, so no locking is needed.

use tracing::debug;

use crate::model::{AVLRecord, DeviceId, Point};
use crate::repository::Repository;

/// §4.7 hysteresis thresholds, configurable via [`crate::config::Config`].
/// Five minutes is the canonicalized default for both windows: the source
/// variants disagreed (30s/1min/5min), and the spec's worked examples (§8,
/// S4/S5) exercise a 5-minute gap as the canonical "walk ends" case.
#[derive(Debug, Clone, Copy)]
pub struct TrackerParams {
    pub warmup_ms: i64,
    pub idle_ms: i64,
    pub speed_threshold_kmh: u16,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            warmup_ms: 5 * 60 * 1000,
            idle_ms: 5 * 60 * 1000,
            speed_threshold_kmh: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Accumulating candidate points; promotes to `Saving` once the moving
    /// span has lasted `WARMUP_MS`.
    WarmingUp,
    Saving,
}

/// Drives one device's walk lifecycle. Call [`Tracker::on_record`] for every
/// record dispatched to the device, in timestamp order.
pub struct Tracker<R: Repository> {
    device_id: DeviceId,
    params: TrackerParams,
    state: State,
    /// Points observed since movement began, not yet committed to a walk.
    pending: Vec<Point>,
    /// Timestamp of the first moving point in the current warmup/saving span.
    movement_started_ms: Option<i64>,
    /// Timestamp of the last point that counted as moving.
    last_moving_ms: Option<i64>,
    walk_handle: Option<R::WalkHandle>,
}

impl<R: Repository> Tracker<R> {
    pub fn new(device_id: DeviceId, params: TrackerParams) -> Self {
        Self {
            device_id,
            params,
            state: State::Idle,
            pending: Vec::new(),
            movement_started_ms: None,
            last_moving_ms: None,
            walk_handle: None,
        }
    }

    #[allow(dead_code)]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    #[allow(dead_code)]
    pub fn is_saving(&self) -> bool {
        self.state == State::Saving
    }

    /// Feeds one record through the state machine, issuing the Repository
    /// calls (`open_walk`/`extend_walk`/`close_walk`) the transition implies.
    pub async fn on_record(&mut self, repo: &R, device: &R::DeviceRef, record: &AVLRecord) {
        // §8 property 9 / §4.7: a record with an unusable fix ((0,0) or NaN)
        // never drives a state transition, in any state, not just Idle.
        if !record.gps.is_usable_fix() {
            return;
        }
        let moving = record.is_moving(self.params.speed_threshold_kmh);
        let ts = record.timestamp_ms;
        let point = Point {
            lat: record.gps.latitude,
            lon: record.gps.longitude,
            ts_ms: ts,
        };

        match self.state {
            State::Idle => {
                if moving {
                    self.state = State::WarmingUp;
                    self.movement_started_ms = Some(ts);
                    self.last_moving_ms = Some(ts);
                    self.pending.clear();
                    self.pending.push(point);
                    debug!(device = %self.device_id, "movement detected, warming up");
                } else {
                    self.movement_started_ms = None;
                    self.last_moving_ms = None;
                }
            }
            State::WarmingUp => {
                if moving {
                    self.pending.push(point);
                    self.last_moving_ms = Some(ts);
                    let started = self.movement_started_ms.unwrap_or(ts);
                    if ts - started >= self.params.warmup_ms {
                        match repo.open_walk(device, self.pending.clone()).await {
                            Ok(handle) => {
                                debug!(device = %self.device_id, "walk opened");
                                self.walk_handle = Some(handle);
                                self.pending.clear();
                                self.state = State::Saving;
                            }
                            Err(e) => {
                                tracing::warn!(device = %self.device_id, error = %e, "open_walk failed, staying in warmup");
                            }
                        }
                    }
                } else {
                    self.reset_to_idle(ts);
                }
            }
            State::Saving => {
                if moving {
                    self.last_moving_ms = Some(ts);
                    if let Some(handle) = self.walk_handle.clone() {
                        if let Err(e) = repo.extend_walk(&handle, point).await {
                            tracing::warn!(device = %self.device_id, error = %e, "extend_walk failed");
                        }
                    }
                } else {
                    let idle_since = self.last_moving_ms.unwrap_or(ts);
                    if ts - idle_since >= self.params.idle_ms {
                        self.close_walk(repo, ts).await;
                    }
                }
            }
        }
    }

    fn reset_to_idle(&mut self, _ts: i64) {
        self.state = State::Idle;
        self.pending.clear();
        self.movement_started_ms = None;
        self.last_moving_ms = None;
    }

    async fn close_walk(&mut self, repo: &R, end_ts_ms: i64) {
        if let Some(handle) = self.walk_handle.take() {
            debug!(device = %self.device_id, "closing walk on idle timeout");
            if let Err(e) = repo.close_walk(&handle, end_ts_ms).await {
                tracing::warn!(device = %self.device_id, error = %e, "close_walk failed");
            }
        }
        self.reset_to_idle(end_ts_ms);
    }

    /// Called when the owning session ends (disconnect, idle timeout, shutdown):
    /// an in-progress walk is closed rather than left dangling (§4.7 edge case).
    pub async fn on_session_end(&mut self, repo: &R, end_ts_ms: i64) {
        if let Some(handle) = self.walk_handle.take() {
            if let Err(e) = repo.close_walk(&handle, end_ts_ms).await {
                tracing::warn!(device = %self.device_id, error = %e, "close_walk failed at session end");
            }
        }
        self.reset_to_idle(end_ts_ms);
    }
}
