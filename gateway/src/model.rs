//! Data model shared across the codec, session, tracker and repository layers.
//!
//! Mirrors spec.md §3: raw frame shapes, the decoded `AVLRecord` with its IO
//! element groups, semantic projections, and the entities owned by the
//! Device Registry (C6) and Movement Tracker (C7).

use std::collections::HashMap;

use serde::Serialize;

/// A device identifier: 15-17 ASCII digits, validated at parse time (§4.2).
pub type DeviceId = String;

/// The wire codec a frame body was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Codec {
    /// Codec 8: 8-bit IO ids, 8-bit counts.
    C8,
    /// Codec 8 Extended: 16-bit IO ids, 16-bit counts.
    C8Ext,
}

impl Codec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x08 => Some(Codec::C8),
            0x8E => Some(Codec::C8Ext),
            _ => None,
        }
    }
}

/// GPS fix attached to an [`AVLRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gps {
    /// Decimal degrees, derived from the wire's sign-magnitude e7 integer.
    pub longitude: f64,
    pub latitude: f64,
    pub altitude_m: i16,
    /// Degrees clockwise from north.
    pub heading_deg: u16,
    pub satellites: u8,
    pub speed_kmh: u16,
}

impl Gps {
    /// §3: `positionValid ≡ satellites ≥ 3`.
    pub fn position_valid(&self) -> bool {
        self.satellites >= 3
    }

    /// §8 property 9 / §4.7: records at (0,0), or with NaN coordinates, never
    /// drive movement state or appear in a walk's coordinate list.
    pub fn is_usable_fix(&self) -> bool {
        if self.latitude.is_nan() || self.longitude.is_nan() {
            return false;
        }
        if self.latitude == 0.0 && self.longitude == 0.0 {
            return false;
        }
        true
    }
}

/// The four IO element width groups, keyed by protocol id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IoGroups {
    pub one_byte: Vec<(u16, u8)>,
    pub two_byte: Vec<(u16, u16)>,
    pub four_byte: Vec<(u16, u32)>,
    pub eight_byte: Vec<(u16, u64)>,
}

impl IoGroups {
    pub fn total(&self) -> usize {
        self.one_byte.len() + self.two_byte.len() + self.four_byte.len() + self.eight_byte.len()
    }

    /// Widen every group into one `id -> u64` view, used by the semantic
    /// projection table (§3) and by `extraIo` for unrecognized ids.
    pub fn widen(&self) -> HashMap<u16, u64> {
        let mut out = HashMap::with_capacity(self.total());
        for &(id, v) in &self.one_byte {
            out.insert(id, v as u64);
        }
        for &(id, v) in &self.two_byte {
            out.insert(id, v as u64);
        }
        for &(id, v) in &self.four_byte {
            out.insert(id, v as u64);
        }
        for &(id, v) in &self.eight_byte {
            out.insert(id, v as u64);
        }
        out
    }
}

/// Selected semantic projections decoded from well-known IO ids (§3).
/// Unrecognized ids are preserved verbatim in `AVLRecord::extra_io`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projections {
    pub battery_voltage_mv: Option<u64>,
    pub battery_level_pct: Option<u64>,
    pub gnss_status: Option<bool>,
    pub movement_flag: Option<bool>,
    pub charger_connected: Option<bool>,
    pub gsm_signal: Option<u64>,
    pub pdop: Option<f64>,
    pub hdop: Option<f64>,
    pub man_down: Option<bool>,
    pub geofence_zones: HashMap<u16, u64>,
}

const IO_BATTERY_VOLTAGE: u16 = 67;
const IO_BATTERY_LEVEL: u16 = 113;
const IO_GNSS_STATUS: u16 = 69;
const IO_MOVEMENT_FLAG: u16 = 240;
const IO_CHARGER_CONNECTED: u16 = 116;
const IO_GSM_SIGNAL: u16 = 21;
const IO_PDOP: u16 = 181;
const IO_HDOP: u16 = 182;
const IO_MAN_DOWN: u16 = 242;
const IO_GEOFENCE_RANGE: std::ops::RangeInclusive<u16> = 155..=231;

impl Projections {
    /// Build the projection table from a widened IO map, per the §3 id list.
    pub fn from_widened(io: &HashMap<u16, u64>) -> Self {
        let mut p = Projections::default();
        for (&id, &value) in io {
            match id {
                IO_BATTERY_VOLTAGE => p.battery_voltage_mv = Some(value),
                IO_BATTERY_LEVEL => p.battery_level_pct = Some(value),
                IO_GNSS_STATUS => p.gnss_status = Some(value != 0),
                IO_MOVEMENT_FLAG => p.movement_flag = Some(value != 0),
                IO_CHARGER_CONNECTED => p.charger_connected = Some(value != 0),
                IO_GSM_SIGNAL => p.gsm_signal = Some(value),
                IO_PDOP => p.pdop = Some(value as f64 / 10.0),
                IO_HDOP => p.hdop = Some(value as f64 / 10.0),
                IO_MAN_DOWN => p.man_down = Some(value != 0),
                id if IO_GEOFENCE_RANGE.contains(&id) => {
                    p.geofence_zones.insert(id, value);
                }
                _ => {}
            }
        }
        p
    }
}

/// Whether `id` is covered by [`Projections`] (and therefore excluded from
/// an `AVLRecord`'s `extra_io` residual map).
pub fn is_projected_io_id(id: u16) -> bool {
    matches!(
        id,
        IO_BATTERY_VOLTAGE
            | IO_BATTERY_LEVEL
            | IO_GNSS_STATUS
            | IO_MOVEMENT_FLAG
            | IO_CHARGER_CONNECTED
            | IO_GSM_SIGNAL
            | IO_PDOP
            | IO_HDOP
            | IO_MAN_DOWN
    ) || IO_GEOFENCE_RANGE.contains(&id)
}

/// A single decoded AVL record (§3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AVLRecord {
    pub timestamp_ms: i64,
    pub priority: u8,
    pub gps: Gps,
    pub event_io_id: u32,
    pub io: IoGroups,
    pub projections: Projections,
    /// IO ids not covered by the semantic projection table, widened to u64.
    pub extra_io: HashMap<u16, u64>,
}

impl AVLRecord {
    /// §4.7: explicit `movementFlag` takes priority; otherwise a speed
    /// threshold; otherwise treated as not moving.
    pub fn is_moving(&self, speed_threshold_kmh: u16) -> bool {
        if let Some(flag) = self.projections.movement_flag {
            return flag;
        }
        self.gps.speed_kmh > speed_threshold_kmh
    }
}

/// A decoded AVL frame, prior to dispatch (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct AVLFrame {
    pub codec: Codec,
    pub records: Vec<AVLRecord>,
}

/// Liveness/identity view for one currently-authenticated connection (§3).
#[derive(Debug, Clone, Serialize)]
pub struct ActiveDevice {
    pub device_id: DeviceId,
    pub peer_address: String,
    pub connected_at_ms: i64,
    pub last_activity_at_ms: i64,
    pub bytes_received: u64,
    pub packets_processed: u64,
}

/// A lat/lon/timestamp sample retained on a walk (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub ts_ms: i64,
}

/// A movement session derived by the tracker and persisted by the Repository (§3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkSession {
    pub device_id: DeviceId,
    pub is_active: bool,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub coordinates: Vec<Point>,
    pub distance_meters: i64,
    pub duration_seconds: i64,
}

impl WalkSession {
    pub fn new(device_id: DeviceId, points: Vec<Point>) -> Self {
        let start = points.first().map(|p| p.ts_ms).unwrap_or(0);
        let mut w = WalkSession {
            device_id,
            is_active: true,
            start_time_ms: start,
            end_time_ms: None,
            coordinates: Vec::new(),
            distance_meters: 0,
            duration_seconds: 0,
        };
        for p in points {
            w.push_point(p);
        }
        w
    }

    /// §3 invariant: `distanceMeters` is the rounded haversine sum of the
    /// coordinate sequence; `durationSeconds` is measured from `startTime`.
    pub fn push_point(&mut self, p: Point) {
        if let Some(last) = self.coordinates.last() {
            let d = crate::geo::haversine_m(last.lat, last.lon, p.lat, p.lon);
            self.distance_meters += d.round() as i64;
        }
        self.coordinates.push(p);
        self.recompute_duration();
    }

    fn recompute_duration(&mut self) {
        if let Some(last) = self.coordinates.last() {
            self.duration_seconds = ((last.ts_ms - self.start_time_ms).max(0)) / 1000;
        }
    }

    pub fn close(&mut self, end_ts_ms: i64) {
        self.is_active = false;
        self.end_time_ms = Some(end_ts_ms);
    }
}
