//! Great-circle distance, used by the Movement Tracker (§4.7) to accumulate
//! walk-session distance.

/// Mean Earth radius in meters, as specified in spec.md §4.7.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two lat/lon points, in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}
