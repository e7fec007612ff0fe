//! Approximate address geocoding for the delivery simulation.
//!
//! Delivery addresses are free text and the simulation only needs a stable,
//! plausible dropoff point near the city center. The same address string
//! always maps to the same coordinates so repeat orders track identically.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ho Chi Minh City center, the service area origin.
const ORIGIN_LAT: f64 = 10.7769;
const ORIGIN_LNG: f64 = 106.7009;

/// Maximum offset from the origin in degrees, roughly a 5 km radius.
const MAX_OFFSET_DEG: f64 = 0.045;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Map an address string to stable approximate coordinates inside the
/// service area.
pub fn geocode(address: &str) -> Coordinates {
    let digest = Sha256::digest(address.trim().to_lowercase().as_bytes());

    // Two independent 8-byte lanes of the digest, scaled to [-1, 1].
    let lat_lane = u64::from_be_bytes(digest[0..8].try_into().unwrap_or_default());
    let lng_lane = u64::from_be_bytes(digest[8..16].try_into().unwrap_or_default());
    let lat_unit = (lat_lane as f64 / u64::MAX as f64) * 2.0 - 1.0;
    let lng_unit = (lng_lane as f64 / u64::MAX as f64) * 2.0 - 1.0;

    Coordinates {
        lat: ORIGIN_LAT + lat_unit * MAX_OFFSET_DEG,
        lng: ORIGIN_LNG + lng_unit * MAX_OFFSET_DEG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geocoding_is_deterministic() {
        let a = geocode("123 Nguyen Hue, District 1");
        let b = geocode("123 Nguyen Hue, District 1");
        assert_eq!(a, b);
    }

    #[test]
    fn geocoding_normalizes_case_and_whitespace() {
        let a = geocode("  123 Nguyen Hue, District 1 ");
        let b = geocode("123 NGUYEN HUE, DISTRICT 1");
        assert_eq!(a, b);
    }

    #[test]
    fn coordinates_stay_inside_the_service_area() {
        for addr in ["a", "somewhere far away", "45 Le Loi", "Landmark 81"] {
            let c = geocode(addr);
            assert!((c.lat - ORIGIN_LAT).abs() <= MAX_OFFSET_DEG, "{addr}");
            assert!((c.lng - ORIGIN_LNG).abs() <= MAX_OFFSET_DEG, "{addr}");
        }
    }

}
