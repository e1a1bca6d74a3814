use serde::Serialize;
use utoipa::ToSchema;

pub const EARTH_ROTATION_RAD_S: f64 = 7.292_115e-5;

// WGS-84 ellipsoid.
const WGS84_A_KM: f64 = 6378.137;
const WGS84_E2: f64 = 0.006_694_379_990_14;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GroundStation {
    pub name: Option<String>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    /// Passes are measured from the instant the satellite climbs above this.
    pub min_elevation_deg: f64,
}

impl Default for GroundStation {
    fn default() -> Self {
        Self {
            name: None,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_m: 0.0,
            min_elevation_deg: 0.0,
        }
    }
}

impl GroundStation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64, min_elevation_deg: f64) -> Self {
        Self {
            name: None,
            latitude_deg,
            longitude_deg,
            altitude_m,
            min_elevation_deg,
        }
    }

    /// Parses `"lat,lon"` in degrees.
    pub fn from_coordinates(
        coordinates: &str,
        altitude_m: Option<f64>,
        min_elevation_deg: f64,
    ) -> Option<Self> {
        let parts: Vec<_> = coordinates.split(',').map(|s| s.trim()).collect();
        if parts.len() != 2 {
            return None;
        }
        let lat: f64 = parts[0].parse().ok()?;
        let lon: f64 = parts[1].parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=360.0).contains(&lon) {
            return None;
        }
        Some(Self::new(lat, lon, altitude_m.unwrap_or(0.0), min_elevation_deg))
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        let lat = self.lat_rad();
        let lon = self.lon_rad();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let sin_lon = lon.sin();
        let cos_lon = lon.cos();
        let n = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        let alt_km = self.altitude_m / 1000.0;
        let x = (n + alt_km) * cos_lat * cos_lon;
        let y = (n + alt_km) * cos_lat * sin_lon;
        let z = (n * (1.0 - WGS84_E2) + alt_km) * sin_lat;
        [x, y, z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        let station = GroundStation::from_coordinates("55.7558, 37.6173", Some(144.0), 15.0).unwrap();
        assert_eq!(station.latitude_deg, 55.7558);
        assert_eq!(station.longitude_deg, 37.6173);
        assert_eq!(station.altitude_m, 144.0);
        assert_eq!(station.min_elevation_deg, 15.0);
    }

    #[test]
    fn rejects_malformed_coordinates() {
        assert!(GroundStation::from_coordinates("55.7558", None, 0.0).is_none());
        assert!(GroundStation::from_coordinates("north,east", None, 0.0).is_none());
        assert!(GroundStation::from_coordinates("95.0,10.0", None, 0.0).is_none());
        assert!(GroundStation::from_coordinates("1,2,3", None, 0.0).is_none());
    }

    #[test]
    fn equator_and_pole_lie_on_the_ellipsoid() {
        let equator = GroundStation::new(0.0, 0.0, 0.0, 0.0).position_ecef_km();
        assert!((equator[0] - WGS84_A_KM).abs() < 1e-9);
        assert!(equator[1].abs() < 1e-9 && equator[2].abs() < 1e-9);

        let pole = GroundStation::new(90.0, 0.0, 0.0, 0.0).position_ecef_km();
        // Polar radius of WGS-84.
        assert!((pole[2] - 6356.752).abs() < 1e-3);
    }

    #[test]
    fn altitude_raises_the_station_along_the_normal() {
        let low = GroundStation::new(0.0, 90.0, 0.0, 0.0).position_ecef_km();
        let high = GroundStation::new(0.0, 90.0, 1000.0, 0.0).position_ecef_km();
        assert!((high[1] - low[1] - 1.0).abs() < 1e-9);
    }
}
