use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::predict::elements::ElementSetId;

/// Where the satellite appears from the station at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct TopocentricSample {
    pub timestamp: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_km: f64,
    pub range_rate_km_s: f64,
}

/// A predicted satellite pass above the station's elevation threshold.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Pass {
    pub satellite: String,
    pub norad_id: u32,
    pub element_set: ElementSetId,
    pub rise: DateTime<Utc>,
    pub peak: DateTime<Utc>,
    pub set: DateTime<Utc>,
    pub peak_elevation_deg: f64,
    pub rise_azimuth_deg: f64,
    pub set_azimuth_deg: f64,
    pub duration_seconds: i64,
}
