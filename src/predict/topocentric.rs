use chrono::{DateTime, Utc};

use crate::predict::ground_station::{GroundStation, EARTH_ROTATION_RAD_S};
use crate::predict::propagation::StateVector;
use crate::predict::types::TopocentricSample;

/// Greenwich mean sidereal time (IAU-82), radians in `[0, 2π)`.
pub fn gmst_rad(t: DateTime<Utc>) -> f64 {
    sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&t.naive_utc()))
}

pub fn teme_to_ecef_position(pos_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    [
        pos_teme[0] * cos_gmst + pos_teme[1] * sin_gmst,
        -pos_teme[0] * sin_gmst + pos_teme[1] * cos_gmst,
        pos_teme[2],
    ]
}

pub fn teme_to_ecef_velocity(pos_teme: [f64; 3], vel_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let pos = teme_to_ecef_position(pos_teme, gmst);
    let rotated = teme_to_ecef_position(vel_teme, gmst);
    let rotation = [
        -EARTH_ROTATION_RAD_S * pos[1],
        EARTH_ROTATION_RAD_S * pos[0],
        0.0,
    ];
    [
        rotated[0] - rotation[0],
        rotated[1] - rotation[1],
        rotated[2] - rotation[2],
    ]
}

pub fn ecef_to_enu(dr: [f64; 3], lat_rad: f64, lon_rad: f64) -> (f64, f64, f64) {
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}

/// Look angles of the satellite from the station at the vector's instant.
/// Azimuth is clockwise from north, elevation from the local horizontal
/// plane of the ellipsoid normal.
pub fn observe(sv: &StateVector, station: &GroundStation) -> TopocentricSample {
    let gmst = gmst_rad(sv.timestamp);
    let sat_ecef = teme_to_ecef_position(sv.position_km, gmst);
    let sat_vel_ecef = teme_to_ecef_velocity(sv.position_km, sv.velocity_km_s, gmst);
    let sta_ecef = station.position_ecef_km();

    let dr = [
        sat_ecef[0] - sta_ecef[0],
        sat_ecef[1] - sta_ecef[1],
        sat_ecef[2] - sta_ecef[2],
    ];
    let range_km = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();

    let (east, north, up) = ecef_to_enu(dr, station.lat_rad(), station.lon_rad());
    let azimuth_deg = east.atan2(north).to_degrees().rem_euclid(360.0);
    let elevation_deg = if range_km > 0.0 {
        (up / range_km).clamp(-1.0, 1.0).asin().to_degrees()
    } else {
        90.0
    };
    let range_rate_km_s = if range_km > 0.0 {
        (sat_vel_ecef[0] * dr[0] + sat_vel_ecef[1] * dr[1] + sat_vel_ecef[2] * dr[2]) / range_km
    } else {
        0.0
    };

    TopocentricSample {
        timestamp: sv.timestamp,
        azimuth_deg,
        elevation_deg,
        range_km,
        range_rate_km_s,
    }
}
