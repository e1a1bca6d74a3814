//! Near-Earth SGP4.
//!
//! Mean elements from a TLE are turned into an [`Sgp4Model`] once; the model
//! is a plain value and `propagate` is a pure function of `(model, time)`, so
//! one model may be shared by any number of concurrent callers.
//!
//! Positions are in the TEME frame in km, velocities in km/s. The WGS-72
//! geopotential constants are used because element sets are fitted with them.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::f64::consts::PI;

use crate::predict::elements::OrbitalState;
use crate::predict::error::PredictError;

const TWO_PI: f64 = 2.0 * PI;
const MINUTES_PER_DAY: f64 = 1440.0;

const EARTH_RADIUS_KM: f64 = 6378.135;
const EARTH_MU_KM3_S2: f64 = 398_600.8;
const J2: f64 = 0.001_082_616;
const J3: f64 = -0.000_002_538_81;
const J4: f64 = -0.000_001_655_97;
const J3_OVER_J2: f64 = J3 / J2;

/// Deep-space resonance terms are not modelled.
const DEEP_SPACE_PERIOD_MINUTES: f64 = 225.0;

pub const KEPLER_MAX_ITERATIONS: usize = 10;
const KEPLER_TOLERANCE: f64 = 1e-12;

/// Distance from epoch beyond which element sets should be refreshed.
pub const PROPAGATION_HORIZON: Duration = Duration::days(14);

fn xke() -> f64 {
    60.0 / (EARTH_RADIUS_KM.powi(3) / EARTH_MU_KM3_S2).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateVector {
    pub timestamp: DateTime<Utc>,
    pub position_km: [f64; 3],
    pub velocity_km_s: [f64; 3],
}

/// Initialised SGP4 coefficients for one element set.
#[derive(Debug, Clone)]
pub struct Sgp4Model {
    epoch: DateTime<Utc>,
    drag_term: f64,
    inclination: f64,
    right_ascension: f64,
    eccentricity: f64,
    argument_of_perigee: f64,
    mean_anomaly: f64,
    mean_motion: f64,

    simplified: bool,
    eta: f64,
    con41: f64,
    x1mth2: f64,
    x7thm1: f64,
    cc1: f64,
    cc4: f64,
    cc5: f64,
    d2: f64,
    d3: f64,
    d4: f64,
    delmo: f64,
    sinmao: f64,
    mdot: f64,
    argpdot: f64,
    nodedot: f64,
    nodecf: f64,
    omgcof: f64,
    xmcof: f64,
    t2cof: f64,
    t3cof: f64,
    t4cof: f64,
    t5cof: f64,
    xlcof: f64,
    aycof: f64,
}

impl Sgp4Model {
    pub fn new(state: &OrbitalState) -> Result<Self, PredictError> {
        let xke = xke();
        let ecco = state.eccentricity;
        let inclo = state.inclination_deg.to_radians();
        let argpo = state.argument_of_perigee_deg.to_radians();
        let mo = state.mean_anomaly_deg.to_radians();
        let no_kozai = state.mean_motion_rev_day * TWO_PI / MINUTES_PER_DAY;

        if !(0.0..1.0).contains(&ecco) {
            return Err(PredictError::InvalidElements(format!(
                "eccentricity {ecco} outside [0, 1)"
            )));
        }
        if no_kozai <= 0.0 {
            return Err(PredictError::InvalidElements(format!(
                "mean motion {} rev/day is not positive",
                state.mean_motion_rev_day
            )));
        }

        // Recover the original mean motion and semi-major axis from the
        // Kozai mean motion carried by the element set.
        let eccsq = ecco * ecco;
        let omeosq = 1.0 - eccsq;
        let rteosq = omeosq.sqrt();
        let cosio = inclo.cos();
        let cosio2 = cosio * cosio;
        let ak = (xke / no_kozai).powf(2.0 / 3.0);
        let d1 = 0.75 * J2 * (3.0 * cosio2 - 1.0) / (rteosq * omeosq);
        let del = d1 / (ak * ak);
        let adel = ak * (1.0 - del * del - del * (1.0 / 3.0 + 134.0 * del * del / 81.0));
        let del = d1 / (adel * adel);
        let no = no_kozai / (1.0 + del);
        let ao = (xke / no).powf(2.0 / 3.0);

        if TWO_PI / no >= DEEP_SPACE_PERIOD_MINUTES {
            return Err(PredictError::InvalidElements(format!(
                "orbital period {:.1} min needs the deep-space model",
                TWO_PI / no
            )));
        }

        let sinio = inclo.sin();
        let po = ao * omeosq;
        let con42 = 1.0 - 5.0 * cosio2;
        let con41 = -con42 - cosio2 - cosio2;
        let posq = po * po;
        let rp = ao * (1.0 - ecco);

        // Perigees below 220 km use the truncated drag polynomial.
        let simplified = rp < 220.0 / EARTH_RADIUS_KM + 1.0;

        let mut sfour = 78.0 / EARTH_RADIUS_KM + 1.0;
        let mut qzms24 = ((120.0 - 78.0) / EARTH_RADIUS_KM).powi(4);
        let perigee_km = (rp - 1.0) * EARTH_RADIUS_KM;
        if perigee_km < 156.0 {
            sfour = if perigee_km < 98.0 {
                20.0
            } else {
                perigee_km - 78.0
            };
            qzms24 = ((120.0 - sfour) / EARTH_RADIUS_KM).powi(4);
            sfour = sfour / EARTH_RADIUS_KM + 1.0;
        }

        let pinvsq = 1.0 / posq;
        let tsi = 1.0 / (ao - sfour);
        let eta = ao * ecco * tsi;
        let etasq = eta * eta;
        let eeta = ecco * eta;
        let psisq = (1.0 - etasq).abs();
        let coef = qzms24 * tsi.powi(4);
        let coef1 = coef / psisq.powf(3.5);
        let cc2 = coef1
            * no
            * (ao * (1.0 + 1.5 * etasq + eeta * (4.0 + etasq))
                + 0.375 * J2 * tsi / psisq * con41 * (8.0 + 3.0 * etasq * (8.0 + etasq)));
        let cc1 = state.drag_term * cc2;
        let cc3 = if ecco > 1.0e-4 {
            -2.0 * coef * tsi * J3_OVER_J2 * no * sinio / ecco
        } else {
            0.0
        };
        let x1mth2 = 1.0 - cosio2;
        let cc4 = 2.0
            * no
            * coef1
            * ao
            * omeosq
            * (eta * (2.0 + 0.5 * etasq) + ecco * (0.5 + 2.0 * etasq)
                - J2 * tsi / (ao * psisq)
                    * (-3.0 * con41 * (1.0 - 2.0 * eeta + etasq * (1.5 - 0.5 * eeta))
                        + 0.75 * x1mth2 * (2.0 * etasq - eeta * (1.0 + etasq)) * (2.0 * argpo).cos()));
        let cc5 = 2.0 * coef1 * ao * omeosq * (1.0 + 2.75 * (etasq + eeta) + eeta * etasq);

        let cosio4 = cosio2 * cosio2;
        let temp1 = 1.5 * J2 * pinvsq * no;
        let temp2 = 0.5 * temp1 * J2 * pinvsq;
        let temp3 = -0.46875 * J4 * pinvsq * pinvsq * no;
        let mdot = no
            + 0.5 * temp1 * rteosq * con41
            + 0.0625 * temp2 * rteosq * (13.0 - 78.0 * cosio2 + 137.0 * cosio4);
        let argpdot = -0.5 * temp1 * con42
            + 0.0625 * temp2 * (7.0 - 114.0 * cosio2 + 395.0 * cosio4)
            + temp3 * (3.0 - 36.0 * cosio2 + 49.0 * cosio4);
        let xhdot1 = -temp1 * cosio;
        let nodedot =
            xhdot1 + (0.5 * temp2 * (4.0 - 19.0 * cosio2) + 2.0 * temp3 * (3.0 - 7.0 * cosio2)) * cosio;

        let omgcof = state.drag_term * cc3 * argpo.cos();
        let xmcof = if ecco > 1.0e-4 {
            -2.0 / 3.0 * coef * state.drag_term / eeta
        } else {
            0.0
        };
        let nodecf = 3.5 * omeosq * xhdot1 * cc1;
        let t2cof = 1.5 * cc1;
        // Guard the 1 + cos(i) division for retrograde equatorial orbits.
        let xlcof_den = if (cosio + 1.0).abs() > 1.5e-12 {
            1.0 + cosio
        } else {
            1.5e-12
        };
        let xlcof = -0.25 * J3_OVER_J2 * sinio * (3.0 + 5.0 * cosio) / xlcof_den;
        let aycof = -0.5 * J3_OVER_J2 * sinio;
        let delmo = (1.0 + eta * mo.cos()).powi(3);

        let (mut d2, mut d3, mut d4, mut t3cof, mut t4cof, mut t5cof) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        if !simplified {
            let cc1sq = cc1 * cc1;
            d2 = 4.0 * ao * tsi * cc1sq;
            let temp = d2 * tsi * cc1 / 3.0;
            d3 = (17.0 * ao + sfour) * temp;
            d4 = 0.5 * temp * ao * tsi * (221.0 * ao + 31.0 * sfour) * cc1;
            t3cof = d2 + 2.0 * cc1sq;
            t4cof = 0.25 * (3.0 * d3 + cc1 * (12.0 * d2 + 10.0 * cc1sq));
            t5cof = 0.2 * (3.0 * d4 + 12.0 * cc1 * d3 + 6.0 * d2 * d2 + 15.0 * cc1sq * (2.0 * d2 + cc1sq));
        }

        Ok(Self {
            epoch: state.epoch,
            drag_term: state.drag_term,
            inclination: inclo,
            right_ascension: state.right_ascension_deg.to_radians(),
            eccentricity: ecco,
            argument_of_perigee: argpo,
            mean_anomaly: mo,
            mean_motion: no,
            simplified,
            eta,
            con41,
            x1mth2,
            x7thm1: 7.0 * cosio2 - 1.0,
            cc1,
            cc4,
            cc5,
            d2,
            d3,
            d4,
            delmo,
            sinmao: mo.sin(),
            mdot,
            argpdot,
            nodedot,
            nodecf,
            omgcof,
            xmcof,
            t2cof,
            t3cof,
            t4cof,
            t5cof,
            xlcof,
            aycof,
        })
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// State vector at `days` fractional days after the element epoch.
    pub fn propagate_days(&self, days: f64) -> Result<([f64; 3], [f64; 3]), PredictError> {
        let xke = xke();
        let t = days * MINUTES_PER_DAY;

        // Secular gravity and atmospheric drag.
        let xmdf = self.mean_anomaly + self.mdot * t;
        let argpdf = self.argument_of_perigee + self.argpdot * t;
        let nodedf = self.right_ascension + self.nodedot * t;
        let t2 = t * t;
        let mut argpm = argpdf;
        let mut mm = xmdf;
        let mut nodem = nodedf + self.nodecf * t2;
        let mut tempa = 1.0 - self.cc1 * t;
        let mut tempe = self.drag_term * self.cc4 * t;
        let mut templ = self.t2cof * t2;

        if !self.simplified {
            let delomg = self.omgcof * t;
            let delm = self.xmcof * ((1.0 + self.eta * xmdf.cos()).powi(3) - self.delmo);
            let temp = delomg + delm;
            mm = xmdf + temp;
            argpm = argpdf - temp;
            let t3 = t2 * t;
            let t4 = t3 * t;
            tempa = tempa - self.d2 * t2 - self.d3 * t3 - self.d4 * t4;
            tempe += self.drag_term * self.cc5 * (mm.sin() - self.sinmao);
            templ += self.t3cof * t3 + t4 * (self.t4cof + t * self.t5cof);
        }

        let am = (xke / self.mean_motion).powf(2.0 / 3.0) * tempa * tempa;
        if !(am > 0.0) {
            return Err(PredictError::InvalidElements(format!(
                "semi-major axis collapsed at {t:.3} min"
            )));
        }
        let nm = xke / am.powf(1.5);
        let mut em = self.eccentricity - tempe;
        if !(-0.001..1.0).contains(&em) {
            return Err(PredictError::InvalidElements(format!(
                "eccentricity {em:.6} out of range at {t:.3} min"
            )));
        }
        if em < 1.0e-6 {
            em = 1.0e-6;
        }
        mm += self.mean_motion * templ;
        let xlm = (mm + argpm + nodem) % TWO_PI;
        nodem %= TWO_PI;
        argpm %= TWO_PI;
        mm = (xlm - argpm - nodem) % TWO_PI;

        let inclm = self.inclination;
        let sinip = inclm.sin();
        let cosip = inclm.cos();

        // Long-period periodics.
        let axnl = em * argpm.cos();
        let temp = 1.0 / (am * (1.0 - em * em));
        let aynl = em * argpm.sin() + temp * self.aycof;
        let xl = mm + argpm + nodem + temp * self.xlcof * axnl;

        let (sineo1, coseo1) = solve_kepler(xl, nodem, axnl, aynl, t)?;

        // Short-period periodics.
        let ecose = axnl * coseo1 + aynl * sineo1;
        let esine = axnl * sineo1 - aynl * coseo1;
        let el2 = axnl * axnl + aynl * aynl;
        let pl = am * (1.0 - el2);
        if pl < 0.0 {
            return Err(PredictError::InvalidElements(format!(
                "semi-latus rectum negative at {t:.3} min"
            )));
        }
        let rl = am * (1.0 - ecose);
        let rdotl = am.sqrt() * esine / rl;
        let rvdotl = pl.sqrt() / rl;
        let betal = (1.0 - el2).sqrt();
        let temp = esine / (1.0 + betal);
        let sinu = am / rl * (sineo1 - aynl - axnl * temp);
        let cosu = am / rl * (coseo1 - axnl + aynl * temp);
        let mut su = sinu.atan2(cosu);
        let sin2u = (cosu + cosu) * sinu;
        let cos2u = 1.0 - 2.0 * sinu * sinu;
        let temp = 1.0 / pl;
        let temp1 = 0.5 * J2 * temp;
        let temp2 = temp1 * temp;

        let mrt = rl * (1.0 - 1.5 * temp2 * betal * self.con41) + 0.5 * temp1 * self.x1mth2 * cos2u;
        su -= 0.25 * temp2 * self.x7thm1 * sin2u;
        let xnode = nodem + 1.5 * temp2 * cosip * sin2u;
        let xinc = inclm + 1.5 * temp2 * cosip * sinip * cos2u;
        let mvt = rdotl - nm * temp1 * self.x1mth2 * sin2u / xke;
        let rvdot = rvdotl + nm * temp1 * (self.x1mth2 * cos2u + 1.5 * self.con41) / xke;

        if mrt < 1.0 {
            return Err(PredictError::InvalidElements(format!(
                "satellite below the surface at {t:.3} min"
            )));
        }

        let (sinsu, cossu) = su.sin_cos();
        let (snod, cnod) = xnode.sin_cos();
        let (sini, cosi) = xinc.sin_cos();
        let xmx = -snod * cosi;
        let xmy = cnod * cosi;
        let u = [xmx * sinsu + cnod * cossu, xmy * sinsu + snod * cossu, sini * sinsu];
        let v = [xmx * cossu - cnod * sinsu, xmy * cossu - snod * sinsu, sini * cossu];

        let km_per_s = EARTH_RADIUS_KM * xke / 60.0;
        let position = [
            mrt * u[0] * EARTH_RADIUS_KM,
            mrt * u[1] * EARTH_RADIUS_KM,
            mrt * u[2] * EARTH_RADIUS_KM,
        ];
        let velocity = [
            (mvt * u[0] + rvdot * v[0]) * km_per_s,
            (mvt * u[1] + rvdot * v[1]) * km_per_s,
            (mvt * u[2] + rvdot * v[2]) * km_per_s,
        ];
        Ok((position, velocity))
    }

    pub fn propagate(&self, t: DateTime<Utc>) -> Result<StateVector, PredictError> {
        let delta = t.signed_duration_since(self.epoch);
        let days = match delta.num_nanoseconds() {
            Some(nanos) => nanos as f64 / 86_400e9,
            None => delta.num_milliseconds() as f64 / 86_400e3,
        };
        let (position_km, velocity_km_s) = self.propagate_days(days)?;
        Ok(StateVector {
            timestamp: t,
            position_km,
            velocity_km_s,
        })
    }
}

/// Newton iteration on Kepler's equation in equinoctial form, returning the
/// sine and cosine of the eccentric longitude.
fn solve_kepler(xl: f64, nodem: f64, axnl: f64, aynl: f64, t: f64) -> Result<(f64, f64), PredictError> {
    let u = (xl - nodem) % TWO_PI;
    let mut eo1 = u;
    for _ in 0..KEPLER_MAX_ITERATIONS {
        let (sineo1, coseo1) = eo1.sin_cos();
        let denominator = 1.0 - coseo1 * axnl - sineo1 * aynl;
        let mut step = (u - aynl * coseo1 + axnl * sineo1 - eo1) / denominator;
        if !step.is_finite() {
            break;
        }
        if step.abs() >= 0.95 {
            step = 0.95_f64.copysign(step);
        }
        eo1 += step;
        if step.abs() < KEPLER_TOLERANCE {
            return Ok(eo1.sin_cos());
        }
    }
    Err(PredictError::PropagationDivergence {
        minutes: t,
        iterations: KEPLER_MAX_ITERATIONS,
    })
}

/// Position and velocity of the satellite at `t`.
pub fn propagate(state: &OrbitalState, t: DateTime<Utc>) -> Result<StateVector, PredictError> {
    Sgp4Model::new(state)?.propagate(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::elements::parse_lines;
    use crate::predict::elements::tests::{
        iss, ISS_LINE1, ISS_LINE2, VANGUARD_LINE1, VANGUARD_LINE2,
    };

    fn assert_close(actual: [f64; 3], expected: [f64; 3], tolerance: f64) {
        for axis in 0..3 {
            assert!(
                (actual[axis] - expected[axis]).abs() < tolerance,
                "axis {axis}: {actual:?} vs {expected:?}"
            );
        }
    }

    #[test]
    fn matches_published_verification_vectors() {
        let state = parse_lines(None, VANGUARD_LINE1, VANGUARD_LINE2).unwrap();
        let model = Sgp4Model::new(&state).unwrap();

        let (r, v) = model.propagate_days(0.0).unwrap();
        assert_close(r, [7022.465_292_66, -1400.082_967_55, 0.039_951_55], 1e-5);
        assert_close(v, [1.893_841_015, 6.405_893_759, 4.534_807_250], 1e-8);

        let (r, v) = model.propagate_days(360.0 / MINUTES_PER_DAY).unwrap();
        assert_close(r, [-7154.031_202_02, -3783.176_825_04, -3536.194_122_94], 1e-5);
        assert_close(v, [4.741_887_409, -4.151_817_765, -2.093_935_425], 1e-8);
    }

    #[test]
    fn agrees_with_reference_sgp4_crate() {
        let state = iss();
        let model = Sgp4Model::new(&state).unwrap();
        let elements =
            sgp4::Elements::from_tle(None, ISS_LINE1.as_bytes(), ISS_LINE2.as_bytes()).unwrap();
        let constants = sgp4::Constants::from_elements_afspc_compatibility_mode(&elements).unwrap();

        for minutes in [0.0, 97.0, 720.0, 1440.0, 4320.0, 20_000.0] {
            let (r, v) = model.propagate_days(minutes / MINUTES_PER_DAY).unwrap();
            let reference = constants
                .propagate(sgp4::MinutesSinceEpoch(minutes))
                .unwrap();
            assert_close(r, reference.position, 1e-6);
            assert_close(v, reference.velocity, 1e-9);
        }
    }

    #[test]
    fn propagation_is_deterministic() {
        let state = iss();
        let t = state.epoch + Duration::minutes(1234);
        let a = propagate(&state, t).unwrap();
        let b = propagate(&state, t).unwrap();
        for axis in 0..3 {
            assert_eq!(a.position_km[axis].to_bits(), b.position_km[axis].to_bits());
            assert_eq!(a.velocity_km_s[axis].to_bits(), b.velocity_km_s[axis].to_bits());
        }
    }

    #[test]
    fn low_earth_orbit_radius_is_plausible() {
        let state = iss();
        for hours in [-48, -1, 0, 5, 72, 300] {
            let sv = propagate(&state, state.epoch + Duration::hours(hours)).unwrap();
            let radius = sv.position_km.iter().map(|c| c * c).sum::<f64>().sqrt();
            assert!((6650.0..6850.0).contains(&radius), "radius {radius} at {hours} h");
        }
    }

    #[test]
    fn circular_equatorial_orbit_has_no_singularity() {
        let mut state = iss();
        state.eccentricity = 0.0;
        state.inclination_deg = 0.0;
        state.argument_of_perigee_deg = 0.0;
        let model = Sgp4Model::new(&state).unwrap();
        for minutes in [0.0, 10.0, 45.0, 600.0] {
            let (r, v) = model.propagate_days(minutes / MINUTES_PER_DAY).unwrap();
            assert!(r.iter().chain(v.iter()).all(|c| c.is_finite()));
            assert!(r[2].abs() < 1.0, "equatorial orbit left the plane: {r:?}");
        }
    }

    #[test]
    fn retrograde_equatorial_orbit_is_finite() {
        let mut state = iss();
        state.inclination_deg = 180.0;
        let (r, v) = Sgp4Model::new(&state).unwrap().propagate_days(0.3).unwrap();
        assert!(r.iter().chain(v.iter()).all(|c| c.is_finite()));
    }

    #[test]
    fn deep_space_orbits_are_rejected() {
        let mut state = iss();
        state.mean_motion_rev_day = 1.0027;
        assert!(matches!(
            Sgp4Model::new(&state),
            Err(PredictError::InvalidElements(_))
        ));
    }

    #[test]
    fn hyperbolic_eccentricity_is_rejected() {
        let mut state = iss();
        state.eccentricity = 1.2;
        assert!(matches!(
            propagate(&state, state.epoch),
            Err(PredictError::InvalidElements(_))
        ));
    }

    #[test]
    fn kepler_solver_reports_divergence() {
        let err = solve_kepler(1.0, 0.0, f64::NAN, 0.5, 42.0).unwrap_err();
        assert_eq!(
            err,
            PredictError::PropagationDivergence {
                minutes: 42.0,
                iterations: KEPLER_MAX_ITERATIONS
            }
        );
    }

    #[test]
    fn kepler_solver_converges_for_eccentric_orbit() {
        let (s, c) = solve_kepler(2.0, 0.0, 0.7, 0.0, 0.0).unwrap();
        let e = s.atan2(c);
        // E - e sin E = M for argument of perigee zero.
        assert!((e - 0.7 * e.sin() - 2.0).abs() < 1e-10);
    }
}
