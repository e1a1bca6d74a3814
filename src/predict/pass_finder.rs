use chrono::{DateTime, Duration, Utc};

use crate::abort::AbortFlag;
use crate::predict::elements::OrbitalState;
use crate::predict::error::PredictError;
use crate::predict::ground_station::GroundStation;
use crate::predict::propagation::{Sgp4Model, PROPAGATION_HORIZON};
use crate::predict::topocentric::observe;
use crate::predict::types::{Pass, TopocentricSample};

const MAX_BISECTION_ITERATIONS: usize = 64;
const MAX_PEAK_ITERATIONS: usize = 100;

/// Chunking used by [`compute_next_passes`]; the overlap is longer than any
/// low-orbit pass so a pass straddling a chunk edge is always seen whole.
const NEXT_PASS_CHUNK: Duration = Duration::days(1);
const NEXT_PASS_OVERLAP: Duration = Duration::hours(1);

/// Sampling and refinement settings for a pass search.
///
/// The coarse `step` must be shorter than the shortest time the satellite
/// spends above the threshold, otherwise a short pass can fall between two
/// samples and be missed. 30 s is adequate for low Earth orbit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSearch {
    pub step: Duration,
    pub crossing_tolerance: Duration,
    pub peak_tolerance: Duration,
}

impl Default for PassSearch {
    fn default() -> Self {
        Self {
            step: Duration::seconds(30),
            crossing_tolerance: Duration::milliseconds(10),
            peak_tolerance: Duration::milliseconds(100),
        }
    }
}

impl PassSearch {
    pub fn with_step(step: Duration) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), PredictError> {
        if self.step <= Duration::zero() {
            return Err(PredictError::InvalidSearch(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if self.crossing_tolerance <= Duration::zero() || self.peak_tolerance <= Duration::zero() {
            return Err(PredictError::InvalidSearch(
                "refinement tolerances must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct Scan<'a> {
    model: Sgp4Model,
    station: &'a GroundStation,
}

impl Scan<'_> {
    fn sample(&self, t: DateTime<Utc>) -> Result<TopocentricSample, PredictError> {
        Ok(observe(&self.model.propagate(t)?, self.station))
    }

    fn is_above(&self, t: DateTime<Utc>) -> Result<bool, PredictError> {
        Ok(self.sample(t)?.elevation_deg > self.station.min_elevation_deg)
    }

    /// Bisection between a sample below the threshold and one above it.
    /// Returns the bracket end that lies above the threshold.
    fn refine_crossing(
        &self,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
        rising: bool,
        tolerance: Duration,
    ) -> Result<TopocentricSample, PredictError> {
        let mut low = before;
        let mut high = after;

        for _ in 0..MAX_BISECTION_ITERATIONS {
            if high - low <= tolerance {
                break;
            }
            let mid = low + (high - low) / 2;
            if self.is_above(mid)? == rising {
                high = mid;
            } else {
                low = mid;
            }
        }

        self.sample(if rising { high } else { low })
    }

    /// Golden-section search for the highest elevation in `[from, to]`,
    /// seeded with the best coarse sample seen during the scan.
    fn refine_peak(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        seed: TopocentricSample,
        tolerance: Duration,
    ) -> Result<TopocentricSample, PredictError> {
        let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
        let tolerance = seconds(tolerance);
        let at = |x: f64| from + Duration::nanoseconds((x * 1e9).round() as i64);

        let mut best = seed;
        let mut lo = 0.0;
        let mut hi = seconds(to - from);
        let mut x1 = hi - inv_phi * (hi - lo);
        let mut x2 = lo + inv_phi * (hi - lo);
        let mut f1 = self.sample(at(x1))?;
        let mut f2 = self.sample(at(x2))?;

        for _ in 0..MAX_PEAK_ITERATIONS {
            for candidate in [f1, f2] {
                if candidate.elevation_deg > best.elevation_deg {
                    best = candidate;
                }
            }
            if hi - lo <= tolerance {
                break;
            }
            if f1.elevation_deg < f2.elevation_deg {
                lo = x1;
                x1 = x2;
                f1 = f2;
                x2 = lo + inv_phi * (hi - lo);
                f2 = self.sample(at(x2))?;
            } else {
                hi = x2;
                x2 = x1;
                f2 = f1;
                x1 = hi - inv_phi * (hi - lo);
                f1 = self.sample(at(x1))?;
            }
        }

        Ok(best)
    }
}

/// Find every complete pass above the station threshold in `[start, end]`,
/// ordered by rise time. Passes already in progress at `start` or still in
/// progress at `end` are left out since one of their crossings is unknown.
pub fn find_passes(
    state: &OrbitalState,
    station: &GroundStation,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    search: &PassSearch,
    abort: &AbortFlag,
) -> Result<Vec<Pass>, PredictError> {
    search.validate()?;
    if end <= start {
        return Ok(Vec::new());
    }
    if (start - state.epoch).abs() > PROPAGATION_HORIZON || (end - state.epoch).abs() > PROPAGATION_HORIZON {
        log::warn!(
            "Pass search {} .. {} reaches beyond {} days from epoch {} of {}; refresh the elements",
            start,
            end,
            PROPAGATION_HORIZON.num_days(),
            state.epoch,
            state.display_name()
        );
    }

    let scan = Scan {
        model: Sgp4Model::new(state)?,
        station,
    };
    let threshold = station.min_elevation_deg;

    let mut passes = Vec::new();
    let mut prev_time = start;
    let mut prev_above = scan.sample(start)?.elevation_deg > threshold;
    let mut rise: Option<TopocentricSample> = None;
    let mut best: Option<TopocentricSample> = None;

    while prev_time < end {
        if abort.is_aborted() {
            return Err(PredictError::Interrupted);
        }

        let time = (prev_time + search.step).min(end);
        let sample = scan.sample(time)?;
        let above = sample.elevation_deg > threshold;

        match (prev_above, above) {
            (false, true) => {
                rise = Some(scan.refine_crossing(prev_time, time, true, search.crossing_tolerance)?);
                best = Some(sample);
            }
            (true, true) => {
                if best.is_some_and(|b| sample.elevation_deg > b.elevation_deg) {
                    best = Some(sample);
                }
            }
            (true, false) => match (rise.take(), best.take()) {
                (Some(rise), Some(best)) => {
                    let set = scan.refine_crossing(prev_time, time, false, search.crossing_tolerance)?;
                    let from = (best.timestamp - search.step).max(rise.timestamp);
                    let to = (best.timestamp + search.step).min(set.timestamp);
                    let peak = scan.refine_peak(from, to, best, search.peak_tolerance)?;

                    if rise.timestamp < peak.timestamp && peak.timestamp < set.timestamp {
                        passes.push(Pass {
                            satellite: state.display_name(),
                            norad_id: state.norad_id,
                            element_set: state.id,
                            rise: rise.timestamp,
                            peak: peak.timestamp,
                            set: set.timestamp,
                            peak_elevation_deg: peak.elevation_deg,
                            rise_azimuth_deg: rise.azimuth_deg,
                            set_azimuth_deg: set.azimuth_deg,
                            duration_seconds: (set.timestamp - rise.timestamp).num_seconds(),
                        });
                    } else {
                        log::debug!(
                            "Dropping degenerate pass of {} at {}: crossings closer than the refinement tolerance",
                            state.display_name(),
                            rise.timestamp
                        );
                    }
                }
                _ => log::debug!("Skipping pass already in progress at {}", start),
            },
            (false, false) => {}
        }

        prev_time = time;
        prev_above = above;
    }

    if rise.is_some() {
        log::debug!("Skipping pass still in progress at {}", end);
    }
    log::debug!(
        "Found {} passes of {} between {} and {}",
        passes.len(),
        state.display_name(),
        start,
        end
    );

    Ok(passes)
}

/// The next `count` complete passes after `now`, searching at most
/// [`PROPAGATION_HORIZON`] ahead.
pub fn compute_next_passes(
    state: &OrbitalState,
    station: &GroundStation,
    now: DateTime<Utc>,
    count: usize,
    search: &PassSearch,
    abort: &AbortFlag,
) -> Result<Vec<Pass>, PredictError> {
    let horizon_end = now + PROPAGATION_HORIZON;
    let mut passes: Vec<Pass> = Vec::new();
    let mut chunk_start = now;

    while passes.len() < count && chunk_start < horizon_end {
        let chunk_end = (chunk_start + NEXT_PASS_CHUNK).min(horizon_end);
        let scan_end = (chunk_end + NEXT_PASS_OVERLAP).min(horizon_end);

        for pass in find_passes(state, station, chunk_start, scan_end, search, abort)? {
            let is_new = passes.last().map_or(true, |last| pass.rise > last.rise);
            if pass.rise < chunk_end && is_new {
                passes.push(pass);
            }
        }
        chunk_start = chunk_end;
    }

    passes.truncate(count);
    Ok(passes)
}

fn seconds(d: Duration) -> f64 {
    match d.num_nanoseconds() {
        Some(nanos) => nanos as f64 * 1e-9,
        None => d.num_milliseconds() as f64 * 1e-3,
    }
}
