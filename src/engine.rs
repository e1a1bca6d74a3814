use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::abort::AbortFlag;
use crate::predict::elements::fnv1a;
use crate::predict::{
    compute_next_passes, find_passes, parse_element_set, select_satellite, ElementSetId,
    GroundStation, OrbitalState, Pass, PassSearch, PredictError, Sgp4Model,
};
use crate::scheduler::notifications::{
    FireEvent, NotificationRecord, NotificationScheduler, PassBatch, Subscriber,
};

/// How far before `now` a reconcile scan starts, so a pass already in
/// progress is still seen whole.
const RECONCILE_BACKFILL: Duration = Duration::hours(1);
/// Extra scan length past the lookahead so consecutive ticks reuse one scan.
const RECONCILE_SLACK: Duration = Duration::hours(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Replaced {
        previous: Option<ElementSetId>,
        current: ElementSetId,
    },
    Unchanged(ElementSetId),
    /// The same text already failed validation and was not parsed again.
    PreviouslyRejected,
}

/// Everything a pass search needs, detached from the engine lock.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub state: Arc<OrbitalState>,
    pub station: GroundStation,
    pub search: PassSearch,
    pub abort: AbortFlag,
}

impl Prediction {
    pub fn next_passes(&self, now: DateTime<Utc>, count: usize) -> Result<Vec<Pass>, PredictError> {
        compute_next_passes(&self.state, &self.station, now, count, &self.search, &self.abort)
    }

    pub fn passes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Pass>, PredictError> {
        find_passes(&self.state, &self.station, start, end, &self.search, &self.abort)
    }
}

/// A reconcile scan over `[start, end]`, runnable without the engine.
#[derive(Debug, Clone)]
pub struct ScanJob {
    prediction: Prediction,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ScanJob {
    pub fn run(self) -> Result<ScannedBatch, PredictError> {
        let passes = self.prediction.passes_between(self.start, self.end)?;
        Ok(ScannedBatch {
            end: self.end,
            batch: PassBatch {
                element_set: self.prediction.state.id,
                passes,
            },
        })
    }
}

/// Result of a [`ScanJob`], handed back through [`Engine::install_scan`].
#[derive(Debug, Clone)]
pub struct ScannedBatch {
    end: DateTime<Utc>,
    batch: PassBatch,
}

/// Scans start on a fixed grid of `step` so a rescan samples the same
/// instants and reproduces the same crossings.
fn align_to_step(t: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_s = step.num_seconds().max(1);
    let offset = t.timestamp().rem_euclid(step_s);
    t - Duration::seconds(offset) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

/// Holds the current element-set version and the notification state for
/// one satellite seen from one station.
#[derive(Debug)]
pub struct Engine {
    station: GroundStation,
    search: PassSearch,
    satellite: Option<String>,
    lookahead: Duration,
    current: Option<Arc<OrbitalState>>,
    loaded_at: Option<DateTime<Utc>>,
    rejected: Option<u64>,
    scheduler: NotificationScheduler,
    cached: Option<ScannedBatch>,
    abort: AbortFlag,
}

impl Engine {
    pub fn new(station: GroundStation, search: PassSearch, shift_tolerance: Duration) -> Self {
        Self {
            station,
            search,
            satellite: None,
            lookahead: Duration::days(3),
            current: None,
            loaded_at: None,
            rejected: None,
            scheduler: NotificationScheduler::new(shift_tolerance),
            cached: None,
            abort: AbortFlag::new(),
        }
    }

    /// Select this satellite out of multi-record element text.
    pub fn with_satellite(mut self, query: Option<String>) -> Self {
        self.satellite = query;
        self
    }

    /// How far ahead notifications are planned.
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn station(&self) -> &GroundStation {
        &self.station
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    pub fn element_set(&self) -> Option<Arc<OrbitalState>> {
        self.current.clone()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.scheduler.records()
    }

    /// Parse element text and make it the current version.
    ///
    /// On failure the previous element set stays in use. Text that failed
    /// for a reason retrying cannot fix is remembered and skipped until
    /// different text arrives.
    pub fn refresh(&mut self, text: &str, now: DateTime<Utc>) -> Result<RefreshOutcome, PredictError> {
        let fingerprint = fnv1a(text.trim().bytes());
        if self.rejected == Some(fingerprint) {
            debug!("Skipping element text {:016x}, it was rejected before", fingerprint);
            return Ok(RefreshOutcome::PreviouslyRejected);
        }

        let state = match self.parse(text) {
            Ok(state) => state,
            Err(e) => {
                if e.is_fatal_for_element_set() {
                    self.rejected = Some(fingerprint);
                }
                return Err(e);
            }
        };
        self.rejected = None;

        let previous = self.current.as_ref().map(|s| s.id);
        if previous == Some(state.id) {
            return Ok(RefreshOutcome::Unchanged(state.id));
        }

        info!(
            "Loaded element set {} for {} (epoch {})",
            state.id,
            state.display_name(),
            state.epoch
        );
        let current = state.id;
        self.current = Some(Arc::new(state));
        self.loaded_at = Some(now);
        self.cached = None;
        Ok(RefreshOutcome::Replaced { previous, current })
    }

    fn parse(&self, text: &str) -> Result<OrbitalState, PredictError> {
        let state = match &self.satellite {
            Some(query) => select_satellite(text, query)?,
            None => parse_element_set(text)?,
        };
        Sgp4Model::new(&state)?;
        Ok(state)
    }

    /// Detached inputs for a pass search on the current element set.
    pub fn prediction(&self) -> Result<Prediction, PredictError> {
        let state = self.current.clone().ok_or(PredictError::NoElementSet)?;
        Ok(Prediction {
            state,
            station: self.station.clone(),
            search: self.search,
            abort: self.abort.clone(),
        })
    }

    pub fn compute_next_passes(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Pass>, PredictError> {
        self.prediction()?.next_passes(now, count)
    }

    pub fn passes_within(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Pass>, PredictError> {
        self.prediction()?.passes_between(now, now + window)
    }

    /// The scan `reconcile` at `now` needs, or `None` when the cached batch
    /// already covers the lookahead.
    pub fn scan_job(&self, now: DateTime<Utc>) -> Result<Option<ScanJob>, PredictError> {
        let prediction = self.prediction()?;
        let needed_until = now + self.lookahead;

        if let Some(cached) = &self.cached {
            if cached.batch.element_set == prediction.state.id && cached.end >= needed_until {
                return Ok(None);
            }
        }

        Ok(Some(ScanJob {
            start: align_to_step(now - RECONCILE_BACKFILL, self.search.step),
            end: needed_until + RECONCILE_SLACK,
            prediction,
        }))
    }

    /// Cache a batch scanned off the lock. Returns `false` and drops it when
    /// the element set changed in the meantime.
    pub fn install_scan(&mut self, scanned: ScannedBatch) -> bool {
        let current = self.current.as_ref().map(|s| s.id);
        if current != Some(scanned.batch.element_set) {
            debug!("Discarding scan for superseded element set {}", scanned.batch.element_set);
            return false;
        }
        self.cached = Some(scanned);
        true
    }

    fn batch(&mut self, now: DateTime<Utc>) -> Result<PassBatch, PredictError> {
        if let Some(job) = self.scan_job(now)? {
            self.cached = Some(job.run()?);
        }
        self.cached
            .as_ref()
            .map(|cached| cached.batch.clone())
            .ok_or(PredictError::NoElementSet)
    }

    /// Re-key notification records onto the current element set.
    pub fn invalidate_on_refresh(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, PredictError> {
        let batch = self.batch(now)?;
        Ok(self.scheduler.invalidate_on_refresh(&batch))
    }

    /// Advance notifications to `now` and return the ones that became due.
    pub fn reconcile(
        &mut self,
        now: DateTime<Utc>,
        subscribers: &[Subscriber],
    ) -> Result<Vec<FireEvent>, PredictError> {
        let batch = self.batch(now)?;
        if batch.passes.is_empty() {
            warn!(
                "No passes above {}° in the next {}",
                self.station.min_elevation_deg,
                humantime::format_duration(self.lookahead.to_std().unwrap_or_default())
            );
        }
        Ok(self.scheduler.reconcile(now, &batch, subscribers))
    }
}
