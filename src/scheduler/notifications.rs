use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::predict::{ElementSetId, Pass};

/// Default window within which a recomputed rise still counts as the same pass.
pub const DEFAULT_SHIFT_TOLERANCE: Duration = Duration::seconds(60);

#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub id: String,
    pub lead_time: Duration,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, lead_time: Duration) -> Self {
        Self {
            id: id.into(),
            lead_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Pending,
    Fired,
    Expired,
    Invalidated,
}

/// Tracks one subscriber's notification for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct NotificationRecord {
    pub subscriber_id: String,
    pub pass: Pass,
    pub lead_time_seconds: i64,
    pub state: NotificationState,
    pub fired_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    fn new(subscriber: &Subscriber, pass: Pass) -> Self {
        Self {
            subscriber_id: subscriber.id.clone(),
            pass,
            lead_time_seconds: subscriber.lead_time.num_seconds(),
            state: NotificationState::Pending,
            fired_at: None,
        }
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.pass.rise - Duration::seconds(self.lead_time_seconds)
    }
}

/// Emitted once when a notification becomes due.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FireEvent {
    pub subscriber_id: String,
    pub pass: Pass,
    pub lead_time_seconds: i64,
    pub fire_at: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
}

/// Passes computed from one element-set version.
#[derive(Debug, Clone, PartialEq)]
pub struct PassBatch {
    pub element_set: ElementSetId,
    pub passes: Vec<Pass>,
}

/// Per-subscriber notification bookkeeping. Every transition happens under
/// `&mut self`; callers serialize access.
#[derive(Debug)]
pub struct NotificationScheduler {
    shift_tolerance: Duration,
    element_set: Option<ElementSetId>,
    records: HashMap<String, Vec<NotificationRecord>>,
}

impl Default for NotificationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SHIFT_TOLERANCE)
    }
}

impl NotificationScheduler {
    pub fn new(shift_tolerance: Duration) -> Self {
        Self {
            shift_tolerance: shift_tolerance.abs(),
            element_set: None,
            records: HashMap::new(),
        }
    }

    pub fn shift_tolerance(&self) -> Duration {
        self.shift_tolerance
    }

    /// Element set the tracked records were last keyed to.
    pub fn element_set(&self) -> Option<ElementSetId> {
        self.element_set
    }

    /// Snapshot of live records ordered by fire time.
    pub fn records(&self) -> Vec<NotificationRecord> {
        let mut all: Vec<NotificationRecord> = self.records.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            a.fire_at()
                .cmp(&b.fire_at())
                .then_with(|| a.subscriber_id.cmp(&b.subscriber_id))
        });
        all
    }

    /// Re-key records made from an older element set onto `batch`.
    ///
    /// A record whose pass has a counterpart in `batch` (rise within the shift
    /// tolerance) follows that counterpart. Unmatched pending records become
    /// `Invalidated`, are removed, and are returned. Unmatched fired records
    /// are kept until their own pass sets.
    pub fn invalidate_on_refresh(&mut self, batch: &PassBatch) -> Vec<NotificationRecord> {
        let mut invalidated = Vec::new();
        let tolerance = self.shift_tolerance;

        for records in self.records.values_mut() {
            let mut kept = Vec::with_capacity(records.len());
            for mut record in records.drain(..) {
                if record.pass.element_set == batch.element_set {
                    kept.push(record);
                    continue;
                }

                let counterpart = batch
                    .passes
                    .iter()
                    .filter(|p| (p.rise - record.pass.rise).abs() <= tolerance)
                    .min_by_key(|p| (p.rise - record.pass.rise).abs());

                match (counterpart, record.state) {
                    (Some(pass), _) => {
                        record.pass = pass.clone();
                        kept.push(record);
                    }
                    (None, NotificationState::Pending) => {
                        record.state = NotificationState::Invalidated;
                        invalidated.push(record);
                    }
                    (None, _) => kept.push(record),
                }
            }
            *records = kept;
        }
        self.records.retain(|_, records| !records.is_empty());

        if !invalidated.is_empty() {
            info!(
                "Invalidated {} pending notification(s) after element set refresh to {}",
                invalidated.len(),
                batch.element_set
            );
        }
        self.element_set = Some(batch.element_set);
        invalidated
    }

    /// Advance every record to `now` and return the notifications that
    /// became due. Each record fires at most once.
    pub fn reconcile(
        &mut self,
        now: DateTime<Utc>,
        batch: &PassBatch,
        subscribers: &[Subscriber],
    ) -> Vec<FireEvent> {
        if self.element_set != Some(batch.element_set) {
            self.invalidate_on_refresh(batch);
        }

        self.records
            .retain(|id, _| subscribers.iter().any(|s| &s.id == id));

        let tolerance = self.shift_tolerance;
        let mut events = Vec::new();
        for subscriber in subscribers {
            let records = self.records.entry(subscriber.id.clone()).or_default();

            // A rescan of the same element set can move a rise by a few
            // milliseconds; within the tolerance it is the pass already tracked.
            for pass in batch.passes.iter().filter(|p| p.set > now) {
                let tracked = records
                    .iter_mut()
                    .filter(|r| (r.pass.rise - pass.rise).abs() <= tolerance)
                    .min_by_key(|r| (r.pass.rise - pass.rise).abs());
                match tracked {
                    Some(record) if record.state == NotificationState::Pending => {
                        record.pass = pass.clone();
                    }
                    Some(_) => {}
                    None => records.push(NotificationRecord::new(subscriber, pass.clone())),
                }
            }

            for record in records.iter_mut() {
                if record.state == NotificationState::Pending {
                    record.lead_time_seconds = subscriber.lead_time.num_seconds();
                }
                if let Some(event) = advance(record, now) {
                    events.push(event);
                }
            }

            records.retain(|r| {
                matches!(r.state, NotificationState::Pending | NotificationState::Fired)
            });
            records.sort_by_key(|r| r.pass.rise);
        }
        self.records.retain(|_, records| !records.is_empty());

        events.sort_by_key(|e| e.fire_at);
        events
    }
}

fn advance(record: &mut NotificationRecord, now: DateTime<Utc>) -> Option<FireEvent> {
    match record.state {
        NotificationState::Pending if now > record.pass.set => {
            debug!(
                "Notification for {} at {} missed, pass already set",
                record.subscriber_id, record.pass.rise
            );
            record.state = NotificationState::Expired;
            None
        }
        NotificationState::Pending if now >= record.fire_at() => {
            record.state = NotificationState::Fired;
            record.fired_at = Some(now);
            Some(FireEvent {
                subscriber_id: record.subscriber_id.clone(),
                pass: record.pass.clone(),
                lead_time_seconds: record.lead_time_seconds,
                fire_at: record.fire_at(),
                emitted_at: now,
            })
        }
        NotificationState::Fired if now > record.pass.set => {
            record.state = NotificationState::Expired;
            None
        }
        _ => None,
    }
}
