use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::abort::AbortFlag;
use crate::engine::{Engine, RefreshOutcome};
use crate::predict::elements::fnv1a;
use crate::predict::PredictError;
use crate::scheduler::notifications::Subscriber;
use crate::scheduler::notifier::Notifier;

const READ_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Runner is already running")]
    AlreadyRunning,
    #[error("Runner task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub tle_file: PathBuf,
    pub tick_interval: StdDuration,
    pub read_timeout: StdDuration,
    pub subscribers: Vec<Subscriber>,
}

impl RunnerSettings {
    pub fn new(tle_file: PathBuf, tick_interval: StdDuration, subscribers: Vec<Subscriber>) -> Self {
        Self {
            tle_file,
            tick_interval,
            read_timeout: READ_TIMEOUT,
            subscribers,
        }
    }
}

/// The element file the runner polls, remembering what it last handed on.
#[derive(Debug)]
pub struct ElementFile {
    path: PathBuf,
    read_timeout: StdDuration,
    last_seen: Option<u64>,
}

impl ElementFile {
    pub fn new(path: PathBuf, read_timeout: StdDuration) -> Self {
        Self {
            path,
            read_timeout,
            last_seen: None,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// The file text if it differs from the previous successful read.
    pub async fn read_if_changed(&mut self) -> Result<Option<String>, PredictError> {
        let read = tokio::fs::read_to_string(&self.path);
        let text = match tokio::time::timeout(self.read_timeout, read).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                return Err(PredictError::ElementSourceRead(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(PredictError::ElementSourceRead(format!(
                    "{}: read timed out after {}",
                    self.path.display(),
                    humantime::format_duration(self.read_timeout)
                )))
            }
        };

        let fingerprint = fnv1a(text.bytes());
        if self.last_seen == Some(fingerprint) {
            return Ok(None);
        }
        self.last_seen = Some(fingerprint);
        Ok(Some(text))
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub refresh: Option<RefreshOutcome>,
    pub delivered: usize,
    pub error: Option<PredictError>,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Periodically re-reads the element file and fires due notifications.
pub struct Runner {
    engine: Arc<Mutex<Engine>>,
    abort: AbortFlag,
    notifier: Arc<dyn Notifier>,
    settings: RunnerSettings,
    worker: Option<WorkerHandle>,
}

impl Runner {
    /// `abort` must be the engine's own flag so `stop` can interrupt a scan
    /// that holds the engine lock.
    pub fn new(
        engine: Arc<Mutex<Engine>>,
        abort: AbortFlag,
        notifier: Arc<dyn Notifier>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            engine,
            abort,
            notifier,
            settings,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<(), RunnerError> {
        if self.worker.is_some() {
            return Err(RunnerError::AlreadyRunning);
        }

        let engine = self.engine.clone();
        let notifier = self.notifier.clone();
        let settings = self.settings.clone();
        let (stop_tx, stop_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            run_loop(engine, notifier, settings, stop_rx).await;
        });
        self.worker = Some(WorkerHandle { stop_tx, join });
        info!(
            "Runner started, ticking every {}",
            humantime::format_duration(self.settings.tick_interval)
        );
        Ok(())
    }

    /// Stop the loop, interrupting a scan in progress, and wait for it.
    pub async fn stop(&mut self) -> Result<(), RunnerError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            self.abort.abort();
            let result = worker.join.await;
            self.abort.reset();
            result?;
            info!("Runner stopped");
        }
        Ok(())
    }
}

async fn run_loop(
    engine: Arc<Mutex<Engine>>,
    notifier: Arc<dyn Notifier>,
    settings: RunnerSettings,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut source = ElementFile::new(settings.tle_file.clone(), settings.read_timeout);
    let mut ticker = interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let should_stop = tokio::select! {
            _ = ticker.tick() => false,
            _ = &mut stop_rx => true,
        };
        if should_stop {
            return;
        }

        let report = tick(
            &engine,
            notifier.as_ref(),
            &mut source,
            &settings.subscribers,
            Utc::now(),
        )
        .await;
        debug!(
            "Tick done: refresh {:?}, {} notification(s) delivered",
            report.refresh, report.delivered
        );
    }
}

/// Refresh from the element file when it changed, reconcile at `now` and
/// deliver what fired. A pass scan runs on the blocking pool without the
/// engine lock held.
pub async fn tick(
    engine: &Mutex<Engine>,
    notifier: &dyn Notifier,
    source: &mut ElementFile,
    subscribers: &[Subscriber],
    now: DateTime<Utc>,
) -> TickReport {
    let mut report = TickReport::default();
    let text = source.read_if_changed().await;

    let job = {
        let mut engine = engine.lock().await;
        match text {
            Ok(None) => {}
            Ok(Some(text)) => match engine.refresh(&text, now) {
                Ok(outcome) => report.refresh = Some(outcome),
                Err(e) if e.is_fatal_for_element_set() => {
                    error!(
                        "Element set in {} is invalid, please update it: {}",
                        source.path().display(),
                        e
                    );
                    report.error = Some(e);
                }
                Err(e) => {
                    warn!("Element refresh failed: {}", e);
                    report.error = Some(e);
                }
            },
            Err(e) => {
                warn!("{}", e);
                report.error = Some(e);
            }
        }
        engine.scan_job(now)
    };

    let job = match job {
        Ok(job) => job,
        Err(PredictError::NoElementSet) => {
            warn!("No element set loaded yet, nothing to schedule");
            return report;
        }
        Err(e) => {
            error!("Reconcile failed: {}", e);
            report.error = Some(e);
            return report;
        }
    };

    if let Some(job) = job {
        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(Ok(scanned)) => {
                engine.lock().await.install_scan(scanned);
            }
            Ok(Err(PredictError::Interrupted)) => {
                debug!("Pass scan interrupted");
                return report;
            }
            Ok(Err(e)) => {
                error!("Pass scan failed: {}", e);
                report.error = Some(e);
                return report;
            }
            Err(e) => {
                error!("Pass scan task failed: {}", e);
                return report;
            }
        }
    }

    let mut engine = engine.lock().await;
    if let Some(RefreshOutcome::Replaced { previous: Some(_), .. }) = report.refresh {
        match engine.invalidate_on_refresh(now) {
            Ok(invalidated) => {
                for record in &invalidated {
                    info!(
                        "Dropped reminder for {} at {}, the pass moved",
                        record.subscriber_id, record.pass.rise
                    );
                }
            }
            Err(e) => warn!("Could not re-key notifications: {}", e),
        }
    }

    let events = match engine.reconcile(now, subscribers) {
        Ok(events) => events,
        Err(PredictError::Interrupted) => {
            debug!("Reconcile interrupted");
            return report;
        }
        Err(e) => {
            error!("Reconcile failed: {}", e);
            report.error = Some(e);
            return report;
        }
    };
    drop(engine);

    for event in &events {
        match notifier.notify(event) {
            Ok(()) => report.delivered += 1,
            // The record is already fired; this reminder will not be retried.
            Err(e) => error!(
                "Lost reminder for {} about the pass rising at {}: {}",
                event.subscriber_id, event.pass.rise, e
            ),
        }
    }
    report
}
