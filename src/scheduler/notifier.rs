#[cfg(test)]
use std::sync::Mutex;

use thiserror::Error;

use crate::report::{format_reminder, DisplayZone};
use crate::scheduler::notifications::FireEvent;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery to {subscriber} failed: {reason}")]
    Delivery { subscriber: String, reason: String },
}

/// Delivers fire events to subscribers.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &FireEvent) -> Result<(), NotifyError>;
}

/// Writes each reminder to the log.
pub struct LogNotifier {
    zone: DisplayZone,
}

impl LogNotifier {
    pub fn new(zone: DisplayZone) -> Self {
        Self { zone }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, event: &FireEvent) -> Result<(), NotifyError> {
        log::info!(
            "[{}] {}",
            event.subscriber_id,
            format_reminder(event, self.zone)
        );
        Ok(())
    }
}

/// Keeps delivered events in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<FireEvent>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<FireEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, event: &FireEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|e| NotifyError::Delivery {
                subscriber: event.subscriber_id.clone(),
                reason: e.to_string(),
            })?
            .push(event.clone());
        Ok(())
    }
}
