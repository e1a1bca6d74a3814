pub mod notifications;
pub mod notifier;
pub mod runner;

pub use notifications::{
    FireEvent, NotificationRecord, NotificationScheduler, NotificationState, PassBatch, Subscriber,
};
pub use notifier::{LogNotifier, Notifier, NotifyError};
pub use runner::{Runner, RunnerError, RunnerSettings};
