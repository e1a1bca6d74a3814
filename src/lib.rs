pub mod abort;
pub mod config;
pub mod engine;
pub mod predict;
pub mod report;
pub mod scheduler;
pub mod web;

pub use abort::AbortFlag;
pub use config::{Config, ConfigError};
pub use engine::{Engine, RefreshOutcome};
