pub mod elements;
pub mod error;
pub mod notifications;
pub mod passes;
