//! # Observability Infrastructure
//!
//! Structured logging for the Seiryu control plane, built on the tracing
//! ecosystem.

pub mod logging;

pub use logging::{init_logging, LoggingOptions};
