//! Boiler temperature control loop
//!
//! This crate samples 1-Wire temperature sensors, smooths the readings,
//! evaluates a configurable expected-water-temperature formula and decides
//! whether the boiler burner should run.
//!
//! # Features
//!
//! - Per-sensor moving-average smoothing with role-specific history lengths
//! - Positional formula tokens (`inner1`, `outerAvg`, ...) rebuilt every cycle
//! - Restricted arithmetic formula language with `config.*` lookups
//! - Hysteresis decision with safety floor and ceiling
//! - Live configuration reloads, sysfs GPIO output and JSON-lines records

// Core modules
pub mod actuator;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod logging;
pub mod records;
pub mod sampler;
pub mod scheduler;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use config::{ConfigProvider, ControllerConfig, FileConfigProvider, Purpose, SharedConfig};
pub use control::{BoilerController, ControlState};
pub use error::{BoilerError, Result};
pub use events::{ControlEvent, EventBus};
pub use sampler::{OneWireSampler, Sampler};
pub use scheduler::{Scheduler, SchedulerHandle};
