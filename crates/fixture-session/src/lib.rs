//! fixture-session - Step library and session orchestration
//!
//! Ties the probes together into a production test run:
//!
//! - [`steps`]: one async function per hardware check group
//! - [`Orchestrator`]: the session state machine plus stand-alone operations
//! - [`report`]: `test_results.json`, `summary_log.txt` and the rendered report
//! - [`FixtureConfig`]: TOML configuration for paths, timings, thresholds and mux tables

pub mod config;
pub mod error;
pub mod fixture;
pub mod flasher;
pub mod operator;
pub mod orchestrator;
pub mod report;
pub mod steps;
pub mod testing;

pub use config::{
    CanBusConfig, CanBuses, FixtureConfig, PathsConfig, SerialLineConfig, SerialLines,
    TelemetryConfig, TimingConfig,
};
pub use error::{ConfigError, FlashError, ReportError, SessionError};
pub use fixture::{Fixture, FixtureParts};
pub use flasher::{FirmwareFlasher, RecordingFlasher, UploaderProcess};
pub use operator::{Operator, ScriptedOperator};
pub use orchestrator::{Orchestrator, Phase, ReleaseCheck, SessionOutcome};
pub use report::{ExternalRenderer, RecordingRenderer, ReportRenderer};
