//! fixture-probe - Device access for the flight-controller production fixture
//!
//! This crate wraps the two transports the fixture talks through and the
//! machinery for capturing their output:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Step Library                           │
//! └──────────┬─────────────────────┬──────────────────────┬───────┘
//!            │                     │                      │
//!   ┌────────┴────────┐   ┌────────┴────────┐   ┌─────────┴────────┐
//!   │ TelemetryProbe  │   │   ShellProbe    │   │ BoundedClassifier│
//!   │ (DeviceLink)    │   │ (ShellSession)  │   │ (capture task)   │
//!   └────────┬────────┘   └────────┬────────┘   └─────────┬────────┘
//!            │                     │                      │
//!   ┌────────┴────────┐   ┌────────┴────────┐   ┌─────────┴────────┐
//!   │ TelemetryLink   │   │ ShellConnector  │   │ LineSource       │
//!   │ (MAVLink/mock)  │   │ (adb/mock)      │   │ (companion/mock) │
//!   └─────────────────┘   └─────────────────┘   └──────────────────┘
//! ```

pub mod capture;
pub mod classify;
pub mod error;
pub mod lines;
pub mod shell;
pub mod telemetry;

pub use capture::{BoundedClassifier, CaptureResult, CaptureSpec, CAPTURE_SLACK};
pub use classify::{
    AdcClassifier, CanFramePattern, I2cClassifier, LineClassifier, PsenseClassifier,
    RadioClassifier, Thresholds,
};
pub use error::{CaptureError, LinkError, ShellError};
pub use lines::{
    CompanionStream, LineSource, LineStreamSource, ScriptStep, ScriptedLines,
    ScriptedStreamSource,
};
pub use shell::{ShellChannel, ShellConfig, ShellConnector, ShellProbe, ShellSession};
pub use telemetry::{
    create_connector, DeviceLink, Heartbeat, LinkConnector, LinkTarget, TelemetryLink,
    TelemetryProbe, TelemetryTiming,
};
