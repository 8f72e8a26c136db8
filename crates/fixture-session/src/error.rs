//! Session-level errors

use fixture_probe::{CaptureError, LinkError, ShellError};
use thiserror::Error;

/// Firmware upload errors
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Failed to start uploader {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Uploader exited with {0}")]
    Exit(String),

    #[error("Firmware image not found: {0}")]
    ImageMissing(String),
}

/// Report writing and rendering errors
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Report renderer failed: {0}")]
    Render(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end a session or a stand-alone operation
///
/// Probe failures inside a full run are recorded on the owning check and
/// never surface here; only discovery, artifact and report failures do.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No flight controller attached
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(LinkError),

    #[error("Telemetry link error: {0}")]
    Link(#[from] LinkError),

    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Artifact directory {path}: {source}")]
    Artifacts {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
