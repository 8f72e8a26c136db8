//! Probe errors
//!
//! None of these are fatal to a session on their own: step routines turn
//! them into FAIL or NO_MESSAGE on the checks they own. Only a missing
//! device at discovery time aborts a run.

use thiserror::Error;

/// Telemetry link errors
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// No matching transport address on the host
    #[error("No flight controller port found")]
    LinkUnavailable,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No typed response within the request window
    #[error("Device did not respond: {0}")]
    Unresponsive(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Companion process failed: {0}")]
    Companion(String),

    #[error("Link not supported: {0}")]
    Unsupported(String),
}

/// Remote shell errors
#[derive(Debug, Error, Clone)]
pub enum ShellError {
    /// Privileged session could not be established after every attempt
    #[error("Shell unavailable after {attempts} attempt(s): {reason}")]
    ShellUnavailable { attempts: u32, reason: String },

    /// Single connection attempt failed
    #[error("Shell connection failed: {0}")]
    ConnectFailed(String),

    /// Transport died mid-command
    #[error("Shell channel broken: {0}")]
    ChannelBroken(String),

    #[error("Invalid shell configuration: {0}")]
    InvalidConfig(String),
}

/// Bounded capture errors
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture log {path}: {source}")]
    Log {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
