//! Session artifacts: result record, summary log and rendered report

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use fixture_core::TestRecord;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::ReportError;

pub const RESULTS_FILE: &str = "test_results.json";
pub const SUMMARY_FILE: &str = "summary_log.txt";

/// Write `test_results.json` into `dir`
pub fn write_results(dir: &Path, record: &TestRecord) -> Result<PathBuf, ReportError> {
    let path = dir.join(RESULTS_FILE);
    let json = record.to_json_pretty()?;
    write_file(&path, &json)?;
    info!(path = %path.display(), "Test results written");
    Ok(path)
}

/// Write `summary_log.txt` into `dir`
pub fn write_summary(
    dir: &Path,
    record: &TestRecord,
    now: &DateTime<Local>,
) -> Result<PathBuf, ReportError> {
    let path = dir.join(SUMMARY_FILE);
    write_file(&path, &summary_text(record, now))?;
    Ok(path)
}

pub fn summary_text(record: &TestRecord, now: &DateTime<Local>) -> String {
    let mut text = format!(
        "Date and Time: {}\nQR Code: {}\nFirmware Version: {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        record.qr_code,
        record.final_firmware_version
    );
    for (i, entry) in record.test_results.iter().enumerate() {
        text.push_str(&format!(
            "Step {}: {} - Status: {}\n",
            i + 1,
            entry.step_description,
            entry.step_status
        ));
    }
    text
}

fn write_file(path: &Path, content: &str) -> Result<(), ReportError> {
    std::fs::write(path, content).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Renders the human-readable report from the results file
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, results: &Path, image: &Path) -> Result<(), ReportError>;
}

/// Runs `[interpreter] <script> <results> <image>`
#[derive(Debug, Clone)]
pub struct ExternalRenderer {
    interpreter: String,
    script: PathBuf,
}

impl ExternalRenderer {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    fn command(&self, results: &Path, image: &Path) -> Command {
        let mut command = if self.interpreter.is_empty() {
            Command::new(&self.script)
        } else {
            let mut command = Command::new(&self.interpreter);
            command.arg(&self.script);
            command
        };
        command.arg(results).arg(image);
        command
    }
}

#[async_trait]
impl ReportRenderer for ExternalRenderer {
    async fn render(&self, results: &Path, image: &Path) -> Result<(), ReportError> {
        let status = self
            .command(results, image)
            .status()
            .await
            .map_err(|e| ReportError::Render(format!("{}: {}", self.script.display(), e)))?;

        if !status.success() {
            warn!(%status, "Report renderer failed");
            return Err(ReportError::Render(format!(
                "{} exited with {}",
                self.script.display(),
                status
            )));
        }
        info!("Report rendered");
        Ok(())
    }
}

/// Records render requests
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: bool,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ReportRenderer for RecordingRenderer {
    async fn render(&self, results: &Path, image: &Path) -> Result<(), ReportError> {
        self.calls
            .lock()
            .push((results.to_path_buf(), image.to_path_buf()));
        if self.fail {
            return Err(ReportError::Render("renderer unavailable".to_string()));
        }
        Ok(())
    }
}
