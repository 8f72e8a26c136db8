//! Test session and the persisted result record

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::registry::{StatusRegistry, StatusSnapshot};
use crate::status::CheckStatus;

/// Firmware label written into reports of units that failed testing
pub const FAILED_FIRMWARE_PLACEHOLDER: &str = "NOT FLASHED (test failed)";

/// Timestamp format used in artifact directory names
const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// One full test pass over one physical unit
#[derive(Debug)]
pub struct TestSession {
    /// Scanned unit code (QR label)
    pub unit_id: String,
    pub created_at: DateTime<Local>,
    /// Directory holding every artifact produced for this session
    pub artifact_dir: PathBuf,
    pub registry: StatusRegistry,
    pub final_firmware_version: String,
    pub success: bool,
}

impl TestSession {
    /// Create a session whose artifacts live under `artifact_root`
    ///
    /// The directory itself is not created here.
    pub fn new(unit_id: &str, artifact_root: &Path, created_at: DateTime<Local>) -> Self {
        let artifact_dir = artifact_root.join(Self::artifact_dir_name(unit_id, &created_at));
        Self {
            unit_id: unit_id.to_string(),
            created_at,
            artifact_dir,
            registry: StatusRegistry::new(),
            final_firmware_version: String::new(),
            success: false,
        }
    }

    /// `<unit>_<YYYY-mm-dd_HH-MM-SS>`, with path separators in the unit id replaced
    pub fn artifact_dir_name(unit_id: &str, created_at: &DateTime<Local>) -> String {
        let unit: String = unit_id
            .trim()
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}_{}", unit, created_at.format(ARTIFACT_TIMESTAMP_FORMAT))
    }

    /// Path of an artifact inside this session's directory
    pub fn artifact(&self, file_name: &str) -> PathBuf {
        self.artifact_dir.join(file_name)
    }

    /// Freeze the session into its persisted record
    pub fn record(&self) -> TestRecord {
        TestRecord::from_snapshot(
            &self.unit_id,
            &self.final_firmware_version,
            &self.registry.snapshot(),
        )
    }
}

/// Session record handed to report generation
///
/// This is the on-disk layout of `test_results.json`; field names and the
/// array-of-pairs shape are relied on by the report renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub qr_code: String,
    pub final_firmware_version: String,
    pub test_results: Vec<ResultEntry>,
}

/// One (check, status) pair in report order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub step_description: String,
    pub step_status: CheckStatus,
}

impl TestRecord {
    pub fn from_snapshot(unit_id: &str, firmware: &str, snapshot: &StatusSnapshot) -> Self {
        Self {
            qr_code: unit_id.to_string(),
            final_firmware_version: firmware.to_string(),
            test_results: snapshot
                .iter()
                .map(|(name, status)| ResultEntry {
                    step_description: name.to_string(),
                    step_status: status,
                })
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
