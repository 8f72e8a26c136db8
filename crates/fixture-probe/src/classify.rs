//! Line classification contract
//!
//! Each function here maps one literal line of device output onto check
//! statuses. The markers are emitted by the test firmware's Lua scripts
//! (relayed as `AP:` status text by the telemetry companion), by the
//! companion itself ("Detected vehicle", "link 1 down"), and by `candump`.
//!
//! Contract version 2:
//!
//! | Check            | Marker                        | Rule                        |
//! |------------------|-------------------------------|-----------------------------|
//! | Psense Voltage   | `AP: Psense Voltage:`         | value > voltage threshold   |
//! | Psense Current   | `AP: Psense Current:`         | value > current threshold   |
//! | PSENSE Overall   | derived                       | both of the above PASS      |
//! | ADC              | `AP: Rangefinder Distance:`   | value > distance threshold  |
//! | I2C1 / I2C2      | `AP: I2C1:` / `AP: I2C2:`     | FAIL iff line has `ERROR`   |
//! | PPM and SBUSo    | `Radio Connected`/`Disconnected` | first marker wins        |
//!
//! Numeric values are read from the second-to-last whitespace token
//! (`AP: Psense Voltage: 5.1 V`), falling back to the last token.

use fixture_core::{all_pass, CheckStatus, StatusRegistry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const PSENSE_VOLTAGE: &str = "Psense Voltage";
pub const PSENSE_CURRENT: &str = "Psense Current";
pub const PSENSE_OVERALL: &str = "PSENSE Overall";
pub const ADC: &str = "ADC";
pub const I2C1: &str = "I2C1";
pub const I2C2: &str = "I2C2";
pub const RADIO: &str = "PPM and SBUSo";

const PSENSE_VOLTAGE_MARKER: &str = "AP: Psense Voltage:";
const PSENSE_CURRENT_MARKER: &str = "AP: Psense Current:";
const RANGEFINDER_MARKER: &str = "AP: Rangefinder Distance:";
const I2C1_MARKER: &str = "AP: I2C1:";
const I2C2_MARKER: &str = "AP: I2C2:";
const ERROR_TOKEN: &str = "ERROR";
const RADIO_CONNECTED: &str = "Radio Connected";
const RADIO_DISCONNECTED: &str = "Radio Disconnected";
const VEHICLE_DETECTED: &str = "Detected vehicle";
const LINK_DOWN: &str = "link 1 down";

/// Maps captured lines onto the checks a step owns
pub trait LineClassifier: Send + Sync {
    /// Directly observed checks; these are back-filled when never seen
    fn checks(&self) -> &[&'static str];

    /// Register derived entries before the first line arrives
    fn prepare(&self, _registry: &mut StatusRegistry) {}

    /// Apply one line; returns whether the line was recognised
    fn classify(&self, line: &str, registry: &mut StatusRegistry) -> bool;

    /// Whether capture can stop early
    fn is_complete(&self, _registry: &StatusRegistry) -> bool {
        false
    }
}

/// Minimum readings for the threshold checks
///
/// A reading must be strictly greater than its threshold to pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_voltage_min")]
    pub voltage_min: f64,
    #[serde(default = "default_current_min")]
    pub current_min: f64,
    #[serde(default = "default_distance_min")]
    pub distance_min: f64,
}

fn default_voltage_min() -> f64 {
    5.0
}

fn default_current_min() -> f64 {
    2.0
}

fn default_distance_min() -> f64 {
    11.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            voltage_min: default_voltage_min(),
            current_min: default_current_min(),
            distance_min: default_distance_min(),
        }
    }
}

/// Numeric reading carried by a status line
pub fn reading(line: &str) -> Option<f64> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let n = tokens.len();
    let second_last = n.checked_sub(2).and_then(|i| tokens[i].parse::<f64>().ok());
    second_last.or_else(|| tokens.last().and_then(|t| t.parse::<f64>().ok()))
}

/// PASS when the line's reading exceeds `min`; FAIL when below or unreadable
pub fn threshold_status(line: &str, min: f64) -> CheckStatus {
    match reading(line) {
        Some(value) => CheckStatus::from_pass(value > min),
        None => {
            warn!(%line, "Unreadable value in status line");
            CheckStatus::Fail
        }
    }
}

/// PASS unless the line carries the error marker
pub fn marker_status(line: &str) -> CheckStatus {
    CheckStatus::from_pass(!line.contains(ERROR_TOKEN))
}

// =============================================================================
// Capture classifiers
// =============================================================================

/// Power-sense cable: voltage and current thresholds plus derived overall
#[derive(Debug, Clone)]
pub struct PsenseClassifier {
    pub voltage_min: f64,
    pub current_min: f64,
}

impl PsenseClassifier {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            voltage_min: thresholds.voltage_min,
            current_min: thresholds.current_min,
        }
    }
}

impl LineClassifier for PsenseClassifier {
    fn checks(&self) -> &[&'static str] {
        &[PSENSE_VOLTAGE, PSENSE_CURRENT]
    }

    fn prepare(&self, registry: &mut StatusRegistry) {
        registry.derive(PSENSE_OVERALL, &[PSENSE_VOLTAGE, PSENSE_CURRENT], all_pass);
    }

    fn classify(&self, line: &str, registry: &mut StatusRegistry) -> bool {
        if line.contains(PSENSE_VOLTAGE_MARKER) {
            registry.set(PSENSE_VOLTAGE, threshold_status(line, self.voltage_min));
            true
        } else if line.contains(PSENSE_CURRENT_MARKER) {
            registry.set(PSENSE_CURRENT, threshold_status(line, self.current_min));
            true
        } else {
            false
        }
    }
}

/// Rangefinder channel on the ADC input
#[derive(Debug, Clone)]
pub struct AdcClassifier {
    pub distance_min: f64,
}

impl AdcClassifier {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            distance_min: thresholds.distance_min,
        }
    }
}

impl LineClassifier for AdcClassifier {
    fn checks(&self) -> &[&'static str] {
        &[ADC]
    }

    fn classify(&self, line: &str, registry: &mut StatusRegistry) -> bool {
        if !line.contains(RANGEFINDER_MARKER) {
            return false;
        }
        registry.set(ADC, threshold_status(line, self.distance_min));
        true
    }
}

/// Both I2C buses; failure is signalled by an error marker
#[derive(Debug, Clone, Default)]
pub struct I2cClassifier;

impl LineClassifier for I2cClassifier {
    fn checks(&self) -> &[&'static str] {
        &[I2C1, I2C2]
    }

    fn classify(&self, line: &str, registry: &mut StatusRegistry) -> bool {
        let check = if line.contains(I2C1_MARKER) {
            I2C1
        } else if line.contains(I2C2_MARKER) {
            I2C2
        } else {
            return false;
        };
        registry.set(check, marker_status(line));
        true
    }
}

/// Radio receiver status after the safety-switch action
///
/// The first connected/disconnected marker decides the check; silence is
/// handled by the caller as FAIL.
#[derive(Debug, Clone, Default)]
pub struct RadioClassifier;

impl LineClassifier for RadioClassifier {
    fn checks(&self) -> &[&'static str] {
        &[RADIO]
    }

    fn classify(&self, line: &str, registry: &mut StatusRegistry) -> bool {
        if registry.contains(RADIO) {
            return false;
        }
        if line.contains(RADIO_DISCONNECTED) {
            registry.set(RADIO, CheckStatus::Fail);
            true
        } else if line.contains(RADIO_CONNECTED) {
            registry.set(RADIO, CheckStatus::Pass);
            true
        } else {
            false
        }
    }

    fn is_complete(&self, registry: &StatusRegistry) -> bool {
        registry.contains(RADIO)
    }
}

// =============================================================================
// Shell-side patterns
// =============================================================================

/// Link-detection events printed by the companion on a serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialLinkEvent {
    Detected,
    LinkDown,
}

pub fn serial_link_event(line: &str) -> Option<SerialLinkEvent> {
    if line.contains(VEHICLE_DETECTED) {
        Some(SerialLinkEvent::Detected)
    } else if line.contains(LINK_DOWN) {
        Some(SerialLinkEvent::LinkDown)
    } else {
        None
    }
}

/// `candump` frame line: interface, CAN id, `[len]`, then 1–8 data bytes
///
/// e.g. `can0  18FEF100   [8]  01 02 03 04 05 06 07 08`
#[derive(Debug, Clone)]
pub struct CanFramePattern {
    regex: Regex,
}

impl CanFramePattern {
    pub fn for_interface(interface: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"^\s*{}\s+[0-9A-F]{{3,8}}\s+\[[0-8]\](?:\s+[0-9A-F]{{2}}){{1,8}}\s*$",
            regex::escape(interface)
        );
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}
