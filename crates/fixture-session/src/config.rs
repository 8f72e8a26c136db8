//! Fixture configuration
//!
//! Loaded once at start-up from TOML. Every field has a default matching
//! the current fixture revision, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use fixture_probe::{ShellConfig, TelemetryTiming, Thresholds};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete fixture configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// On-board serial lines, in test order
    #[serde(default = "default_serial_lines")]
    pub serial_lines: SerialLines,
    /// CAN buses, in test order
    #[serde(default = "default_can_buses")]
    pub can_buses: CanBuses,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl FixtureConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_lines.lines.is_empty() {
            return Err(ConfigError::Invalid("no serial lines configured".to_string()));
        }
        if !self
            .serial_lines
            .lines
            .iter()
            .any(|l| l.number == self.serial_lines.reverify)
        {
            return Err(ConfigError::Invalid(format!(
                "re-verify line Serial {} is not configured",
                self.serial_lines.reverify
            )));
        }
        let serial_pins = self.serial_lines.mux_pins.len();
        for line in &self.serial_lines.lines {
            match &line.mux {
                Some(values) if values.len() != serial_pins => {
                    return Err(ConfigError::Invalid(format!(
                        "Serial {} has {} mux value(s) for {} mux pin(s)",
                        line.number,
                        values.len(),
                        serial_pins
                    )));
                }
                _ => {}
            }
        }
        let can_pins = self.can_buses.mux_pins.len();
        for bus in &self.can_buses.buses {
            if bus.mux.len() != can_pins {
                return Err(ConfigError::Invalid(format!(
                    "CAN {} has {} mux value(s) for {} mux pin(s)",
                    bus.number,
                    bus.mux.len(),
                    can_pins
                )));
            }
        }
        Ok(())
    }

    /// Serial line by number
    pub fn serial_line(&self, number: u8) -> Option<&SerialLineConfig> {
        self.serial_lines.lines.iter().find(|l| l.number == number)
    }
}

// =============================================================================
// Paths
// =============================================================================

/// Firmware images, external tools and artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Working directory of the uploader; relative image paths resolve here
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: PathBuf,
    #[serde(default = "default_test_image")]
    pub test_image: PathBuf,
    #[serde(default = "default_release_image")]
    pub release_image: PathBuf,
    #[serde(default = "default_uploader")]
    pub uploader: PathBuf,
    /// Interpreter for the renderer; empty runs the renderer directly
    #[serde(default = "default_renderer_interpreter")]
    pub renderer_interpreter: String,
    #[serde(default = "default_report_renderer")]
    pub report_renderer: PathBuf,
    /// Board picture embedded in the rendered report
    #[serde(default = "default_reference_image")]
    pub reference_image: PathBuf,
    /// One sub-directory per session is created here
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
    /// Log directory for stand-alone power-sense runs
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_firmware_dir() -> PathBuf {
    PathBuf::from("firmware")
}

fn default_test_image() -> PathBuf {
    PathBuf::from("ArducopterTest4.6.0-dev_images/bin/arducopter.apj")
}

fn default_release_image() -> PathBuf {
    PathBuf::from("ArducopterFinal4.5.2_images/bin/arducopter.apj")
}

fn default_uploader() -> PathBuf {
    PathBuf::from("uploader.py")
}

fn default_renderer_interpreter() -> String {
    "python3".to_string()
}

fn default_report_renderer() -> PathBuf {
    PathBuf::from("scripts/generate_reports.py")
}

fn default_reference_image() -> PathBuf {
    PathBuf::from("images/cube.jpg")
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("Production_Test")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            firmware_dir: default_firmware_dir(),
            test_image: default_test_image(),
            release_image: default_release_image(),
            uploader: default_uploader(),
            renderer_interpreter: default_renderer_interpreter(),
            report_renderer: default_report_renderer(),
            reference_image: default_reference_image(),
            artifact_root: default_artifact_root(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl PathsConfig {
    pub fn test_image_path(&self) -> PathBuf {
        self.firmware_dir.join(&self.test_image)
    }

    pub fn release_image_path(&self) -> PathBuf {
        self.firmware_dir.join(&self.release_image)
    }

    pub fn uploader_path(&self) -> PathBuf {
        self.firmware_dir.join(&self.uploader)
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// Telemetry link and companion console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Baud rate of the command link
    #[serde(default = "default_command_baud")]
    pub command_baud: u32,
    #[serde(default = "default_companion_program")]
    pub companion_program: String,
    #[serde(default = "default_companion_baud")]
    pub companion_baud: u32,
    #[serde(default = "default_aircraft")]
    pub aircraft: String,
    #[serde(flatten)]
    pub timing: TelemetryTiming,
}

fn default_command_baud() -> u32 {
    115_200
}

fn default_companion_program() -> String {
    "mavproxy.py".to_string()
}

fn default_companion_baud() -> u32 {
    921_600
}

fn default_aircraft() -> String {
    "MyCopter".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            command_baud: default_command_baud(),
            companion_program: default_companion_program(),
            companion_baud: default_companion_baud(),
            aircraft: default_aircraft(),
            timing: TelemetryTiming::default(),
        }
    }
}

// =============================================================================
// Mux tables
// =============================================================================

/// Serial line mux table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialLines {
    /// GPIO pins of the serial mux, most significant first
    #[serde(default)]
    pub mux_pins: Vec<u32>,
    /// Line re-checked after the release flash
    pub reverify: u8,
    pub lines: Vec<SerialLineConfig>,
}

/// One on-board serial line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLineConfig {
    pub number: u8,
    /// UART device on the companion SoC
    pub device: String,
    /// Mux pin values; `None` for a line wired straight to its UART
    #[serde(default)]
    pub mux: Option<Vec<u8>>,
}

impl SerialLineConfig {
    pub fn check_name(&self) -> String {
        format!("Serial {}", self.number)
    }
}

fn default_serial_lines() -> SerialLines {
    let muxed = |number: u8, mux: [u8; 2]| SerialLineConfig {
        number,
        device: "/dev/ttyHS2".to_string(),
        mux: Some(mux.to_vec()),
    };
    SerialLines {
        mux_pins: vec![442, 464],
        reverify: 2,
        lines: vec![
            muxed(1, [0, 0]),
            SerialLineConfig {
                number: 2,
                device: "/dev/ttyHS1".to_string(),
                mux: None,
            },
            muxed(3, [0, 1]),
            muxed(4, [1, 0]),
            muxed(5, [1, 1]),
        ],
    }
}

impl Default for SerialLines {
    fn default() -> Self {
        default_serial_lines()
    }
}

/// CAN bus mux table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanBuses {
    pub mux_pins: Vec<u32>,
    pub buses: Vec<CanBusConfig>,
}

/// One CAN bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanBusConfig {
    pub number: u8,
    pub mux: Vec<u8>,
}

impl CanBusConfig {
    pub fn check_name(&self) -> String {
        format!("CAN {}", self.number)
    }
}

fn default_can_buses() -> CanBuses {
    CanBuses {
        mux_pins: vec![370, 371],
        buses: vec![
            CanBusConfig {
                number: 1,
                mux: vec![1, 1],
            },
            CanBusConfig {
                number: 2,
                mux: vec![0, 0],
            },
        ],
    }
}

impl Default for CanBuses {
    fn default() -> Self {
        default_can_buses()
    }
}

// =============================================================================
// Timing
// =============================================================================

/// Step deadlines and settle delays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_flash_settle_secs")]
    pub flash_settle_secs: u64,
    #[serde(default = "default_capture_secs")]
    pub capture_secs: u64,
    #[serde(default = "default_capture_max_lines")]
    pub capture_max_lines: usize,
    #[serde(default = "default_radio_secs")]
    pub radio_secs: u64,
    #[serde(default = "default_confirm_secs")]
    pub confirm_secs: u64,
    #[serde(default = "default_serial_detect_secs")]
    pub serial_detect_secs: u64,
    #[serde(default = "default_can_listen_secs")]
    pub can_listen_secs: u64,
}

fn default_flash_settle_secs() -> u64 {
    12
}

fn default_capture_secs() -> u64 {
    10
}

fn default_capture_max_lines() -> usize {
    50
}

fn default_radio_secs() -> u64 {
    15
}

fn default_confirm_secs() -> u64 {
    30
}

fn default_serial_detect_secs() -> u64 {
    10
}

fn default_can_listen_secs() -> u64 {
    5
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            flash_settle_secs: default_flash_settle_secs(),
            capture_secs: default_capture_secs(),
            capture_max_lines: default_capture_max_lines(),
            radio_secs: default_radio_secs(),
            confirm_secs: default_confirm_secs(),
            serial_detect_secs: default_serial_detect_secs(),
            can_listen_secs: default_can_listen_secs(),
        }
    }
}

impl TimingConfig {
    pub fn flash_settle(&self) -> Duration {
        Duration::from_secs(self.flash_settle_secs)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_secs(self.capture_secs)
    }

    pub fn radio(&self) -> Duration {
        Duration::from_secs(self.radio_secs)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }

    pub fn serial_detect(&self) -> Duration {
        Duration::from_secs(self.serial_detect_secs)
    }

    pub fn can_listen(&self) -> Duration {
        Duration::from_secs(self.can_listen_secs)
    }
}
