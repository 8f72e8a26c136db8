//! Session orchestration
//!
//! A full run walks a fixed sequence of phases:
//!
//! ```text
//! INIT -> ENSURE_TEST_FIRMWARE -> PWM -> RADIO -> SERIAL_1..n -> CAN_1..n
//!      -> PSENSE -> ADC -> I2C -> DECIDE -> PASS_PATH | FAIL_PATH -> DONE
//! ```
//!
//! Discovery failure after the test image is loaded goes straight to ABORT.
//! Every other failure is recorded on the owning check and the run carries
//! on, so a session always ends with a complete record.

use std::path::PathBuf;

use chrono::Local;
use fixture_core::{
    CheckStatus, FirmwareIdentity, StatusRegistry, StatusSnapshot, TestSession,
    FAILED_FIRMWARE_PLACEHOLDER,
};
use fixture_probe::LinkError;
use tracing::{error, info, instrument, warn};

use crate::error::SessionError;
use crate::fixture::Fixture;
use crate::report;
use crate::steps::{self, CaptureStep};

/// Label recorded when the release image never reported its version
pub const UNKNOWN_FIRMWARE: &str = "UNKNOWN (no version response)";

/// Where a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    EnsureTestFirmware,
    Pwm,
    Radio,
    Serial(u8),
    Can(u8),
    Psense,
    Adc,
    I2c,
    Decide,
    FailPath,
    PassPath,
    Done,
    Abort,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Abort)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Init => write!(f, "INIT"),
            Phase::EnsureTestFirmware => write!(f, "ENSURE_TEST_FIRMWARE"),
            Phase::Pwm => write!(f, "PWM"),
            Phase::Radio => write!(f, "RADIO"),
            Phase::Serial(n) => write!(f, "SERIAL_{}", n),
            Phase::Can(n) => write!(f, "CAN_{}", n),
            Phase::Psense => write!(f, "PSENSE"),
            Phase::Adc => write!(f, "ADC"),
            Phase::I2c => write!(f, "I2C"),
            Phase::Decide => write!(f, "DECIDE"),
            Phase::FailPath => write!(f, "FAIL_PATH"),
            Phase::PassPath => write!(f, "PASS_PATH"),
            Phase::Done => write!(f, "DONE"),
            Phase::Abort => write!(f, "ABORT"),
        }
    }
}

/// Finished session and the artifacts written for it
#[derive(Debug)]
pub struct SessionOutcome {
    pub session: TestSession,
    pub results_path: PathBuf,
    pub summary_path: PathBuf,
    /// False when the external renderer failed; the JSON record still exists
    pub report_rendered: bool,
}

impl SessionOutcome {
    pub fn success(&self) -> bool {
        self.session.success
    }
}

/// Result of the stand-alone release flash
#[derive(Debug)]
pub struct ReleaseCheck {
    pub firmware: Result<FirmwareIdentity, LinkError>,
    /// Re-verified serial line and its status
    pub serial: Option<(String, CheckStatus)>,
}

/// Drives sessions and stand-alone operations against one fixture
pub struct Orchestrator {
    fixture: Fixture,
    phase: Phase,
    history: Vec<Phase>,
}

impl Orchestrator {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            phase: Phase::Init,
            history: Vec::new(),
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Phases visited by the most recent session, in order
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    fn enter(&mut self, phase: Phase) {
        info!(from = %self.phase, to = %phase, "Session phase");
        self.phase = phase;
        self.history.push(phase);
    }

    // =========================================================================
    // Full session
    // =========================================================================

    /// Run every check on the attached unit and write its artifacts
    #[instrument(skip(self))]
    pub async fn run_session(&mut self, unit_id: &str) -> Result<SessionOutcome, SessionError> {
        self.history.clear();
        self.phase = Phase::Init;
        self.enter(Phase::Init);
        let mut session = TestSession::new(
            unit_id,
            &self.fixture.config.paths.artifact_root,
            Local::now(),
        );
        info!(unit = %session.unit_id, "Session started");

        self.enter(Phase::EnsureTestFirmware);
        self.load_test_firmware().await;

        if let Err(e) = self.fixture.telemetry.discover() {
            error!(error = %e, "No flight controller found, aborting session");
            self.enter(Phase::Abort);
            return Err(SessionError::DeviceUnavailable(e));
        }
        if let Err(source) = std::fs::create_dir_all(&session.artifact_dir) {
            self.enter(Phase::Abort);
            return Err(SessionError::Artifacts {
                path: session.artifact_dir.display().to_string(),
                source,
            });
        }

        self.run_checks(&mut session).await;

        self.enter(Phase::Decide);
        let snapshot = session.registry.snapshot();
        if snapshot.all_pass() {
            self.enter(Phase::PassPath);
            self.finish_passed(&mut session).await;
        } else {
            for (name, status) in snapshot.failures() {
                warn!(check = name, %status, "Check did not pass");
            }
            self.enter(Phase::FailPath);
            session.final_firmware_version = FAILED_FIRMWARE_PLACEHOLDER.to_string();
            session.success = false;
        }

        let outcome = self.write_artifacts(session).await?;
        self.enter(Phase::Done);
        info!(
            success = outcome.success(),
            dir = %outcome.session.artifact_dir.display(),
            "Session finished"
        );
        Ok(outcome)
    }

    async fn run_checks(&mut self, session: &mut TestSession) {
        let log_dir = session.artifact_dir.clone();
        let registry = &mut session.registry;

        self.enter(Phase::Pwm);
        steps::run_pwm_outputs(&self.fixture, registry).await;

        self.enter(Phase::Radio);
        let step = CaptureStep::radio(&self.fixture);
        steps::run_capture(&self.fixture, registry, &log_dir, step).await;

        for line in self.fixture.config.serial_lines.lines.clone() {
            self.enter(Phase::Serial(line.number));
            steps::run_serial_line(&self.fixture, registry, &line).await;
        }

        for bus in self.fixture.config.can_buses.buses.clone() {
            self.enter(Phase::Can(bus.number));
            steps::run_can_bus(&self.fixture, registry, &bus).await;
        }

        self.enter(Phase::Psense);
        let step = CaptureStep::psense(&self.fixture);
        steps::run_capture(&self.fixture, registry, &log_dir, step).await;

        self.enter(Phase::Adc);
        let step = CaptureStep::adc(&self.fixture);
        steps::run_capture(&self.fixture, registry, &log_dir, step).await;

        self.enter(Phase::I2c);
        let step = CaptureStep::i2c(&self.fixture);
        steps::run_capture(&self.fixture, registry, &log_dir, step).await;
    }

    /// Load the release image, record its version and re-check the serial line
    async fn finish_passed(&self, session: &mut TestSession) {
        let release = self.fixture.config.paths.release_image_path();
        let flashed = match self.fixture.flasher.flash(&release).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Release firmware upload failed");
                false
            }
        };
        tokio::time::sleep(self.fixture.config.timing.flash_settle()).await;

        session.final_firmware_version = match self.query_version().await {
            Ok(identity) => identity.version.to_string(),
            Err(e) => {
                warn!(error = %e, "Release firmware version unavailable");
                UNKNOWN_FIRMWARE.to_string()
            }
        };

        self.reverify_serial(&mut session.registry).await;
        session.success = flashed && session.registry.snapshot().all_pass();
    }

    async fn reverify_serial(&self, registry: &mut StatusRegistry) -> Option<(String, CheckStatus)> {
        let number = self.fixture.config.serial_lines.reverify;
        let line = self.fixture.config.serial_line(number)?.clone();
        info!(line = number, "Re-verifying serial line on release firmware");
        let status = steps::run_serial_line(&self.fixture, registry, &line).await;
        Some((line.check_name(), status))
    }

    async fn write_artifacts(&self, session: TestSession) -> Result<SessionOutcome, SessionError> {
        let record = session.record();
        let results_path = report::write_results(&session.artifact_dir, &record)?;
        let summary_path = report::write_summary(&session.artifact_dir, &record, &Local::now())?;

        let image = &self.fixture.config.paths.reference_image;
        let report_rendered = match self.fixture.renderer.render(&results_path, image).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Report not rendered; results file kept");
                false
            }
        };

        Ok(SessionOutcome {
            session,
            results_path,
            summary_path,
            report_rendered,
        })
    }

    async fn load_test_firmware(&self) {
        let image = self.fixture.config.paths.test_image_path();
        if let Err(e) = self.fixture.flasher.flash(&image).await {
            warn!(error = %e, "Test firmware upload failed, continuing with current image");
        }
        tokio::time::sleep(self.fixture.config.timing.flash_settle()).await;
        match self.query_version().await {
            Ok(identity) => info!(%identity, "Test firmware running"),
            Err(e) => warn!(error = %e, "Could not read firmware version"),
        }
    }

    // =========================================================================
    // Stand-alone operations
    // =========================================================================

    /// Power-sense capture on its own; silence counts as FAIL
    #[instrument(skip(self))]
    pub async fn psense_only(&self) -> Result<StatusSnapshot, SessionError> {
        self.discover()?;
        let mut registry = StatusRegistry::new();
        let step = CaptureStep::psense_standalone(&self.fixture);
        let log_dir = self.fixture.config.paths.scratch_dir.clone();
        steps::run_capture(&self.fixture, &mut registry, &log_dir, step).await;
        Ok(registry.snapshot())
    }

    /// Upload the test image and report what the unit runs afterwards
    #[instrument(skip(self))]
    pub async fn flash_test(&self) -> Result<FirmwareIdentity, SessionError> {
        let image = self.fixture.config.paths.test_image_path();
        self.fixture.flasher.flash(&image).await?;
        tokio::time::sleep(self.fixture.config.timing.flash_settle()).await;
        Ok(self.query_version().await?)
    }

    /// Upload the release image, read its version and re-check the serial line
    #[instrument(skip(self))]
    pub async fn flash_release(&self) -> Result<ReleaseCheck, SessionError> {
        let image = self.fixture.config.paths.release_image_path();
        self.fixture.flasher.flash(&image).await?;
        tokio::time::sleep(self.fixture.config.timing.flash_settle()).await;

        let firmware = self.query_version().await;
        let mut registry = StatusRegistry::new();
        let serial = self.reverify_serial(&mut registry).await;
        Ok(ReleaseCheck { firmware, serial })
    }

    #[instrument(skip(self))]
    pub async fn firmware_version(&self) -> Result<FirmwareIdentity, SessionError> {
        self.discover()?;
        Ok(self.query_version().await?)
    }

    /// Reboot the unit and wait for it to come back
    #[instrument(skip(self))]
    pub async fn reboot(&self) -> Result<(), SessionError> {
        let address = self.discover()?;
        let telemetry = &self.fixture.telemetry;
        let mut link = telemetry
            .connect_to(&address, self.fixture.config.telemetry.command_baud)
            .await?;
        if !telemetry
            .wait_heartbeat(&mut link, telemetry.timing().heartbeat_timeout())
            .await
        {
            return Err(LinkError::Unresponsive("no heartbeat".to_string()).into());
        }
        telemetry.send_reboot(&link).await?;
        drop(link);
        telemetry.reboot_settle().await;
        Ok(())
    }

    fn discover(&self) -> Result<String, SessionError> {
        self.fixture
            .telemetry
            .discover()
            .map_err(SessionError::DeviceUnavailable)
    }

    async fn query_version(&self) -> Result<FirmwareIdentity, LinkError> {
        let mut link = self
            .fixture
            .telemetry
            .connect(self.fixture.config.telemetry.command_baud)
            .await?;
        self.fixture.telemetry.query_firmware_version(&mut link).await
    }
}
