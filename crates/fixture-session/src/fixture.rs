//! Fixture resources shared by every step

use std::sync::Arc;
use std::time::Duration;

use fixture_probe::shell::adb::AdbConnector;
use fixture_probe::{
    create_connector, CompanionStream, LineStreamSource, LinkConnector, ShellConnector, ShellProbe,
    TelemetryProbe,
};

use crate::config::FixtureConfig;
use crate::error::SessionError;
use crate::flasher::{FirmwareFlasher, UploaderProcess};
use crate::operator::Operator;
use crate::report::{ExternalRenderer, ReportRenderer};

/// Transports and collaborators a fixture is assembled from
pub struct FixtureParts {
    pub links: Arc<dyn LinkConnector>,
    pub shells: Arc<dyn ShellConnector>,
    pub streams: Arc<dyn LineStreamSource>,
    pub operator: Arc<dyn Operator>,
    pub flasher: Arc<dyn FirmwareFlasher>,
    pub renderer: Arc<dyn ReportRenderer>,
}

/// One physical test fixture
pub struct Fixture {
    pub config: FixtureConfig,
    pub telemetry: TelemetryProbe,
    pub shell: ShellProbe,
    pub streams: Arc<dyn LineStreamSource>,
    pub operator: Arc<dyn Operator>,
    pub flasher: Arc<dyn FirmwareFlasher>,
    pub renderer: Arc<dyn ReportRenderer>,
}

impl Fixture {
    pub fn with_parts(config: FixtureConfig, parts: FixtureParts) -> Result<Self, SessionError> {
        let telemetry = TelemetryProbe::new(parts.links, config.telemetry.timing.clone());
        let shell = ShellProbe::new(parts.shells, config.shell.clone())?;
        Ok(Self {
            config,
            telemetry,
            shell,
            streams: parts.streams,
            operator: parts.operator,
            flasher: parts.flasher,
            renderer: parts.renderer,
        })
    }

    /// Fixture wired to the real unit, adb, companion and external tools
    pub fn hardware(
        config: FixtureConfig,
        operator: Arc<dyn Operator>,
    ) -> Result<Self, SessionError> {
        let paths = &config.paths;
        let parts = FixtureParts {
            links: create_connector()?,
            shells: Arc::new(AdbConnector::new(
                config.shell.adb_program.clone(),
                Duration::from_millis(config.shell.su_settle_ms),
            )),
            streams: Arc::new(CompanionStream::new(
                config.telemetry.companion_program.clone(),
                config.telemetry.companion_baud,
                config.telemetry.aircraft.clone(),
            )),
            operator,
            flasher: Arc::new(UploaderProcess::new(
                paths.uploader_path(),
                paths.firmware_dir.clone(),
            )),
            renderer: Arc::new(ExternalRenderer::new(
                paths.renderer_interpreter.clone(),
                paths.report_renderer.clone(),
            )),
        };
        Self::with_parts(config, parts)
    }
}
