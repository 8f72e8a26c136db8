//! In-memory fixture for exercising sessions without hardware

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fixture_probe::shell::mock::MockShellConnector;
use fixture_probe::telemetry::mock::{MockLinkConnector, MockTelemetryLink};
use fixture_probe::ScriptedStreamSource;

use crate::config::FixtureConfig;
use crate::error::SessionError;
use crate::fixture::{Fixture, FixtureParts};
use crate::flasher::RecordingFlasher;
use crate::operator::ScriptedOperator;
use crate::report::RecordingRenderer;

/// Version word reported by the test image (dev-4.6.0)
pub const TEST_FIRMWARE_WORD: u32 = 0x0406_0000;
/// Version word reported once the release image is loaded (official-4.5.2)
pub const RELEASE_FIRMWARE_WORD: u32 = 0x0405_02FF;

/// Mock transports plus handles for inspecting them afterwards
///
/// Flashing the configured release image switches the mock unit over to
/// reporting [`RELEASE_FIRMWARE_WORD`].
pub struct MockRig {
    pub config: FixtureConfig,
    pub link: Arc<MockTelemetryLink>,
    pub links: Arc<MockLinkConnector>,
    pub shells: Arc<MockShellConnector>,
    pub streams: Arc<ScriptedStreamSource>,
    pub operator: Arc<ScriptedOperator>,
    pub flasher: Arc<RecordingFlasher>,
    pub renderer: Arc<RecordingRenderer>,
}

impl MockRig {
    /// Responsive copter on test firmware with an agreeable operator
    pub fn new() -> Self {
        Self::with_link(MockTelemetryLink::new().with_version(TEST_FIRMWARE_WORD))
    }

    /// Unit that enumerates but never sends a heartbeat
    pub fn silent() -> Self {
        Self::with_link(MockTelemetryLink::silent())
    }

    /// No flight controller attached
    pub fn no_device() -> Self {
        let mut rig = Self::silent();
        rig.links = Arc::new(MockLinkConnector::no_device());
        rig.link = rig.links.link();
        rig
    }

    fn with_link(link: MockTelemetryLink) -> Self {
        let config = FixtureConfig::default();
        let link = Arc::new(link);
        let flasher = release_switching_flasher(&link, config.paths.release_image_path());
        Self {
            config,
            links: Arc::new(MockLinkConnector::new(Arc::clone(&link))),
            link,
            shells: Arc::new(MockShellConnector::healthy()),
            streams: Arc::new(ScriptedStreamSource::unavailable()),
            operator: Arc::new(ScriptedOperator::agreeable()),
            flasher: Arc::new(flasher),
            renderer: Arc::new(RecordingRenderer::new()),
        }
    }

    pub fn with_answers(mut self, answers: Vec<Option<bool>>) -> Self {
        self.operator = Arc::new(ScriptedOperator::new(answers));
        self
    }

    pub fn with_shells(mut self, shells: MockShellConnector) -> Self {
        self.shells = Arc::new(shells);
        self
    }

    pub fn with_streams(mut self, streams: ScriptedStreamSource) -> Self {
        self.streams = Arc::new(streams);
        self
    }

    pub fn with_flasher(mut self, flasher: RecordingFlasher) -> Self {
        self.flasher = Arc::new(flasher);
        self
    }

    pub fn with_renderer(mut self, renderer: RecordingRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    /// Put session artifacts and scratch logs under `root`
    pub fn with_artifact_root(mut self, root: &Path) -> Self {
        self.config.paths.artifact_root = root.to_path_buf();
        self.config.paths.scratch_dir = root.join("scratch");
        self
    }

    /// Build a fixture over the rig's shared mocks
    pub fn fixture(&self) -> Result<Fixture, SessionError> {
        Fixture::with_parts(
            self.config.clone(),
            FixtureParts {
                links: self.links.clone(),
                shells: self.shells.clone(),
                streams: self.streams.clone(),
                operator: self.operator.clone(),
                flasher: self.flasher.clone(),
                renderer: self.renderer.clone(),
            },
        )
    }
}

impl Default for MockRig {
    fn default() -> Self {
        Self::new()
    }
}

fn release_switching_flasher(link: &Arc<MockTelemetryLink>, release: PathBuf) -> RecordingFlasher {
    let link = Arc::clone(link);
    RecordingFlasher::with_hook(move |image| {
        if image == release {
            link.set_version(RELEASE_FIRMWARE_WORD);
        }
    })
}
