//! Companion-stream capture steps: radio, power sense, ADC and I2C

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fixture_core::{CheckStatus, StatusRegistry};
use fixture_probe::{
    AdcClassifier, BoundedClassifier, CaptureResult, CaptureSpec, I2cClassifier, LineClassifier,
    PsenseClassifier, RadioClassifier,
};
use tracing::{info, instrument, warn};

use crate::fixture::Fixture;

/// Shown when a capture saw no test output at all
pub const MESSAGES_MISSING: &str =
    "Test messages not received, please check the SD card and Lua scripts";

pub const SAFETY_SWITCH_PROMPT: &str =
    "Hold the safety switch until it blinks red, then press Enter";

/// One capture step
pub struct CaptureStep {
    pub label: &'static str,
    /// Raw log file name inside the log directory
    pub log_file: &'static str,
    pub classifier: Arc<dyn LineClassifier>,
    pub deadline: Duration,
    pub max_lines: Option<usize>,
    /// Status given to owned checks the stream never reported
    pub silence: CheckStatus,
    /// Acknowledged once the stream is open, before the window starts
    pub prompt: Option<&'static str>,
}

impl CaptureStep {
    pub fn radio(fixture: &Fixture) -> Self {
        Self {
            label: "radio",
            log_file: "mavproxy_radio_logs.txt",
            classifier: Arc::new(RadioClassifier),
            deadline: fixture.config.timing.radio(),
            max_lines: None,
            silence: CheckStatus::Fail,
            prompt: Some(SAFETY_SWITCH_PROMPT),
        }
    }

    pub fn psense(fixture: &Fixture) -> Self {
        Self {
            label: "psense",
            log_file: "mavproxy_psense_logs.txt",
            classifier: Arc::new(PsenseClassifier::new(&fixture.config.thresholds)),
            deadline: fixture.config.timing.capture(),
            max_lines: Some(fixture.config.timing.capture_max_lines),
            silence: CheckStatus::NoMessage,
            prompt: None,
        }
    }

    /// Power sense on its own, where silence is a failure
    pub fn psense_standalone(fixture: &Fixture) -> Self {
        Self {
            silence: CheckStatus::Fail,
            ..Self::psense(fixture)
        }
    }

    pub fn adc(fixture: &Fixture) -> Self {
        Self {
            label: "adc",
            log_file: "mavproxy_adc_logs.txt",
            classifier: Arc::new(AdcClassifier::new(&fixture.config.thresholds)),
            deadline: fixture.config.timing.capture(),
            max_lines: Some(fixture.config.timing.capture_max_lines),
            silence: CheckStatus::NoMessage,
            prompt: None,
        }
    }

    pub fn i2c(fixture: &Fixture) -> Self {
        Self {
            label: "i2c",
            log_file: "mavproxy_i2c_logs.txt",
            classifier: Arc::new(I2cClassifier),
            deadline: fixture.config.timing.capture(),
            max_lines: Some(fixture.config.timing.capture_max_lines),
            silence: CheckStatus::NoMessage,
            prompt: None,
        }
    }

    fn spec(&self, log_dir: &Path) -> CaptureSpec {
        let spec = CaptureSpec::new(self.label, self.deadline, log_dir.join(self.log_file));
        match self.max_lines {
            Some(max) => spec.with_max_lines(max),
            None => spec,
        }
    }
}

/// Open the companion stream, capture one window and back-fill silence
#[instrument(skip_all, fields(step = step.label))]
pub async fn run_capture(
    fixture: &Fixture,
    registry: &mut StatusRegistry,
    log_dir: &Path,
    step: CaptureStep,
) -> CaptureResult {
    let checks = step.classifier.checks();

    let source = match fixture.telemetry.discover() {
        Ok(address) => fixture.streams.open(&address).await,
        Err(e) => Err(e),
    };
    let source = match source {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, "Companion stream unavailable");
            step.classifier.prepare(registry);
            registry.backfill(checks, CheckStatus::Fail);
            return CaptureResult::default();
        }
    };

    if let Some(prompt) = step.prompt {
        fixture.operator.acknowledge(prompt).await;
    }

    let spec = step.spec(log_dir);
    let result = match BoundedClassifier::run(source, &spec, step.classifier.clone(), registry).await
    {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Capture failed");
            step.classifier.prepare(registry);
            registry.backfill(checks, CheckStatus::Fail);
            return CaptureResult::default();
        }
    };

    let filled = registry.backfill(checks, step.silence);
    if !filled.is_empty() {
        info!(?filled, status = %step.silence, "Unreported checks back-filled");
    }
    if !result.observed_any() {
        warn!("{}", MESSAGES_MISSING);
        fixture.operator.notify(MESSAGES_MISSING);
    }
    info!(
        lines = result.lines,
        matched = result.matched,
        completed = result.completed,
        "Capture finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRig;
    use fixture_probe::classify::{I2C1, I2C2, PSENSE_CURRENT, PSENSE_OVERALL, PSENSE_VOLTAGE, RADIO};
    use fixture_probe::{ScriptStep, ScriptedStreamSource};
    use pretty_assertions::assert_eq;

    fn lines(lines: &[&str]) -> Vec<ScriptStep> {
        lines.iter().map(|l| ScriptStep::line(l)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_psense_capture_records_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let rig = MockRig::new().with_streams(ScriptedStreamSource::repeating(lines(&[
            "AP: Psense Voltage: 5.21 V",
            "AP: Psense Current: 2.40 A",
        ])));
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        let result = run_capture(&fixture, &mut registry, dir.path(), CaptureStep::psense(&fixture)).await;

        assert!(result.observed_any());
        assert_eq!(registry.get(PSENSE_VOLTAGE), Some(CheckStatus::Pass));
        assert_eq!(registry.get(PSENSE_CURRENT), Some(CheckStatus::Pass));
        assert_eq!(registry.get(PSENSE_OVERALL), Some(CheckStatus::Pass));
        let log = std::fs::read_to_string(dir.path().join("mavproxy_psense_logs.txt")).unwrap();
        assert!(log.contains("AP: Psense Current: 2.40 A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_i2c_backfills_no_message() {
        let dir = tempfile::tempdir().unwrap();
        let rig = MockRig::new().with_streams(ScriptedStreamSource::repeating(vec![
            ScriptStep::Delay(Duration::from_secs(2)),
        ]));
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        let result = run_capture(&fixture, &mut registry, dir.path(), CaptureStep::i2c(&fixture)).await;

        assert!(!result.observed_any());
        assert_eq!(registry.get(I2C1), Some(CheckStatus::NoMessage));
        assert_eq!(registry.get(I2C2), Some(CheckStatus::NoMessage));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_psense_silence_is_fail() {
        let dir = tempfile::tempdir().unwrap();
        let rig = MockRig::new()
            .with_streams(ScriptedStreamSource::repeating(lines(&["AP: Psense Voltage: 5.5 V"])));
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        run_capture(
            &fixture,
            &mut registry,
            dir.path(),
            CaptureStep::psense_standalone(&fixture),
        )
        .await;

        assert_eq!(registry.get(PSENSE_VOLTAGE), Some(CheckStatus::Pass));
        assert_eq!(registry.get(PSENSE_CURRENT), Some(CheckStatus::Fail));
        assert_eq!(registry.get(PSENSE_OVERALL), Some(CheckStatus::Fail));
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_prompt_and_silence() {
        let dir = tempfile::tempdir().unwrap();
        let rig = MockRig::new().with_streams(ScriptedStreamSource::repeating(vec![
            ScriptStep::Stall,
        ]));
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        let started = tokio::time::Instant::now();
        run_capture(&fixture, &mut registry, dir.path(), CaptureStep::radio(&fixture)).await;

        assert_eq!(registry.get(RADIO), Some(CheckStatus::Fail));
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(rig.operator.prompts(), vec![SAFETY_SWITCH_PROMPT.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_unavailable_fails_owned_checks() {
        let dir = tempfile::tempdir().unwrap();
        let rig = MockRig::new().with_streams(ScriptedStreamSource::unavailable());
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        run_capture(&fixture, &mut registry, dir.path(), CaptureStep::adc(&fixture)).await;

        assert_eq!(registry.get("ADC"), Some(CheckStatus::Fail));
    }
}
