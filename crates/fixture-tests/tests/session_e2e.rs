//! Full-session tests against the in-memory rig
//!
//! Run with: cargo test -p fixture-tests --test session_e2e

use std::path::Path;
use std::time::Duration;

use fixture_core::{CheckStatus, TestRecord, FAILED_FIRMWARE_PLACEHOLDER};
use fixture_probe::classify::{ADC, I2C1, I2C2, PSENSE_OVERALL, RADIO};
use fixture_probe::shell::mock::{ConnectOutcome, MockShellConnector};
use fixture_probe::{ScriptStep, ScriptedStreamSource};
use fixture_session::report::{RESULTS_FILE, SUMMARY_FILE};
use fixture_session::testing::MockRig;
use fixture_session::{
    Orchestrator, Phase, RecordingFlasher, RecordingRenderer, SessionError,
};
use pretty_assertions::assert_eq;

// =============================================================================
// Scripted unit
// =============================================================================

const FRAME: &str = "can0  18FEF100   [8]  01 02 03 04 05 06 07 08";

fn lines(lines: &[&str]) -> Vec<ScriptStep> {
    lines.iter().map(|l| ScriptStep::line(l)).collect()
}

fn radio_stream() -> Vec<ScriptStep> {
    lines(&["Detected vehicle 1:1 on link 0", "AP: Radio Connected"])
}

fn psense_stream() -> Vec<ScriptStep> {
    lines(&["AP: Psense Voltage: 5.20 V", "AP: Psense Current: 2.50 A"])
}

fn adc_stream() -> Vec<ScriptStep> {
    lines(&["AP: Rangefinder Distance: 15.0 cm"])
}

fn i2c_stream() -> Vec<ScriptStep> {
    lines(&["AP: I2C1: OK", "AP: I2C2: OK"])
}

/// Every check the default fixture runs, in report order
const ALL_CHECKS: [&str; 17] = [
    "MAIN OUT 1-4",
    "MAIN OUT 5-8",
    "AUX OUT 1-6",
    RADIO,
    "Serial 1",
    "Serial 2",
    "Serial 3",
    "Serial 4",
    "Serial 5",
    "CAN 1",
    "CAN 2",
    "Psense Voltage",
    "Psense Current",
    PSENSE_OVERALL,
    ADC,
    I2C1,
    I2C2,
];

fn read_record(path: &Path) -> TestRecord {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn healthy_shell() -> MockShellConnector {
    let shells = MockShellConnector::healthy();
    shells.respond("--master=/dev/ttyHS", &["Detected vehicle 1:1 on link 0"]);
    shells.respond("candump can0", &[FRAME]);
    shells
}

/// Unit on which every check passes
fn passing_rig(root: &Path) -> MockRig {
    MockRig::new()
        .with_artifact_root(root)
        .with_shells(healthy_shell())
        .with_streams(ScriptedStreamSource::sequence(vec![
            radio_stream(),
            psense_stream(),
            adc_stream(),
            i2c_stream(),
        ]))
}

// =============================================================================
// Pass and fail paths
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_passing_unit_gets_release_firmware() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-100").await.unwrap();

    let snapshot = outcome.session.registry.snapshot();
    assert!(snapshot.all_pass(), "failures: {:?}", snapshot.failures());
    assert!(outcome.success());
    assert_eq!(outcome.session.final_firmware_version, "official-4.5.2");
    assert_eq!(
        rig.flasher.flashed(),
        vec![
            rig.config.paths.test_image_path(),
            rig.config.paths.release_image_path()
        ]
    );
    assert!(orchestrator.history().contains(&Phase::PassPath));
    assert_eq!(orchestrator.phase(), Phase::Done);

    let names = snapshot.names();
    assert_eq!(
        &names[..4],
        &["MAIN OUT 1-4", "MAIN OUT 5-8", "AUX OUT 1-6", RADIO]
    );
    for check in ["Serial 1", "Serial 5", "CAN 1", "CAN 2", PSENSE_OVERALL, ADC, I2C1, I2C2] {
        assert_eq!(snapshot.get(check), Some(CheckStatus::Pass), "{}", check);
    }
}

#[tokio::test(start_paused = true)]
async fn test_release_flash_rechecks_serial_line() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    orchestrator.run_session("CUBE-101").await.unwrap();

    let detections: Vec<String> = rig
        .shells
        .commands()
        .into_iter()
        .filter(|c| c.contains("--master=/dev/ttyHS1"))
        .collect();
    assert_eq!(detections.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_leds_fail_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path()).with_answers(vec![Some(true), Some(false), Some(true)]);
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-102").await.unwrap();

    assert!(!outcome.success());
    assert_eq!(
        outcome.session.registry.get("MAIN OUT 5-8"),
        Some(CheckStatus::Fail)
    );
    assert_eq!(outcome.session.final_firmware_version, FAILED_FIRMWARE_PLACEHOLDER);
    assert_eq!(rig.flasher.flashed(), vec![rig.config.paths.test_image_path()]);
    assert!(orchestrator.history().contains(&Phase::FailPath));
    assert!(rig.link.params().iter().all(|(_, v)| *v == 136 || *v == 0));
}

#[tokio::test(start_paused = true)]
async fn test_missing_unit_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let rig = MockRig::no_device().with_artifact_root(dir.path());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let result = orchestrator.run_session("CUBE-103").await;

    assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
    assert_eq!(orchestrator.phase(), Phase::Abort);
    assert!(rig.shells.commands().is_empty());
}

// =============================================================================
// Silence and transport faults
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_i2c_eof_recorded_as_no_message() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path()).with_streams(ScriptedStreamSource::sequence(vec![
        radio_stream(),
        psense_stream(),
        adc_stream(),
        vec![ScriptStep::Delay(Duration::from_secs(2))],
    ]));
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-104").await.unwrap();

    let registry = &outcome.session.registry;
    assert_eq!(registry.get(I2C1), Some(CheckStatus::NoMessage));
    assert_eq!(registry.get(I2C2), Some(CheckStatus::NoMessage));
    assert!(!outcome.success());
}

#[tokio::test(start_paused = true)]
async fn test_silent_radio_fails_after_window() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path()).with_streams(ScriptedStreamSource::sequence(vec![
        vec![ScriptStep::Stall],
        psense_stream(),
        adc_stream(),
        i2c_stream(),
    ]));
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-105").await.unwrap();

    assert_eq!(outcome.session.registry.get(RADIO), Some(CheckStatus::Fail));
    assert_eq!(outcome.session.registry.get(ADC), Some(CheckStatus::Pass));
}

#[tokio::test(start_paused = true)]
async fn test_broken_shell_channel_recovers_once() {
    let dir = tempfile::tempdir().unwrap();
    let shells = MockShellConnector::with_outcomes(vec![ConnectOutcome::Broken]);
    shells.respond("--master=/dev/ttyHS", &["Detected vehicle 1:1 on link 0"]);
    shells.respond("candump can0", &[FRAME]);
    let rig = passing_rig(dir.path()).with_shells(shells);
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-106").await.unwrap();

    assert_eq!(
        outcome.session.registry.get("Serial 1"),
        Some(CheckStatus::Pass)
    );
    assert!(outcome.success());
    // Five serial lines, two CAN buses, one re-verify, one reconnect
    assert_eq!(rig.shells.connect_count(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_dead_shell_fails_only_shell_checks() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path())
        .with_shells(MockShellConnector::always(ConnectOutcome::Broken));
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-109").await.unwrap();

    let record = read_record(&outcome.results_path);
    let recorded: Vec<(&str, CheckStatus)> = record
        .test_results
        .iter()
        .map(|r| (r.step_description.as_str(), r.step_status))
        .collect();
    let expected: Vec<(&str, CheckStatus)> = ALL_CHECKS
        .iter()
        .map(|&name| {
            let shell_check = name.starts_with("Serial") || name.starts_with("CAN");
            (name, CheckStatus::from_pass(!shell_check))
        })
        .collect();
    assert_eq!(recorded, expected);

    // Later phases still ran after the shell checks failed
    assert!(orchestrator.history().contains(&Phase::I2c));
    assert!(orchestrator.history().contains(&Phase::FailPath));
    assert_eq!(record.final_firmware_version, FAILED_FIRMWARE_PLACEHOLDER);
    // Seven shell checks, each with one session and one replacement
    assert_eq!(rig.shells.connect_count(), 14);
}

#[tokio::test(start_paused = true)]
async fn test_dead_unit_still_reports_every_check() {
    let dir = tempfile::tempdir().unwrap();
    let rig = MockRig::silent()
        .with_artifact_root(dir.path())
        .with_shells(MockShellConnector::always(ConnectOutcome::Broken))
        .with_streams(ScriptedStreamSource::repeating(vec![ScriptStep::Stall]));
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-110").await.unwrap();

    assert!(!outcome.success());
    let record = read_record(&outcome.results_path);
    let names: Vec<&str> = record
        .test_results
        .iter()
        .map(|r| r.step_description.as_str())
        .collect();
    assert_eq!(names, ALL_CHECKS.to_vec());

    for entry in &record.test_results {
        let expected = match entry.step_description.as_str() {
            "Psense Voltage" | "Psense Current" | ADC | I2C1 | I2C2 => CheckStatus::NoMessage,
            _ => CheckStatus::Fail,
        };
        assert_eq!(entry.step_status, expected, "{}", entry.step_description);
    }
    assert_eq!(record.final_firmware_version, FAILED_FIRMWARE_PLACEHOLDER);
}

#[tokio::test(start_paused = true)]
async fn test_release_flash_failure_fails_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path()).with_flasher(RecordingFlasher::failing());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-111").await.unwrap();

    assert!(outcome.session.registry.snapshot().all_pass());
    assert!(!outcome.success());
    assert_eq!(rig.flasher.flashed().len(), 2);
    // The unit still runs the test image
    assert_eq!(outcome.session.final_firmware_version, "dev-4.6.0");
}

// =============================================================================
// Artifacts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_results_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-107").await.unwrap();

    let artifact_dir = &outcome.session.artifact_dir;
    assert!(artifact_dir.starts_with(dir.path()));
    assert!(artifact_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("CUBE-107_"));
    assert_eq!(outcome.results_path, artifact_dir.join(RESULTS_FILE));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&outcome.results_path).unwrap()).unwrap();
    assert_eq!(json["qr_code"], "CUBE-107");
    assert_eq!(json["final_firmware_version"], "official-4.5.2");
    let results = json["test_results"].as_array().unwrap();
    assert_eq!(results.len(), outcome.session.registry.len());
    assert_eq!(results[0]["step_description"], "MAIN OUT 1-4");
    assert_eq!(results[0]["step_status"], "PASS");

    let summary = std::fs::read_to_string(artifact_dir.join(SUMMARY_FILE)).unwrap();
    assert!(summary.starts_with("Date and Time: "));
    assert!(summary.contains("QR Code: CUBE-107"));

    assert!(artifact_dir.join("mavproxy_psense_logs.txt").exists());
    assert_eq!(
        rig.renderer.calls(),
        vec![(outcome.results_path.clone(), rig.config.paths.reference_image.clone())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_renderer_failure_keeps_results() {
    let dir = tempfile::tempdir().unwrap();
    let rig = passing_rig(dir.path()).with_renderer(RecordingRenderer::failing());
    let mut orchestrator = Orchestrator::new(rig.fixture().unwrap());

    let outcome = orchestrator.run_session("CUBE-108").await.unwrap();

    assert!(!outcome.report_rendered);
    assert!(outcome.success());
    assert!(outcome.results_path.exists());
}
