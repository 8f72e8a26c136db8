//! Serial line checks through the on-board shell

use fixture_core::{CheckStatus, StatusRegistry};
use fixture_probe::{ShellError, ShellProbe, ShellSession};
use tracing::{info, instrument, warn};

use crate::config::SerialLineConfig;
use crate::fixture::Fixture;

/// Route the mux to `line`, run link detection on it and record the result
#[instrument(skip_all, fields(line = line.number, device = %line.device))]
pub async fn run_serial_line(
    fixture: &Fixture,
    registry: &mut StatusRegistry,
    line: &SerialLineConfig,
) -> CheckStatus {
    let name = line.check_name();
    registry.set(&name, CheckStatus::Pending);

    let status = match fixture.shell.open().await {
        Ok(mut session) => {
            let status = detect(fixture, &mut session, line).await;
            fixture.shell.terminate(session).await;
            status
        }
        Err(e) => {
            warn!(error = %e, "No shell for serial check");
            CheckStatus::Fail
        }
    };

    info!(check = %name, %status, "Serial line checked");
    registry.set(&name, status);
    status
}

async fn detect(
    fixture: &Fixture,
    session: &mut ShellSession,
    line: &SerialLineConfig,
) -> CheckStatus {
    if let Some(mux) = &line.mux {
        let pins = &fixture.config.serial_lines.mux_pins;
        if let Err(e) = route_mux(&fixture.shell, session, pins, mux).await {
            warn!(error = %e, "Could not route serial mux");
            return CheckStatus::Fail;
        }
    }
    fixture
        .shell
        .detect_line_traffic(session, &line.device, fixture.config.timing.serial_detect())
        .await
}

/// Drive each mux pin to its value
pub(crate) async fn route_mux(
    shell: &ShellProbe,
    session: &mut ShellSession,
    pins: &[u32],
    values: &[u8],
) -> Result<(), ShellError> {
    for (pin, value) in pins.iter().zip(values) {
        shell.configure_gpio(session, *pin, *value).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRig;
    use fixture_probe::shell::mock::{ConnectOutcome, MockShellConnector};
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_muxed_line_detected() {
        let shells = MockShellConnector::healthy();
        shells.respond("--master=/dev/ttyHS2", &["Detected vehicle 1:1 on link 0"]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let line = fixture.config.serial_line(4).unwrap().clone();
        let mut registry = StatusRegistry::new();

        let status = run_serial_line(&fixture, &mut registry, &line).await;

        assert_eq!(status, CheckStatus::Pass);
        assert_eq!(registry.get("Serial 4"), Some(CheckStatus::Pass));
        let commands = rig.shells.commands();
        assert!(commands[0].ends_with("echo 1 > /sys/class/gpio/gpio442/value"));
        assert!(commands[1].ends_with("echo 0 > /sys/class/gpio/gpio464/value"));
        assert!(commands[2].contains("--master=/dev/ttyHS2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_line_skips_mux() {
        let shells = MockShellConnector::healthy();
        shells.respond("--master=/dev/ttyHS1", &["link 1 down"]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let line = fixture.config.serial_line(2).unwrap().clone();
        let mut registry = StatusRegistry::new();

        let status = run_serial_line(&fixture, &mut registry, &line).await;

        assert_eq!(status, CheckStatus::Fail);
        assert_eq!(rig.shells.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_shell_is_fail() {
        let shells = MockShellConnector::with_outcomes(vec![ConnectOutcome::Refuse; 3]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let line = fixture.config.serial_line(1).unwrap().clone();
        let mut registry = StatusRegistry::new();

        run_serial_line(&fixture, &mut registry, &line).await;

        assert_eq!(registry.get("Serial 1"), Some(CheckStatus::Fail));
        assert_eq!(rig.shells.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_broken_after_reconnect_is_fail() {
        let rig = MockRig::new().with_shells(MockShellConnector::always(ConnectOutcome::Broken));
        let fixture = rig.fixture().unwrap();
        let line = fixture.config.serial_line(3).unwrap().clone();
        let mut registry = StatusRegistry::new();

        let status = run_serial_line(&fixture, &mut registry, &line).await;

        assert_eq!(status, CheckStatus::Fail);
        assert_eq!(registry.get("Serial 3"), Some(CheckStatus::Fail));
        // First session plus exactly one replacement
        assert_eq!(rig.shells.connect_count(), 2);
        assert!(rig.shells.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_line_broken_after_reconnect_is_fail() {
        let rig = MockRig::new().with_shells(MockShellConnector::always(ConnectOutcome::Broken));
        let fixture = rig.fixture().unwrap();
        let line = fixture.config.serial_line(2).unwrap().clone();
        let mut registry = StatusRegistry::new();

        let started = tokio::time::Instant::now();
        run_serial_line(&fixture, &mut registry, &line).await;

        assert_eq!(registry.get("Serial 2"), Some(CheckStatus::Fail));
        assert_eq!(rig.shells.connect_count(), 2);
        assert!(started.elapsed() < fixture.config.timing.serial_detect());
    }
}
