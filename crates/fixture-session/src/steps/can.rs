//! CAN bus checks

use fixture_core::{CheckStatus, StatusRegistry};
use fixture_probe::ShellSession;
use tracing::{info, instrument, warn};

use super::serial::route_mux;
use crate::config::CanBusConfig;
use crate::fixture::Fixture;

/// Route the transceiver mux to `bus`, bring the interface up and listen
#[instrument(skip_all, fields(bus = bus.number))]
pub async fn run_can_bus(
    fixture: &Fixture,
    registry: &mut StatusRegistry,
    bus: &CanBusConfig,
) -> CheckStatus {
    let name = bus.check_name();
    registry.set(&name, CheckStatus::Pending);

    let status = match fixture.shell.open().await {
        Ok(mut session) => {
            let status = listen(fixture, &mut session, bus).await;
            fixture.shell.terminate(session).await;
            status
        }
        Err(e) => {
            warn!(error = %e, "No shell for CAN check");
            CheckStatus::Fail
        }
    };

    info!(check = %name, %status, "CAN bus checked");
    registry.set(&name, status);
    status
}

async fn listen(fixture: &Fixture, session: &mut ShellSession, bus: &CanBusConfig) -> CheckStatus {
    let pins = &fixture.config.can_buses.mux_pins;
    if let Err(e) = route_mux(&fixture.shell, session, pins, &bus.mux).await {
        warn!(error = %e, "Could not route CAN mux");
        return CheckStatus::Fail;
    }
    if let Err(e) = fixture.shell.configure_can_interface(session).await {
        warn!(error = %e, "Could not configure CAN interface");
        return CheckStatus::Fail;
    }
    fixture
        .shell
        .listen_for_bus_traffic(session, fixture.config.timing.can_listen())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRig;
    use fixture_probe::shell::mock::{ConnectOutcome, MockShellConnector};
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_bus_with_traffic_passes() {
        let shells = MockShellConnector::healthy();
        shells.respond("candump can0", &["  can0  18FEF100   [8]  01 02 03 04 05 06 07 08"]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let bus = fixture.config.can_buses.buses[0].clone();
        let mut registry = StatusRegistry::new();

        let status = run_can_bus(&fixture, &mut registry, &bus).await;

        assert_eq!(status, CheckStatus::Pass);
        assert_eq!(registry.get("CAN 1"), Some(CheckStatus::Pass));
        let commands = rig.shells.commands();
        assert_eq!(commands.len(), 4);
        assert!(commands[0].ends_with("echo 1 > /sys/class/gpio/gpio370/value"));
        assert!(commands[2].contains("bitrate 1000000"));
        assert_eq!(commands[3], "candump can0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_bus_fails_after_window() {
        let rig = MockRig::new();
        let fixture = rig.fixture().unwrap();
        let bus = fixture.config.can_buses.buses[1].clone();
        let mut registry = StatusRegistry::new();

        let started = tokio::time::Instant::now();
        run_can_bus(&fixture, &mut registry, &bus).await;

        assert_eq!(registry.get("CAN 2"), Some(CheckStatus::Fail));
        assert!(started.elapsed() >= fixture.config.timing.can_listen());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_channel_recovers_once() {
        let shells = MockShellConnector::with_outcomes(vec![ConnectOutcome::Broken]);
        shells.respond("candump can0", &["can0  123   [2]  DE AD"]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let bus = fixture.config.can_buses.buses[0].clone();
        let mut registry = StatusRegistry::new();

        let status = run_can_bus(&fixture, &mut registry, &bus).await;

        assert_eq!(status, CheckStatus::Pass);
        assert_eq!(rig.shells.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_broken_after_reconnect_is_fail() {
        let shells = MockShellConnector::always(ConnectOutcome::Broken);
        shells.respond("candump can0", &["can0  123   [2]  DE AD"]);
        let rig = MockRig::new().with_shells(shells);
        let fixture = rig.fixture().unwrap();
        let bus = fixture.config.can_buses.buses[1].clone();
        let mut registry = StatusRegistry::new();

        let started = tokio::time::Instant::now();
        let status = run_can_bus(&fixture, &mut registry, &bus).await;

        assert_eq!(status, CheckStatus::Fail);
        assert_eq!(registry.get("CAN 2"), Some(CheckStatus::Fail));
        assert_eq!(rig.shells.connect_count(), 2);
        assert!(rig.shells.commands().is_empty());
        assert!(started.elapsed() < fixture.config.timing.can_listen());
    }
}
