//! PWM output groups, confirmed by the operator watching the LED board

use std::ops::RangeInclusive;

use fixture_core::{CheckStatus, StatusRegistry};
use fixture_probe::DeviceLink;
use tracing::{info, instrument, warn};

use crate::fixture::Fixture;

/// SERVOn_FUNCTION value that drives an output at maximum PWM
pub const FUNCTION_MAX_OUTPUT: i32 = 136;
/// SERVOn_FUNCTION value that disables an output
pub const FUNCTION_DISABLED: i32 = 0;

pub const PWM_INTRO: &str = "Press Enter to proceed with the MAIN and AUX OUT tests";

/// A bank of outputs checked together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGroup {
    pub name: &'static str,
    pub channels: RangeInclusive<u8>,
}

pub const OUTPUT_GROUPS: [OutputGroup; 3] = [
    OutputGroup {
        name: "MAIN OUT 1-4",
        channels: 1..=4,
    },
    OutputGroup {
        name: "MAIN OUT 5-8",
        channels: 5..=8,
    },
    OutputGroup {
        name: "AUX OUT 1-6",
        channels: 9..=14,
    },
];

pub fn confirm_prompt(group: &OutputGroup) -> String {
    format!("Press y if the {} LEDs are glowing (y/n)", group.name)
}

/// Drive each group high, ask the operator, then disable it again
#[instrument(skip_all)]
pub async fn run_pwm_outputs(fixture: &Fixture, registry: &mut StatusRegistry) {
    fixture.operator.acknowledge(PWM_INTRO).await;

    let mut link = match fixture.telemetry.connect(fixture.config.telemetry.command_baud).await {
        Ok(link) => link,
        Err(e) => {
            warn!(error = %e, "No telemetry link for output tests");
            fail_all(registry);
            return;
        }
    };
    let timeout = fixture.telemetry.timing().heartbeat_timeout();
    if !fixture.telemetry.wait_heartbeat(&mut link, timeout).await {
        fail_all(registry);
        return;
    }

    for group in OUTPUT_GROUPS.iter() {
        registry.set(group.name, CheckStatus::Pending);
        let status = check_group(fixture, &link, group).await;
        restore_group(fixture, &link, group).await;
        info!(group = group.name, %status, "Output group checked");
        registry.set(group.name, status);
    }
}

async fn check_group(fixture: &Fixture, link: &DeviceLink, group: &OutputGroup) -> CheckStatus {
    for channel in group.channels.clone() {
        if let Err(e) = fixture
            .telemetry
            .set_output_function(link, channel, FUNCTION_MAX_OUTPUT)
            .await
        {
            warn!(group = group.name, channel, error = %e, "Could not drive output");
            return CheckStatus::Fail;
        }
    }

    let answer = fixture
        .operator
        .confirm(&confirm_prompt(group), fixture.config.timing.confirm())
        .await;
    match answer {
        Some(glowing) => CheckStatus::from_pass(glowing),
        None => {
            warn!(group = group.name, "No operator answer");
            CheckStatus::Fail
        }
    }
}

/// Every channel goes back to disabled, whatever the outcome
async fn restore_group(fixture: &Fixture, link: &DeviceLink, group: &OutputGroup) {
    for channel in group.channels.clone() {
        if let Err(e) = fixture
            .telemetry
            .set_output_function(link, channel, FUNCTION_DISABLED)
            .await
        {
            warn!(channel, error = %e, "Could not restore output");
        }
    }
}

fn fail_all(registry: &mut StatusRegistry) {
    for group in OUTPUT_GROUPS.iter() {
        registry.set(group.name, CheckStatus::Fail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRig;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_groups_confirmed_and_restored() {
        let rig = MockRig::new().with_answers(vec![Some(true), Some(false), None]);
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        run_pwm_outputs(&fixture, &mut registry).await;

        assert_eq!(registry.get("MAIN OUT 1-4"), Some(CheckStatus::Pass));
        assert_eq!(registry.get("MAIN OUT 5-8"), Some(CheckStatus::Fail));
        assert_eq!(registry.get("AUX OUT 1-6"), Some(CheckStatus::Fail));

        let params = rig.link.params();
        assert_eq!(params.len(), 28);
        assert_eq!(params[0], ("SERVO1_FUNCTION".to_string(), FUNCTION_MAX_OUTPUT));
        assert_eq!(params[4], ("SERVO1_FUNCTION".to_string(), FUNCTION_DISABLED));
        assert_eq!(params[27], ("SERVO14_FUNCTION".to_string(), FUNCTION_DISABLED));

        let prompts = rig.operator.prompts();
        assert_eq!(prompts[0], PWM_INTRO);
        assert_eq!(prompts[1], "Press y if the MAIN OUT 1-4 LEDs are glowing (y/n)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_unit_fails_every_group() {
        let rig = MockRig::silent();
        let fixture = rig.fixture().unwrap();
        let mut registry = StatusRegistry::new();

        run_pwm_outputs(&fixture, &mut registry).await;

        for group in OUTPUT_GROUPS.iter() {
            assert_eq!(registry.get(group.name), Some(CheckStatus::Fail));
        }
        assert!(rig.link.params().is_empty());
    }
}
