//! Session commands - full unit test and stand-alone power sense

use anyhow::{Context, Result};
use fixture_probe::classify::PSENSE_OVERALL;
use fixture_session::{Orchestrator, SessionError, SessionOutcome};

use crate::operator::ConsoleOperator;
use crate::output::OutputContext;

const SCAN_PROMPT: &str = "Scan the unit QR code (empty line to quit):";

/// Test one unit, or keep scanning units when `repeat` is set
pub async fn run(
    orchestrator: &mut Orchestrator,
    console: &ConsoleOperator,
    unit: Option<&str>,
    repeat: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let mut next = unit.map(String::from);
    loop {
        let unit_id = match next.take() {
            Some(unit_id) => unit_id,
            None => console.ask(SCAN_PROMPT).await.unwrap_or_default(),
        };
        if unit_id.is_empty() {
            break;
        }

        ctx.info(&format!("Testing unit {}...", unit_id));
        match orchestrator.run_session(&unit_id).await {
            Ok(outcome) => report(&outcome, ctx),
            Err(SessionError::DeviceUnavailable(e)) => {
                ctx.error(&format!("Aborted: {}. Check the USB cable and power.", e));
            }
            Err(e) => return Err(e).with_context(|| format!("Session for {} failed", unit_id)),
        }

        if !repeat {
            break;
        }
    }
    Ok(())
}

fn report(outcome: &SessionOutcome, ctx: &OutputContext) {
    let session = &outcome.session;
    ctx.print_results(&session.registry.snapshot());
    ctx.info(&format!("Firmware: {}", session.final_firmware_version));
    ctx.info(&format!("Artifacts: {}", session.artifact_dir.display()));
    if !outcome.report_rendered {
        ctx.warn("Report rendering failed; test_results.json is kept for a re-run");
    }
    ctx.verdict(&session.unit_id, outcome.success());
}

/// Power-sense check on its own
pub async fn psense(orchestrator: &Orchestrator, ctx: &OutputContext) -> Result<()> {
    let snapshot = orchestrator
        .psense_only()
        .await
        .context("Power sense check failed")?;

    ctx.print_results(&snapshot);
    match snapshot.get(PSENSE_OVERALL) {
        Some(status) if status.is_pass() => ctx.success("Power sense PASSED"),
        _ => ctx.error("Power sense FAILED"),
    }
    Ok(())
}
