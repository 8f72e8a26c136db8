//! Firmware commands - flashing, version query and reboot

use anyhow::{Context, Result};
use fixture_core::FirmwareIdentity;
use fixture_session::Orchestrator;

use super::spinner;
use crate::output::OutputContext;

fn print_identity(identity: &FirmwareIdentity, ctx: &OutputContext) {
    ctx.print_kv(&[
        ("Vehicle", identity.vehicle.to_string()),
        ("Firmware version", identity.version.to_string()),
    ]);
}

/// Load the test image
pub async fn flash_test(orchestrator: &Orchestrator, ctx: &OutputContext) -> Result<()> {
    let pb = spinner("Uploading test firmware...");
    let result = orchestrator.flash_test().await;
    pb.finish_and_clear();

    let identity = result.context("Test firmware flash failed")?;
    ctx.success("Test firmware loaded");
    print_identity(&identity, ctx);
    Ok(())
}

/// Load the release image and re-check the serial line it relies on
pub async fn flash_release(orchestrator: &Orchestrator, ctx: &OutputContext) -> Result<()> {
    let pb = spinner("Uploading release firmware...");
    let result = orchestrator.flash_release().await;
    pb.finish_and_clear();

    let check = result.context("Release firmware flash failed")?;
    match &check.firmware {
        Ok(identity) => print_identity(identity, ctx),
        Err(e) => ctx.error(&format!("Could not read firmware version: {}", e)),
    }
    match check.serial {
        Some((name, status)) if status.is_pass() => ctx.success(&format!("{}: {}", name, status)),
        Some((name, status)) => ctx.error(&format!("{}: {}", name, status)),
        None => ctx.warn("No serial line configured for re-verification"),
    }
    Ok(())
}

/// Print the running firmware
pub async fn version(orchestrator: &Orchestrator, ctx: &OutputContext) -> Result<()> {
    let identity = orchestrator
        .firmware_version()
        .await
        .context("Failed to read firmware version")?;
    print_identity(&identity, ctx);
    Ok(())
}

/// Reboot the unit and wait for it to settle
pub async fn reboot(orchestrator: &Orchestrator, ctx: &OutputContext) -> Result<()> {
    let pb = spinner("Rebooting flight controller...");
    let result = orchestrator.reboot().await;
    pb.finish_and_clear();

    result.context("Reboot failed")?;
    ctx.success("Flight controller rebooted");
    Ok(())
}
