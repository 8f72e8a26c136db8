//! Config command - print the effective fixture configuration

use anyhow::{Context, Result};
use fixture_session::FixtureConfig;

use crate::output::{OutputContext, OutputFormat};

pub fn show_config(config: &FixtureConfig, ctx: &OutputContext) -> Result<()> {
    let text = match ctx.format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?
        }
        _ => toml::to_string_pretty(config).context("Failed to serialize configuration")?,
    };
    println!("{}", text);
    Ok(())
}
