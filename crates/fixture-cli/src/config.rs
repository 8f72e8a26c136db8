//! Configuration file handling for fc-fixture

use anyhow::{Context, Result};
use fixture_session::FixtureConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Console preferences kept in the `[cli]` table of the fixture config
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliPrefs {
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CliSection {
    #[serde(default)]
    cli: CliPrefs,
}

/// Everything read from the config file
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cli: CliPrefs,
    pub fixture: FixtureConfig,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let section: CliSection = toml::from_str(content)?;
        let fixture = FixtureConfig::from_toml_str(content)?;
        Ok(Self {
            cli: section.cli,
            fixture,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("fc-fixture");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, output: Option<&str>, no_color: bool) -> MergedConfig {
        MergedConfig {
            output: output
                .map(String::from)
                .or_else(|| self.cli.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: no_color || self.cli.no_color.unwrap_or(false),
        }
    }

    /// Fixture configuration with a relative artifact root anchored on the desktop
    pub fn resolved_fixture(&self) -> FixtureConfig {
        let mut fixture = self.fixture.clone();
        fixture.paths.artifact_root = resolve_artifact_root(&fixture.paths.artifact_root);
        fixture
    }
}

/// Fully resolved console settings after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub output: String,
    pub no_color: bool,
}

/// Relative roots live under the desktop, or the home directory without one
pub fn resolve_artifact_root(root: &Path) -> PathBuf {
    if root.is_absolute() {
        return root.to_path_buf();
    }
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join(root))
        .unwrap_or_else(|| root.to_path_buf())
}
