//! Firmware upload

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::error::FlashError;

/// Loads a firmware image onto the attached unit
#[async_trait]
pub trait FirmwareFlasher: Send + Sync {
    /// Returns once the upload tool has exited successfully
    async fn flash(&self, image: &Path) -> Result<(), FlashError>;
}

/// Runs `<uploader> --force <image>` from the firmware directory
#[derive(Debug, Clone)]
pub struct UploaderProcess {
    program: PathBuf,
    workdir: PathBuf,
}

impl UploaderProcess {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl FirmwareFlasher for UploaderProcess {
    #[instrument(skip(self), fields(uploader = %self.program.display()))]
    async fn flash(&self, image: &Path) -> Result<(), FlashError> {
        // The uploader runs from the firmware directory, so relative paths
        // must be pinned first.
        let image = std::fs::canonicalize(image)
            .map_err(|_| FlashError::ImageMissing(image.display().to_string()))?;
        let program = std::fs::canonicalize(&self.program).unwrap_or_else(|_| self.program.clone());

        info!(image = %image.display(), "Uploading firmware");
        let status = Command::new(&program)
            .arg("--force")
            .arg(&image)
            .current_dir(&self.workdir)
            .status()
            .await
            .map_err(|source| FlashError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        if !status.success() {
            warn!(%status, "Uploader failed");
            return Err(FlashError::Exit(status.to_string()));
        }
        info!("Firmware upload complete");
        Ok(())
    }
}

type FlashHook = Box<dyn Fn(&Path) + Send + Sync>;

/// Records uploads instead of running a tool
#[derive(Default)]
pub struct RecordingFlasher {
    flashed: Mutex<Vec<PathBuf>>,
    fail: bool,
    hook: Option<FlashHook>,
}

impl RecordingFlasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload fails with a non-zero exit
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Run `hook` after each successful upload
    pub fn with_hook(hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Default::default()
        }
    }

    pub fn flashed(&self) -> Vec<PathBuf> {
        self.flashed.lock().clone()
    }
}

#[async_trait]
impl FirmwareFlasher for RecordingFlasher {
    async fn flash(&self, image: &Path) -> Result<(), FlashError> {
        self.flashed.lock().push(image.to_path_buf());
        if self.fail {
            return Err(FlashError::Exit("exit status: 1".to_string()));
        }
        if let Some(hook) = &self.hook {
            hook(image);
        }
        Ok(())
    }
}
