//! Bounded line capture
//!
//! One capture drains a [`LineSource`] for at most `deadline`, writes every
//! line verbatim to the step's log and feeds it through a
//! [`LineClassifier`]. The drain runs as its own task; the caller awaits it
//! with `deadline + CAPTURE_SLACK` as the upper bound and aborts it past
//! that point, so a stalled stream can never hold the session.
//!
//! While the task runs it owns every registry write. The registry is handed
//! back to the caller once the task has finished or been aborted.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fixture_core::{StatusRegistry, StatusUpdate};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::classify::LineClassifier;
use crate::error::CaptureError;
use crate::lines::LineSource;

/// Scheduling allowance on top of a capture deadline
pub const CAPTURE_SLACK: Duration = Duration::from_millis(500);

/// Parameters of one capture window
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// Short name used in logs
    pub label: String,
    pub deadline: Duration,
    /// Stop after this many lines
    pub max_lines: Option<usize>,
    /// Raw log artifact; parent directories are created as needed
    pub log_path: PathBuf,
}

impl CaptureSpec {
    pub fn new(label: impl Into<String>, deadline: Duration, log_path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            deadline,
            max_lines: None,
            log_path: log_path.into(),
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = Some(max_lines);
        self
    }
}

/// Outcome of one capture window
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    /// False when the deadline cut the capture short
    pub completed: bool,
    /// Lines read from the stream
    pub lines: usize,
    /// Lines the classifier recognised
    pub matched: usize,
    /// Registry transitions applied during the window
    pub updates: Vec<StatusUpdate>,
}

impl CaptureResult {
    /// Whether any test message was seen at all
    pub fn observed_any(&self) -> bool {
        self.matched > 0
    }
}

#[derive(Default)]
struct CaptureState {
    registry: StatusRegistry,
    lines: usize,
    matched: usize,
}

/// Runs capture windows
pub struct BoundedClassifier;

impl BoundedClassifier {
    /// Drain `source` into `registry` under `spec.deadline`
    ///
    /// Checks the classifier owns are not back-filled here; callers decide
    /// what silence means for their step.
    #[instrument(skip_all, fields(capture = %spec.label, deadline = ?spec.deadline))]
    pub async fn run(
        source: Box<dyn LineSource>,
        spec: &CaptureSpec,
        classifier: Arc<dyn LineClassifier>,
        registry: &mut StatusRegistry,
    ) -> Result<CaptureResult, CaptureError> {
        let log = open_log(&spec.log_path)?;

        classifier.prepare(registry);
        let mark = registry.mark();

        let state = Arc::new(Mutex::new(CaptureState {
            registry: std::mem::take(registry),
            ..Default::default()
        }));

        let deadline = Instant::now() + spec.deadline;
        let max_lines = spec.max_lines;
        let task_state = Arc::clone(&state);

        let mut handle = tokio::spawn(async move {
            let mut source = source;
            let mut log = log;
            let mut completed = true;

            loop {
                let next = match tokio::time::timeout_at(deadline, source.next_line()).await {
                    Ok(next) => next,
                    Err(_) => {
                        completed = false;
                        break;
                    }
                };

                let line = match next {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("Stream closed before deadline");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Stream read failed");
                        break;
                    }
                };

                if let Err(e) = writeln!(log, "{}", line) {
                    warn!(error = %e, "Failed to write capture log");
                }

                let stop = {
                    let mut state = task_state.lock();
                    state.lines += 1;
                    if classifier.classify(line.trim(), &mut state.registry) {
                        state.matched += 1;
                    }
                    classifier.is_complete(&state.registry)
                        || max_lines.is_some_and(|max| state.lines >= max)
                };
                if stop {
                    break;
                }
            }

            if let Err(e) = log.flush() {
                warn!(error = %e, "Failed to flush capture log");
            }
            (source, completed)
        });

        let completed = match tokio::time::timeout(spec.deadline + CAPTURE_SLACK, &mut handle).await
        {
            Ok(Ok((mut source, completed))) => {
                source.close().await;
                completed
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Capture task failed");
                false
            }
            Err(_) => {
                warn!("Capture task overran its deadline, aborting");
                handle.abort();
                // Dropping the task drops the source with it.
                let _ = handle.await;
                false
            }
        };

        let mut state = state.lock();
        *registry = std::mem::take(&mut state.registry);

        let result = CaptureResult {
            completed,
            lines: state.lines,
            matched: state.matched,
            updates: registry.updates_since(mark).to_vec(),
        };

        info!(
            completed = result.completed,
            lines = result.lines,
            matched = result.matched,
            "Capture finished"
        );
        Ok(result)
    }
}

fn open_log(path: &Path) -> Result<BufWriter<File>, CaptureError> {
    let err = |source| CaptureError::Log {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(err)?;
    }
    File::create(path).map(BufWriter::new).map_err(err)
}
