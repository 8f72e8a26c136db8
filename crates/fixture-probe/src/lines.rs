//! Line-oriented output streams
//!
//! The telemetry companion (MAVProxy) prints the device's status text as
//! plain lines on stdout; capture steps read those lines through
//! [`LineSource`]. [`ScriptedLines`] replays recorded lines for tests.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::LinkError;

/// A stream of text lines
///
/// `next_line` must be cancel safe: capture loops race it against deadlines.
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or `None` once the stream is closed
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;

    /// Release the underlying process or transport
    async fn close(&mut self) {}
}

/// Opens a fresh line stream onto the device's telemetry port
#[async_trait]
pub trait LineStreamSource: Send + Sync {
    async fn open(&self, address: &str) -> Result<Box<dyn LineSource>, LinkError>;
}

// =============================================================================
// Process-backed streams
// =============================================================================

/// Lines read from a child process's stdout
pub struct ProcessLines {
    child: Child,
    // Held open so the companion never sees EOF on its console input.
    _stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ProcessLines {
    /// Spawn `command` with piped stdio
    pub fn spawn(mut command: Command) -> std::io::Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout not captured")
        })?;
        let stdin = child.stdin.take();

        Ok(Self {
            child,
            _stdin: stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl LineSource for ProcessLines {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Child process already gone");
        }
    }
}

/// Launches the telemetry companion console against a serial port
///
/// Equivalent to `mavproxy.py --master=<port> --baudrate=<baud> --aircraft <name>`.
#[derive(Debug, Clone)]
pub struct CompanionStream {
    program: String,
    baud: u32,
    aircraft: String,
}

impl CompanionStream {
    pub fn new(program: impl Into<String>, baud: u32, aircraft: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            baud,
            aircraft: aircraft.into(),
        }
    }

    /// Arguments passed to the companion for `address`
    pub fn args(&self, address: &str) -> Vec<String> {
        vec![
            format!("--master={}", address),
            format!("--baudrate={}", self.baud),
            "--aircraft".to_string(),
            self.aircraft.clone(),
        ]
    }

    /// Single shell command line, for running the companion on the device
    pub fn command_line(&self, address: &str) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args(address));
        parts.join(" ")
    }
}

#[async_trait]
impl LineStreamSource for CompanionStream {
    async fn open(&self, address: &str) -> Result<Box<dyn LineSource>, LinkError> {
        let mut command = Command::new(&self.program);
        command.args(self.args(address));

        info!(program = %self.program, %address, baud = self.baud, "Starting telemetry companion");
        let lines = ProcessLines::spawn(command).map_err(|e| {
            LinkError::Companion(format!("failed to start {}: {}", self.program, e))
        })?;
        Ok(Box::new(lines))
    }
}

// =============================================================================
// Scripted streams (testing)
// =============================================================================

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a line
    Line(String),
    /// Wait before continuing
    Delay(Duration),
    /// Never produce anything again (stream stays open)
    Stall,
}

impl ScriptStep {
    pub fn line(text: &str) -> Self {
        ScriptStep::Line(text.to_string())
    }
}

/// Replays a fixed script; EOF once the script is exhausted
#[derive(Debug, Default)]
pub struct ScriptedLines {
    steps: VecDeque<ScriptStep>,
}

impl ScriptedLines {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    /// Emit `lines` back to back, then EOF
    pub fn from_lines(lines: &[&str]) -> Self {
        Self::new(lines.iter().map(|l| ScriptStep::line(l)).collect())
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        // Steps are only consumed once they complete, so a cancelled delay
        // is replayed in full on the next call.
        loop {
            match self.steps.front().cloned() {
                None => return Ok(None),
                Some(ScriptStep::Line(line)) => {
                    self.steps.pop_front();
                    return Ok(Some(line));
                }
                Some(ScriptStep::Delay(d)) => {
                    tokio::time::sleep(d).await;
                    self.steps.pop_front();
                }
                Some(ScriptStep::Stall) => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.steps.clear();
    }
}

/// Hands out scripted streams in place of the companion process
#[derive(Debug, Default)]
pub struct ScriptedStreamSource {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    fallback: Option<Vec<ScriptStep>>,
    opened: AtomicUsize,
}

impl ScriptedStreamSource {
    /// Every open returns the same script
    pub fn repeating(steps: Vec<ScriptStep>) -> Self {
        Self {
            fallback: Some(steps),
            ..Default::default()
        }
    }

    /// Opens return the scripts in order, then fail
    pub fn sequence(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    /// Every open fails
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LineStreamSource for ScriptedStreamSource {
    async fn open(&self, address: &str) -> Result<Box<dyn LineSource>, LinkError> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone());

        match script {
            Some(steps) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                debug!(%address, steps = steps.len(), "Scripted stream opened");
                Ok(Box::new(ScriptedLines::new(steps)))
            }
            None => {
                warn!(%address, "No scripted stream available");
                Err(LinkError::Companion("no scripted stream".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_lines_then_eof() {
        let mut lines = ScriptedLines::from_lines(&["a", "b"]);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_delay_survives_cancellation() {
        let mut lines = ScriptedLines::new(vec![
            ScriptStep::Delay(Duration::from_secs(5)),
            ScriptStep::line("late"),
        ]);

        let early = tokio::time::timeout(Duration::from_secs(1), lines.next_line()).await;
        assert!(early.is_err());

        let line = lines.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_sequence_source_runs_dry() {
        let source = ScriptedStreamSource::sequence(vec![vec![ScriptStep::line("x")]]);
        assert!(source.open("/dev/ttyACM0").await.is_ok());
        assert!(source.open("/dev/ttyACM0").await.is_err());
        assert_eq!(source.open_count(), 1);
    }

    #[test]
    fn test_companion_args() {
        let companion = CompanionStream::new("mavproxy.py", 921_600, "MyCopter");
        assert_eq!(
            companion.args("/dev/ttyACM0"),
            vec![
                "--master=/dev/ttyACM0",
                "--baudrate=921600",
                "--aircraft",
                "MyCopter"
            ]
        );
        assert_eq!(
            companion.command_line("/dev/ttyHS2"),
            "mavproxy.py --master=/dev/ttyHS2 --baudrate=921600 --aircraft MyCopter"
        );
    }
}
