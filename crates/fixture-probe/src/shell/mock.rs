//! Mock shell for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{ShellChannel, ShellConnector};
use crate::error::ShellError;

/// What one `connect` call produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Working channel
    Healthy,
    /// Channel that looks alive but fails every write
    Broken,
    /// Connection attempt fails
    Refuse,
}

#[derive(Debug, Clone)]
struct Reply {
    trigger: String,
    lines: Vec<String>,
    close: bool,
}

/// Scriptable shell endpoint
///
/// Connect outcomes are consumed in order; once exhausted every connect is
/// healthy unless a standing outcome was set with [`Self::always`]. Output is produced by replies whose trigger is a substring of a
/// written command. Healthy channels with nothing queued never return from
/// `read_line`.
#[derive(Default)]
pub struct MockShellConnector {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    fallback: Option<ConnectOutcome>,
    replies: Arc<RwLock<Vec<Reply>>>,
    commands: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
}

impl MockShellConnector {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<ConnectOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }

    /// Every connect produces `outcome`
    pub fn always(outcome: ConnectOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Default::default()
        }
    }

    /// Queue `lines` whenever a command containing `trigger` is written
    pub fn respond(&self, trigger: &str, lines: &[&str]) {
        self.add_reply(trigger, lines, false);
    }

    /// Like [`Self::respond`], then close the channel's output
    pub fn respond_then_close(&self, trigger: &str, lines: &[&str]) {
        self.add_reply(trigger, lines, true);
    }

    fn add_reply(&self, trigger: &str, lines: &[&str], close: bool) {
        self.replies.write().push(Reply {
            trigger: trigger.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            close,
        });
    }

    /// Commands accepted by healthy channels, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellConnector for MockShellConnector {
    async fn connect(&self) -> Result<Box<dyn ShellChannel>, ShellError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .or(self.fallback)
            .unwrap_or(ConnectOutcome::Healthy);

        match outcome {
            ConnectOutcome::Refuse => Err(ShellError::ConnectFailed(
                "device not authorized".to_string(),
            )),
            ConnectOutcome::Healthy | ConnectOutcome::Broken => Ok(Box::new(MockShellChannel {
                broken: outcome == ConnectOutcome::Broken,
                replies: Arc::clone(&self.replies),
                commands: Arc::clone(&self.commands),
                output: VecDeque::new(),
                closed: false,
                terminated: false,
            })),
        }
    }
}

struct MockShellChannel {
    broken: bool,
    replies: Arc<RwLock<Vec<Reply>>>,
    commands: Arc<Mutex<Vec<String>>>,
    output: VecDeque<String>,
    closed: bool,
    terminated: bool,
}

#[async_trait]
impl ShellChannel for MockShellChannel {
    async fn write_line(&mut self, line: &str) -> Result<(), ShellError> {
        if self.broken || self.terminated {
            return Err(ShellError::ChannelBroken("Broken pipe (os error 32)".to_string()));
        }
        self.commands.lock().push(line.to_string());

        for reply in self.replies.read().iter() {
            if line.contains(&reply.trigger) {
                self.output.extend(reply.lines.iter().cloned());
                self.closed |= reply.close;
            }
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, ShellError> {
        if let Some(line) = self.output.pop_front() {
            return Ok(Some(line));
        }
        if self.closed || self.terminated {
            return Ok(None);
        }
        std::future::pending().await
    }

    fn is_alive(&mut self) -> bool {
        !self.terminated
    }

    async fn terminate(&mut self) {
        self.terminated = true;
    }
}
