//! Operator interaction
//!
//! Steps that need a human (LED checks, the safety switch) go through
//! [`Operator`], so sessions can run unattended in tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Fixture operator at the console
#[async_trait]
pub trait Operator: Send + Sync {
    /// Show `prompt` and wait for the operator to acknowledge it
    async fn acknowledge(&self, prompt: &str);

    /// Ask a yes/no question; `None` when nobody answered within `timeout`
    async fn confirm(&self, prompt: &str, timeout: Duration) -> Option<bool>;

    /// Informational message
    fn notify(&self, _message: &str) {}
}

/// Replays canned answers and records every prompt
///
/// Once the answers run out, `confirm` behaves like an absent operator
/// and waits out the full timeout.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<Option<bool>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(answers: Vec<Option<bool>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers "yes" to everything
    pub fn agreeable() -> Self {
        Self::new(vec![Some(true); 16])
    }

    /// Every prompt shown so far, acknowledgements included
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn acknowledge(&self, prompt: &str) {
        self.prompts.lock().push(prompt.to_string());
    }

    async fn confirm(&self, prompt: &str, timeout: Duration) -> Option<bool> {
        self.prompts.lock().push(prompt.to_string());
        let answer = self.answers.lock().pop_front().flatten();
        if answer.is_none() {
            tokio::time::sleep(timeout).await;
        }
        answer
    }
}
