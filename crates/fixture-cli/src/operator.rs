//! Operator prompts on the terminal

use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use fixture_session::Operator;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Reads answers from stdin
///
/// One reader is shared by every prompt so buffered input is never lost
/// between questions.
pub struct ConsoleOperator {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn read_line(&self) -> Option<String> {
        self.input.lock().await.next_line().await.ok().flatten()
    }

    /// Ask for a free-form line, e.g. a scanned unit code; `None` on EOF
    pub async fn ask(&self, prompt: &str) -> Option<String> {
        println!("{}", prompt.cyan());
        self.read_line().await.map(|line| line.trim().to_string())
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

/// `Some(true)` for yes, `Some(false)` for no, `None` for anything else
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn acknowledge(&self, prompt: &str) {
        println!("{}", prompt.cyan().bold());
        self.read_line().await;
    }

    async fn confirm(&self, prompt: &str, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        println!("{}", prompt.cyan().bold());
        loop {
            match tokio::time::timeout_at(deadline, self.read_line()).await {
                Ok(Some(line)) => match parse_answer(&line) {
                    Some(answer) => return Some(answer),
                    None => println!("{}", "Please answer y or n".yellow()),
                },
                Ok(None) => return None,
                Err(_) => {
                    println!("{}", "No answer, recording FAIL".yellow());
                    return None;
                }
            }
        }
    }

    fn notify(&self, message: &str) {
        println!("{}", message.yellow().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y"), Some(true));
        assert_eq!(parse_answer(" YES \n"), Some(true));
        assert_eq!(parse_answer("n"), Some(false));
        assert_eq!(parse_answer("No"), Some(false));
        assert_eq!(parse_answer(""), None);
        assert_eq!(parse_answer("maybe"), None);
    }
}
