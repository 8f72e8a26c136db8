//! ADB-backed root shell

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use super::{ShellChannel, ShellConnector};
use crate::error::ShellError;

const ROOT_REFUSED: &str = "cannot run as root";

/// `adb root`, then `adb shell` + `su`
#[derive(Debug, Clone)]
pub struct AdbConnector {
    program: String,
    su_settle: Duration,
}

impl AdbConnector {
    pub fn new(program: impl Into<String>, su_settle: Duration) -> Self {
        Self {
            program: program.into(),
            su_settle,
        }
    }

    async fn restart_as_root(&self) -> Result<(), ShellError> {
        let output = Command::new(&self.program)
            .arg("root")
            .output()
            .await
            .map_err(|e| ShellError::ConnectFailed(format!("{} root: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || stderr.contains(ROOT_REFUSED) {
            return Err(ShellError::ConnectFailed(format!(
                "{} root refused: {}",
                self.program,
                stderr.trim()
            )));
        }
        debug!("adbd running as root");
        Ok(())
    }
}

#[async_trait]
impl ShellConnector for AdbConnector {
    async fn connect(&self) -> Result<Box<dyn ShellChannel>, ShellError> {
        self.restart_as_root().await?;

        let mut child = Command::new(&self.program)
            .arg("shell")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShellError::ConnectFailed(format!("{} shell: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::ConnectFailed("shell stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::ConnectFailed("shell stdout not captured".to_string()))?;

        let mut channel = AdbChannel {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        };
        channel.write_line("su").await?;
        tokio::time::sleep(self.su_settle).await;

        info!("Root shell ready");
        Ok(Box::new(channel))
    }
}

/// Write one newline-terminated command and flush it
async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), ShellError> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    writer
        .write_all(buf.as_bytes())
        .await
        .map_err(|e| ShellError::ChannelBroken(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ShellError::ChannelBroken(e.to_string()))
}

/// Interactive `adb shell` process
pub struct AdbChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl ShellChannel for AdbChannel {
    async fn write_line(&mut self, line: &str) -> Result<(), ShellError> {
        send_line(&mut self.stdin, line).await
    }

    async fn read_line(&mut self) -> Result<Option<String>, ShellError> {
        self.lines
            .next_line()
            .await
            .map_err(|e| ShellError::ChannelBroken(e.to_string()))
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        let _ = self.stdin.write_all(b"exit\nexit\n").await;
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "adb shell already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_line_appends_newline() {
        let mut writer = tokio_test::io::Builder::new().write(b"su\n").build();
        send_line(&mut writer, "su").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_line_reports_broken_pipe() {
        let mut writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let err = send_line(&mut writer, "candump can0").await.unwrap_err();
        assert!(matches!(err, ShellError::ChannelBroken(_)));
    }
}
