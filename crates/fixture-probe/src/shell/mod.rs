//! Privileged remote shell on the flight controller's companion SoC
//!
//! GPIO muxes and the CAN interface are driven through a root shell.
//! [`ShellProbe`] owns the connection policy:
//!
//! - `open` retries a bounded number of times with a fixed backoff
//! - a command that hits a broken channel reconnects exactly once and is
//!   replayed on the fresh channel; a second failure is returned

pub mod adb;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fixture_core::CheckStatus;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::classify::{serial_link_event, CanFramePattern, SerialLinkEvent};
use crate::error::ShellError;
use crate::lines::CompanionStream;

/// Line-buffered interactive channel
#[async_trait]
pub trait ShellChannel: Send {
    async fn write_line(&mut self, line: &str) -> Result<(), ShellError>;

    /// Next output line, `None` once the channel is closed
    ///
    /// Must be cancel safe; readers poll it under short timeouts.
    async fn read_line(&mut self) -> Result<Option<String>, ShellError>;

    /// Cheap liveness probe of the underlying transport
    fn is_alive(&mut self) -> bool;

    async fn terminate(&mut self);
}

/// Makes one attempt at a privileged channel
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ShellChannel>, ShellError>;
}

/// Shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_adb_program")]
    pub adb_program: String,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_secs")]
    pub connect_backoff_secs: u64,
    /// Wait after `su` before the channel is used
    #[serde(default = "default_su_settle_ms")]
    pub su_settle_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_can_interface")]
    pub can_interface: String,
    #[serde(default = "default_can_bitrate")]
    pub can_bitrate: u32,
    #[serde(default = "default_can_txqueuelen")]
    pub can_txqueuelen: u32,
    /// Link-detection companion run on the device
    #[serde(default = "default_link_detect_program")]
    pub link_detect_program: String,
    #[serde(default = "default_link_detect_baud")]
    pub link_detect_baud: u32,
    #[serde(default = "default_aircraft")]
    pub aircraft: String,
}

fn default_adb_program() -> String {
    "adb".to_string()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_backoff_secs() -> u64 {
    5
}

fn default_su_settle_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_can_interface() -> String {
    "can0".to_string()
}

fn default_can_bitrate() -> u32 {
    1_000_000
}

fn default_can_txqueuelen() -> u32 {
    1000
}

fn default_link_detect_program() -> String {
    "mavproxy.py".to_string()
}

fn default_link_detect_baud() -> u32 {
    921_600
}

fn default_aircraft() -> String {
    "MyCopter".to_string()
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            adb_program: default_adb_program(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_secs: default_connect_backoff_secs(),
            su_settle_ms: default_su_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            can_interface: default_can_interface(),
            can_bitrate: default_can_bitrate(),
            can_txqueuelen: default_can_txqueuelen(),
            link_detect_program: default_link_detect_program(),
            link_detect_baud: default_link_detect_baud(),
            aircraft: default_aircraft(),
        }
    }
}

/// Open privileged shell, exclusively owned by one step
pub struct ShellSession {
    channel: Box<dyn ShellChannel>,
    alive: bool,
    reconnects: u32,
}

impl ShellSession {
    pub fn new(channel: Box<dyn ShellChannel>) -> Self {
        Self {
            channel,
            alive: true,
            reconnects: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Times this session's channel has been replaced
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    async fn write(&mut self, line: &str) -> Result<(), ShellError> {
        if !self.alive || !self.channel.is_alive() {
            self.alive = false;
            return Err(ShellError::ChannelBroken("shell process exited".to_string()));
        }
        let result = self.channel.write_line(line).await;
        if matches!(result, Err(ShellError::ChannelBroken(_))) {
            self.alive = false;
        }
        result
    }
}

/// Fixture operations over the remote shell
pub struct ShellProbe {
    connector: Arc<dyn ShellConnector>,
    config: ShellConfig,
    can_pattern: CanFramePattern,
    link_detect: CompanionStream,
}

impl ShellProbe {
    pub fn new(
        connector: Arc<dyn ShellConnector>,
        config: ShellConfig,
    ) -> Result<Self, ShellError> {
        let can_pattern = CanFramePattern::for_interface(&config.can_interface).map_err(|e| {
            ShellError::InvalidConfig(format!("CAN interface {:?}: {}", config.can_interface, e))
        })?;
        let link_detect = CompanionStream::new(
            config.link_detect_program.clone(),
            config.link_detect_baud,
            config.aircraft.clone(),
        );
        Ok(Self {
            connector,
            config,
            can_pattern,
            link_detect,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Establish a session, retrying with a fixed backoff
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<ShellSession, ShellError> {
        let attempts = self.config.connect_attempts.max(1);
        let backoff = Duration::from_secs(self.config.connect_backoff_secs);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.connector.connect().await {
                Ok(channel) => {
                    info!(attempt, "Shell session established");
                    return Ok(ShellSession::new(channel));
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Shell connection attempt failed");
                    reason = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        Err(ShellError::ShellUnavailable { attempts, reason })
    }

    /// Run one command line, reconnecting once if the channel is broken
    pub async fn run_command(
        &self,
        session: &mut ShellSession,
        command: &str,
    ) -> Result<(), ShellError> {
        debug!(%command, "Shell command");
        match session.write(command).await {
            Err(ShellError::ChannelBroken(reason)) => {
                warn!(%reason, "Shell channel broken, reconnecting once");
                self.reconnect(session).await?;
                session.write(command).await
            }
            other => other,
        }
    }

    async fn reconnect(&self, session: &mut ShellSession) -> Result<(), ShellError> {
        session.channel.terminate().await;
        let channel = self.connector.connect().await?;
        session.channel = channel;
        session.alive = true;
        session.reconnects += 1;
        info!(reconnects = session.reconnects, "Shell channel replaced");
        Ok(())
    }

    /// Export `pin` if needed, set it as output and drive `value`
    #[instrument(skip(self, session))]
    pub async fn configure_gpio(
        &self,
        session: &mut ShellSession,
        pin: u32,
        value: u8,
    ) -> Result<(), ShellError> {
        self.run_command(session, &gpio_command(pin, value)).await
    }

    /// Bring the CAN interface up at the configured bitrate
    #[instrument(skip(self, session))]
    pub async fn configure_can_interface(&self, session: &mut ShellSession) -> Result<(), ShellError> {
        let command = can_setup_command(
            &self.config.can_interface,
            self.config.can_bitrate,
            self.config.can_txqueuelen,
        );
        self.run_command(session, &command).await
    }

    /// PASS on the first well-formed frame, FAIL otherwise
    #[instrument(skip(self, session))]
    pub async fn listen_for_bus_traffic(
        &self,
        session: &mut ShellSession,
        timeout: Duration,
    ) -> CheckStatus {
        let command = format!("candump {}", self.config.can_interface);
        if let Err(e) = self.run_command(session, &command).await {
            warn!(error = %e, "Could not start bus listener");
            return CheckStatus::Fail;
        }

        let pattern = &self.can_pattern;
        self.watch(session, timeout, |line| {
            pattern.matches(line).then_some(CheckStatus::Pass)
        })
        .await
    }

    /// Run link detection against an on-board UART
    #[instrument(skip(self, session))]
    pub async fn detect_line_traffic(
        &self,
        session: &mut ShellSession,
        device: &str,
        timeout: Duration,
    ) -> CheckStatus {
        let command = self.link_detect.command_line(device);
        if let Err(e) = self.run_command(session, &command).await {
            warn!(error = %e, "Could not start link detection");
            return CheckStatus::Fail;
        }

        self.watch(session, timeout, |line| match serial_link_event(line) {
            Some(SerialLinkEvent::Detected) => Some(CheckStatus::Pass),
            Some(SerialLinkEvent::LinkDown) => Some(CheckStatus::Fail),
            None => None,
        })
        .await
    }

    pub async fn terminate(&self, mut session: ShellSession) {
        session.channel.terminate().await;
        debug!(reconnects = session.reconnects, "Shell session terminated");
    }

    /// Poll shell output until `decide` returns a status; FAIL on timeout or EOF
    async fn watch(
        &self,
        session: &mut ShellSession,
        timeout: Duration,
        mut decide: impl FnMut(&str) -> Option<CheckStatus> + Send,
    ) -> CheckStatus {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(?timeout, "No decisive output before timeout");
                return CheckStatus::Fail;
            }

            let window = poll.min(deadline - now);
            match tokio::time::timeout(window, session.channel.read_line()).await {
                Err(_) => continue,
                Ok(Ok(Some(line))) => {
                    let line = line.trim();
                    debug!(%line, "Shell output");
                    if let Some(status) = decide(line) {
                        return status;
                    }
                }
                Ok(Ok(None)) => {
                    warn!("Shell output closed");
                    session.alive = false;
                    return CheckStatus::Fail;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Shell read failed");
                    session.alive = false;
                    return CheckStatus::Fail;
                }
            }
        }
    }
}

/// Idempotent export + direction + value for one sysfs GPIO
pub fn gpio_command(pin: u32, value: u8) -> String {
    let base = format!("/sys/class/gpio/gpio{}", pin);
    format!(
        "[ -d {base} ] || echo {pin} > /sys/class/gpio/export; echo out > {base}/direction; echo {value} > {base}/value"
    )
}

pub fn can_setup_command(interface: &str, bitrate: u32, txqueuelen: u32) -> String {
    format!(
        "ifconfig {i} down; ip link set {i} type can bitrate {bitrate}; ifconfig {i} up; ifconfig {i} txqueuelen {txqueuelen};",
        i = interface
    )
}

#[cfg(test)]
mod tests {
    use super::mock::{ConnectOutcome, MockShellConnector};
    use super::*;

    fn probe(connector: &Arc<MockShellConnector>) -> ShellProbe {
        ShellProbe::new(connector.clone(), ShellConfig::default()).unwrap()
    }

    #[test]
    fn test_gpio_command() {
        assert_eq!(
            gpio_command(442, 1),
            "[ -d /sys/class/gpio/gpio442 ] || echo 442 > /sys/class/gpio/export; \
             echo out > /sys/class/gpio/gpio442/direction; echo 1 > /sys/class/gpio/gpio442/value"
        );
    }

    #[test]
    fn test_can_setup_command() {
        assert_eq!(
            can_setup_command("can0", 1_000_000, 1000),
            "ifconfig can0 down; ip link set can0 type can bitrate 1000000; \
             ifconfig can0 up; ifconfig can0 txqueuelen 1000;"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_retries_then_gives_up() {
        let connector = Arc::new(MockShellConnector::with_outcomes(vec![
            ConnectOutcome::Refuse,
            ConnectOutcome::Refuse,
            ConnectOutcome::Refuse,
        ]));
        let start = Instant::now();

        let result = probe(&connector).open().await;

        assert!(matches!(
            result,
            Err(ShellError::ShellUnavailable { attempts: 3, .. })
        ));
        assert_eq!(connector.connect_count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_succeeds_on_retry() {
        let connector = Arc::new(MockShellConnector::with_outcomes(vec![
            ConnectOutcome::Refuse,
            ConnectOutcome::Healthy,
        ]));
        let session = probe(&connector).open().await.unwrap();
        assert!(session.is_alive());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_broken_channel_reconnects_once_and_replays() {
        let connector = Arc::new(MockShellConnector::with_outcomes(vec![
            ConnectOutcome::Broken,
            ConnectOutcome::Healthy,
        ]));
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        probe.configure_gpio(&mut session, 442, 0).await.unwrap();

        assert_eq!(connector.connect_count(), 2);
        assert_eq!(session.reconnects(), 1);
        assert_eq!(connector.commands(), vec![gpio_command(442, 0)]);
    }

    #[tokio::test]
    async fn test_second_failure_surfaces() {
        let connector = Arc::new(MockShellConnector::with_outcomes(vec![
            ConnectOutcome::Broken,
            ConnectOutcome::Broken,
            ConnectOutcome::Healthy,
        ]));
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let result = probe.configure_gpio(&mut session, 464, 1).await;

        assert!(matches!(result, Err(ShellError::ChannelBroken(_))));
        assert_eq!(connector.connect_count(), 2);
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn test_refused_reconnect_surfaces() {
        let connector = Arc::new(MockShellConnector::with_outcomes(vec![
            ConnectOutcome::Broken,
            ConnectOutcome::Refuse,
        ]));
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let result = probe.configure_can_interface(&mut session).await;

        assert!(matches!(result, Err(ShellError::ConnectFailed(_))));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_listen_passes_on_frame() {
        let connector = Arc::new(MockShellConnector::healthy());
        connector.respond(
            "candump can0",
            &["  can0  18FEF100   [8]  01 02 03 04 05 06 07 08"],
        );
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let status = probe
            .listen_for_bus_traffic(&mut session, Duration::from_secs(5))
            .await;
        assert_eq!(status, CheckStatus::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_listen_silence_is_fail() {
        let connector = Arc::new(MockShellConnector::healthy());
        connector.respond("candump can0", &["garbage line"]);
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let start = Instant::now();
        let status = probe
            .listen_for_bus_traffic(&mut session, Duration::from_secs(5))
            .await;

        assert_eq!(status, CheckStatus::Fail);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_detection_outcomes() {
        let connector = Arc::new(MockShellConnector::healthy());
        connector.respond(
            "--master=/dev/ttyHS2",
            &["Connect /dev/ttyHS2", "Detected vehicle 1:1 on link 0"],
        );
        connector.respond("--master=/dev/ttyHS1", &["link 1 down"]);
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let pass = probe
            .detect_line_traffic(&mut session, "/dev/ttyHS2", Duration::from_secs(10))
            .await;
        let fail = probe
            .detect_line_traffic(&mut session, "/dev/ttyHS1", Duration::from_secs(10))
            .await;

        assert_eq!(pass, CheckStatus::Pass);
        assert_eq!(fail, CheckStatus::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_detection_eof_is_fail() {
        let connector = Arc::new(MockShellConnector::healthy());
        connector.respond_then_close("mavproxy.py", &["Connect /dev/ttyHS2"]);
        let probe = probe(&connector);
        let mut session = probe.open().await.unwrap();

        let status = probe
            .detect_line_traffic(&mut session, "/dev/ttyHS2", Duration::from_secs(10))
            .await;
        assert_eq!(status, CheckStatus::Fail);
        assert!(!session.is_alive());
    }
}
