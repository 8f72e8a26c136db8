//! Mock telemetry link for testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Heartbeat, LinkConnector, LinkTarget, TelemetryLink};
use crate::error::LinkError;

/// MAV_TYPE_QUADROTOR
const DEFAULT_MAV_TYPE: u8 = 2;

/// Scriptable in-memory flight controller
///
/// Silence is simulated by sleeping for the full timeout, so tests using
/// paused time see the same timing as a real unresponsive unit.
pub struct MockTelemetryLink {
    heartbeat: RwLock<Option<Heartbeat>>,
    version_word: RwLock<Option<u32>>,
    params: RwLock<Vec<(String, i32)>>,
    reboots: RwLock<Vec<f32>>,
    version_requests: AtomicUsize,
}

impl MockTelemetryLink {
    /// Copter that sends heartbeats but never answers version requests
    pub fn new() -> Self {
        Self {
            heartbeat: RwLock::new(Some(Heartbeat {
                mav_type: DEFAULT_MAV_TYPE,
                system_id: 1,
                component_id: 1,
            })),
            version_word: RwLock::new(None),
            params: RwLock::new(Vec::new()),
            reboots: RwLock::new(Vec::new()),
            version_requests: AtomicUsize::new(0),
        }
    }

    /// Link that never produces a heartbeat
    pub fn silent() -> Self {
        let link = Self::new();
        *link.heartbeat.write() = None;
        link
    }

    pub fn with_version(self, word: u32) -> Self {
        self.set_version(word);
        self
    }

    pub fn with_mav_type(self, mav_type: u8) -> Self {
        if let Some(heartbeat) = self.heartbeat.write().as_mut() {
            heartbeat.mav_type = mav_type;
        }
        self
    }

    /// Change the reported version (e.g. after a re-flash)
    pub fn set_version(&self, word: u32) {
        *self.version_word.write() = Some(word);
    }

    /// Parameter writes in order
    pub fn params(&self) -> Vec<(String, i32)> {
        self.params.read().clone()
    }

    /// Reboot command parameters in order
    pub fn reboots(&self) -> Vec<f32> {
        self.reboots.read().clone()
    }

    pub fn version_requests(&self) -> usize {
        self.version_requests.load(Ordering::SeqCst)
    }
}

impl Default for MockTelemetryLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryLink for MockTelemetryLink {
    async fn wait_heartbeat(&self, timeout: Duration) -> Option<Heartbeat> {
        let heartbeat = *self.heartbeat.read();
        if heartbeat.is_none() {
            tokio::time::sleep(timeout).await;
        }
        heartbeat
    }

    async fn request_autopilot_version(
        &self,
        _target: LinkTarget,
        timeout: Duration,
    ) -> Result<u32, LinkError> {
        self.version_requests.fetch_add(1, Ordering::SeqCst);
        let word = *self.version_word.read();
        match word {
            Some(word) => Ok(word),
            None => {
                tokio::time::sleep(timeout).await;
                Err(LinkError::Unresponsive(
                    "no AUTOPILOT_VERSION response".to_string(),
                ))
            }
        }
    }

    async fn param_set_i32(
        &self,
        _target: LinkTarget,
        name: &str,
        value: i32,
    ) -> Result<(), LinkError> {
        self.params.write().push((name.to_string(), value));
        Ok(())
    }

    async fn reboot(&self, _target: LinkTarget, param: f32) -> Result<(), LinkError> {
        self.reboots.write().push(param);
        Ok(())
    }
}

/// Connector that always hands out the same mock link
pub struct MockLinkConnector {
    port: Option<String>,
    link: Arc<MockTelemetryLink>,
    connects: AtomicUsize,
}

impl MockLinkConnector {
    pub fn new(link: Arc<MockTelemetryLink>) -> Self {
        Self {
            port: Some("/dev/ttyACM0".to_string()),
            link,
            connects: AtomicUsize::new(0),
        }
    }

    /// No flight controller attached
    pub fn no_device() -> Self {
        Self {
            port: None,
            ..Self::new(Arc::new(MockTelemetryLink::silent()))
        }
    }

    pub fn link(&self) -> Arc<MockTelemetryLink> {
        Arc::clone(&self.link)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkConnector for MockLinkConnector {
    fn discover(&self) -> Option<String> {
        self.port.clone()
    }

    async fn connect(&self, address: &str, _baud: u32) -> Result<Arc<dyn TelemetryLink>, LinkError> {
        if self.port.as_deref() != Some(address) {
            return Err(LinkError::ConnectionFailed(format!("no device at {}", address)));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.link.clone())
    }
}
