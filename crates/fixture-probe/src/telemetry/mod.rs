//! Telemetry/command link to the flight controller
//!
//! This module provides link implementations:
//! - MAVLink over the USB serial port (feature `mavlink`)
//! - Mock link for testing
//!
//! [`TelemetryProbe`] layers the fixture's operations (version query,
//! output function writes, reboot) on top of whichever [`TelemetryLink`]
//! the [`LinkConnector`] hands out.

pub mod mock;

#[cfg(feature = "mavlink")]
pub mod mavlink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fixture_core::{FirmwareIdentity, VehicleClass, VersionInfo};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::LinkError;

/// Substrings identifying a flight controller's USB serial port
const PORT_PATTERNS: &[&str] = &["ttyUSB", "ttyACM"];

/// Liveness message received from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Raw MAV_TYPE code
    pub mav_type: u8,
    pub system_id: u8,
    pub component_id: u8,
}

/// System/component pair commands are addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTarget {
    pub system: u8,
    pub component: u8,
}

impl Default for LinkTarget {
    fn default() -> Self {
        Self {
            system: 1,
            component: 1,
        }
    }
}

/// Transport-level command/telemetry primitives
#[async_trait]
pub trait TelemetryLink: Send + Sync {
    /// Wait for the next heartbeat; `None` on timeout
    async fn wait_heartbeat(&self, timeout: Duration) -> Option<Heartbeat>;

    /// Request AUTOPILOT_VERSION and return its packed flight software version
    async fn request_autopilot_version(
        &self,
        target: LinkTarget,
        timeout: Duration,
    ) -> Result<u32, LinkError>;

    /// Fire-and-forget INT32 parameter write
    async fn param_set_i32(
        &self,
        target: LinkTarget,
        name: &str,
        value: i32,
    ) -> Result<(), LinkError>;

    /// Reboot/shutdown command with the given first parameter
    async fn reboot(&self, target: LinkTarget, param: f32) -> Result<(), LinkError>;
}

/// Finds and opens telemetry links
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Address of the first attached flight controller
    fn discover(&self) -> Option<String> {
        discover_serial_port()
    }

    async fn connect(&self, address: &str, baud: u32) -> Result<Arc<dyn TelemetryLink>, LinkError>;
}

/// First serial port, in sorted order, that looks like a flight controller
pub fn discover_serial_port() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "Serial port enumeration failed");
            return None;
        }
    };

    select_port(ports.into_iter().map(|p| p.port_name))
}

fn select_port(names: impl Iterator<Item = String>) -> Option<String> {
    let mut candidates: Vec<String> = names
        .filter(|name| PORT_PATTERNS.iter().any(|p| name.contains(p)))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Connector for the real device link
pub fn create_connector() -> Result<Arc<dyn LinkConnector>, LinkError> {
    #[cfg(feature = "mavlink")]
    {
        Ok(Arc::new(self::mavlink::MavlinkConnector))
    }
    #[cfg(not(feature = "mavlink"))]
    {
        Err(LinkError::Unsupported(
            "MAVLink link requires the 'mavlink' feature".to_string(),
        ))
    }
}

// =============================================================================
// DeviceLink
// =============================================================================

/// Open connection to one unit's telemetry interface
///
/// Opened by the step that needs it and dropped when the step ends.
pub struct DeviceLink {
    pub address: String,
    pub baud: u32,
    pub target: LinkTarget,
    pub last_heartbeat: Option<Instant>,
    /// MAV_TYPE from the latest heartbeat
    pub vehicle_type: Option<u8>,
    link: Arc<dyn TelemetryLink>,
}

impl DeviceLink {
    pub fn new(address: &str, baud: u32, link: Arc<dyn TelemetryLink>) -> Self {
        Self {
            address: address.to_string(),
            baud,
            target: LinkTarget::default(),
            last_heartbeat: None,
            vehicle_type: None,
            link,
        }
    }

    fn observe(&mut self, heartbeat: Heartbeat) {
        self.target = LinkTarget {
            system: heartbeat.system_id,
            component: heartbeat.component_id,
        };
        self.vehicle_type = Some(heartbeat.mav_type);
        self.last_heartbeat = Some(Instant::now());
    }
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("address", &self.address)
            .field("baud", &self.baud)
            .field("target", &self.target)
            .field("last_heartbeat", &self.last_heartbeat)
            .field("vehicle_type", &self.vehicle_type)
            .finish()
    }
}

// =============================================================================
// TelemetryProbe
// =============================================================================

/// Timing of telemetry operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryTiming {
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_version_timeout_secs")]
    pub version_timeout_secs: u64,
    /// Delay after each output function write
    #[serde(default = "default_param_settle_ms")]
    pub param_settle_ms: u64,
    /// Delay after a reboot command
    #[serde(default = "default_reboot_settle_secs")]
    pub reboot_settle_secs: u64,
}

fn default_heartbeat_timeout_secs() -> u64 {
    30
}

fn default_version_timeout_secs() -> u64 {
    10
}

fn default_param_settle_ms() -> u64 {
    1000
}

fn default_reboot_settle_secs() -> u64 {
    15
}

impl Default for TelemetryTiming {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            version_timeout_secs: default_version_timeout_secs(),
            param_settle_ms: default_param_settle_ms(),
            reboot_settle_secs: default_reboot_settle_secs(),
        }
    }
}

impl TelemetryTiming {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_secs)
    }

    pub fn param_settle(&self) -> Duration {
        Duration::from_millis(self.param_settle_ms)
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_secs(self.reboot_settle_secs)
    }
}

/// Fixture operations over the telemetry link
pub struct TelemetryProbe {
    connector: Arc<dyn LinkConnector>,
    timing: TelemetryTiming,
}

impl TelemetryProbe {
    pub fn new(connector: Arc<dyn LinkConnector>, timing: TelemetryTiming) -> Self {
        Self { connector, timing }
    }

    pub fn timing(&self) -> &TelemetryTiming {
        &self.timing
    }

    /// Locate the unit; `LinkUnavailable` when nothing is attached
    pub fn discover(&self) -> Result<String, LinkError> {
        match self.connector.discover() {
            Some(address) => {
                debug!(%address, "Flight controller port found");
                Ok(address)
            }
            None => Err(LinkError::LinkUnavailable),
        }
    }

    /// Discover and open a link at `baud`
    pub async fn connect(&self, baud: u32) -> Result<DeviceLink, LinkError> {
        let address = self.discover()?;
        self.connect_to(&address, baud).await
    }

    #[instrument(skip(self))]
    pub async fn connect_to(&self, address: &str, baud: u32) -> Result<DeviceLink, LinkError> {
        let link = self.connector.connect(address, baud).await?;
        info!(%address, baud, "Telemetry link open");
        Ok(DeviceLink::new(address, baud, link))
    }

    /// Wait for a heartbeat; false on timeout
    #[instrument(skip(self, link), fields(address = %link.address))]
    pub async fn wait_heartbeat(&self, link: &mut DeviceLink, timeout: Duration) -> bool {
        match link.link.wait_heartbeat(timeout).await {
            Some(heartbeat) => {
                debug!(
                    system = heartbeat.system_id,
                    component = heartbeat.component_id,
                    mav_type = heartbeat.mav_type,
                    "Heartbeat received"
                );
                link.observe(heartbeat);
                true
            }
            None => {
                warn!(?timeout, "No heartbeat");
                false
            }
        }
    }

    /// Query the firmware version and vehicle class
    #[instrument(skip(self, link), fields(address = %link.address))]
    pub async fn query_firmware_version(
        &self,
        link: &mut DeviceLink,
    ) -> Result<FirmwareIdentity, LinkError> {
        if link.vehicle_type.is_none()
            && !self
                .wait_heartbeat(link, self.timing.heartbeat_timeout())
                .await
        {
            return Err(LinkError::Unresponsive("no heartbeat".to_string()));
        }

        let word = link
            .link
            .request_autopilot_version(link.target, self.timing.version_timeout())
            .await?;

        let identity = FirmwareIdentity {
            vehicle: VehicleClass::from_mav_type(link.vehicle_type.unwrap_or_default()),
            version: VersionInfo::decode(word),
        };
        info!(%identity, "Firmware identified");
        Ok(identity)
    }

    /// Write `SERVO{channel}_FUNCTION` and wait for it to settle
    pub async fn set_output_function(
        &self,
        link: &DeviceLink,
        channel: u8,
        function: i32,
    ) -> Result<(), LinkError> {
        let name = format!("SERVO{}_FUNCTION", channel);
        debug!(param = %name, function, "Setting output function");
        link.link.param_set_i32(link.target, &name, function).await?;
        tokio::time::sleep(self.timing.param_settle()).await;
        Ok(())
    }

    /// Send the reboot command; the caller decides whether to settle
    #[instrument(skip(self, link), fields(address = %link.address))]
    pub async fn send_reboot(&self, link: &DeviceLink) -> Result<(), LinkError> {
        link.link.reboot(link.target, 1.0).await?;
        info!("Reboot command sent");
        Ok(())
    }

    pub async fn reboot_settle(&self) {
        tokio::time::sleep(self.timing.reboot_settle()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockLinkConnector, MockTelemetryLink};
    use super::*;
    use fixture_core::ReleaseType;

    fn probe(link: Arc<MockTelemetryLink>) -> TelemetryProbe {
        TelemetryProbe::new(
            Arc::new(MockLinkConnector::new(link)),
            TelemetryTiming::default(),
        )
    }

    #[test]
    fn test_select_port_sorted_and_filtered() {
        let names = vec![
            "/dev/ttyS0".to_string(),
            "/dev/ttyUSB1".to_string(),
            "/dev/ttyACM0".to_string(),
        ];
        assert_eq!(select_port(names.into_iter()).as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(select_port(vec!["/dev/ttyS0".to_string()].into_iter()), None);
    }

    #[tokio::test]
    async fn test_discover_without_device() {
        let probe = TelemetryProbe::new(
            Arc::new(MockLinkConnector::no_device()),
            TelemetryTiming::default(),
        );
        assert!(matches!(
            probe.connect(115_200).await,
            Err(LinkError::LinkUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_firmware_version() {
        let link = Arc::new(MockTelemetryLink::new().with_version(0x0405_0040));
        let probe = probe(link);
        let mut device = probe.connect(115_200).await.unwrap();

        let identity = probe.query_firmware_version(&mut device).await.unwrap();
        assert_eq!(identity.vehicle, VehicleClass::Copter);
        assert_eq!(identity.version.release_type, ReleaseType::Alpha);
        assert_eq!(identity.version.to_string(), "alpha-4.5.0");
        assert!(device.last_heartbeat.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vehicle_class_from_heartbeat() {
        let link = Arc::new(
            MockTelemetryLink::new()
                .with_mav_type(1)
                .with_version(0x0405_02FF),
        );
        let probe = probe(Arc::clone(&link));
        let mut device = probe.connect(115_200).await.unwrap();

        let identity = probe.query_firmware_version(&mut device).await.unwrap();
        assert_eq!(identity.vehicle, VehicleClass::Plane);
        assert_eq!(identity.version.to_string(), "official-4.5.2");
        assert_eq!(link.version_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_unresponsive() {
        let link = Arc::new(MockTelemetryLink::new());
        let probe = probe(link);
        let mut device = probe.connect(115_200).await.unwrap();

        let start = Instant::now();
        let result = probe.query_firmware_version(&mut device).await;
        assert!(matches!(result, Err(LinkError::Unresponsive(_))));
        assert!(start.elapsed() <= Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_returns_false() {
        let link = Arc::new(MockTelemetryLink::silent());
        let probe = probe(link);
        let mut device = probe.connect(115_200).await.unwrap();

        assert!(!probe.wait_heartbeat(&mut device, Duration::from_secs(30)).await);
        assert!(device.last_heartbeat.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_function_and_reboot() {
        let link = Arc::new(MockTelemetryLink::new());
        let probe = probe(Arc::clone(&link));
        let device = probe.connect(115_200).await.unwrap();

        probe.set_output_function(&device, 9, 136).await.unwrap();
        probe.send_reboot(&device).await.unwrap();

        assert_eq!(link.params(), vec![("SERVO9_FUNCTION".to_string(), 136)]);
        assert_eq!(link.reboots(), vec![1.0]);
    }
}
