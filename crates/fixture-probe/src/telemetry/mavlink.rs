//! MAVLink link over the flight controller's USB serial port
//!
//! The port is opened through `serialport` with a short read timeout and is
//! only read while a request is waiting for its reply. Nothing reads in the
//! background: dropping the link closes the port, so the telemetry companion
//! can open the same device in the next step.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::mavlink::ardupilotmega::{
    MavCmd, MavMessage, MavParamType, COMMAND_LONG_DATA, PARAM_SET_DATA,
};
use ::mavlink::error::MessageReadError;
use ::mavlink::peek_reader::PeekReader;
use ::mavlink::MavHeader;
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use tracing::{debug, warn};

use super::{Heartbeat, LinkConnector, LinkTarget, TelemetryLink};
use crate::error::LinkError;

/// AUTOPILOT_VERSION message id
const AUTOPILOT_VERSION_ID: f32 = 148.0;

/// Ground station identity used for outgoing frames
const GCS_SYSTEM_ID: u8 = 255;
const GCS_COMPONENT_ID: u8 = 190;

/// Upper bound on a single blocking port read
const READ_POLL: Duration = Duration::from_millis(100);

type Frame = (MavHeader, MavMessage);
type PortReader = PeekReader<Box<dyn SerialPort>>;

/// MAVLink v2 link on one serial port
///
/// Reads and writes go through separate handles of the same port, so a
/// write never waits on a pending read.
pub struct MavlinkLink {
    address: String,
    reader: Arc<Mutex<PortReader>>,
    writer: Arc<Mutex<Box<dyn SerialPort>>>,
    sequence: AtomicU8,
}

impl MavlinkLink {
    pub fn open(address: &str, baud: u32) -> Result<Self, LinkError> {
        let port = serialport::new(address, baud)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| LinkError::ConnectionFailed(format!("{}: {}", address, e)))?;
        let writer = port
            .try_clone()
            .map_err(|e| LinkError::ConnectionFailed(format!("{}: {}", address, e)))?;

        debug!(%address, baud, "Serial port open");
        Ok(Self {
            address: address.to_string(),
            reader: Arc::new(Mutex::new(PeekReader::new(port))),
            writer: Arc::new(Mutex::new(writer)),
            sequence: AtomicU8::new(0),
        })
    }

    async fn send(&self, message: MavMessage) -> Result<(), LinkError> {
        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let writer = Arc::clone(&self.writer);

        tokio::task::spawn_blocking(move || write_frame(&mut **writer.lock(), header, &message))
            .await
            .map_err(|e| LinkError::SendFailed(e.to_string()))?
    }

    /// Read frames until `pick` accepts one or `timeout` elapses
    ///
    /// The blocking read is bounded by the timeout, so the port handle it
    /// holds is released shortly after the wait ends.
    async fn wait_for<T: Send + 'static>(
        &self,
        timeout: Duration,
        pick: impl FnMut(&Frame) -> Option<T> + Send + 'static,
    ) -> Option<T> {
        let reader = Arc::clone(&self.reader);
        let address = self.address.clone();

        match tokio::task::spawn_blocking(move || read_until(&mut *reader.lock(), timeout, pick))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(%address, error = %e, "MAVLink read task failed");
                None
            }
        }
    }

    fn command_long(target: LinkTarget, command: MavCmd, param1: f32) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
            command,
            target_system: target.system,
            target_component: target.component,
            confirmation: 0,
        })
    }
}

fn write_frame<W: Write + ?Sized>(
    mut port: &mut W,
    header: MavHeader,
    message: &MavMessage,
) -> Result<(), LinkError> {
    ::mavlink::write_v2_msg(&mut port, header, message)
        .map_err(|e| LinkError::SendFailed(e.to_string()))?;
    port.flush().map_err(|e| LinkError::SendFailed(e.to_string()))
}

fn read_until<R: Read, T>(
    port: &mut PeekReader<R>,
    timeout: Duration,
    mut pick: impl FnMut(&Frame) -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match ::mavlink::read_v2_msg::<MavMessage, _>(port) {
            Ok(frame) => {
                if let Some(value) = pick(&frame) {
                    return Some(value);
                }
            }
            Err(MessageReadError::Io(e))
                if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(MessageReadError::Io(e)) => {
                warn!(error = %e, "MAVLink read failed");
                return None;
            }
            Err(e) => debug!(error = %e, "Dropping undecodable frame"),
        }
    }
    None
}

fn param_id(name: &str) -> [u8; 16] {
    let mut id = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(id.len());
    id[..len].copy_from_slice(&bytes[..len]);
    id
}

#[async_trait]
impl TelemetryLink for MavlinkLink {
    async fn wait_heartbeat(&self, timeout: Duration) -> Option<Heartbeat> {
        self.wait_for(timeout, |(header, message)| match message {
            MavMessage::HEARTBEAT(data) => Some(Heartbeat {
                mav_type: data.mavtype as u8,
                system_id: header.system_id,
                component_id: header.component_id,
            }),
            _ => None,
        })
        .await
    }

    async fn request_autopilot_version(
        &self,
        target: LinkTarget,
        timeout: Duration,
    ) -> Result<u32, LinkError> {
        // The reply is buffered by the port until the wait below reads it.
        self.send(Self::command_long(
            target,
            MavCmd::MAV_CMD_REQUEST_MESSAGE,
            AUTOPILOT_VERSION_ID,
        ))
        .await?;

        self.wait_for(timeout, |(_, message)| match message {
            MavMessage::AUTOPILOT_VERSION(data) => Some(data.flight_sw_version),
            _ => None,
        })
        .await
        .ok_or_else(|| LinkError::Unresponsive("no AUTOPILOT_VERSION response".to_string()))
    }

    async fn param_set_i32(
        &self,
        target: LinkTarget,
        name: &str,
        value: i32,
    ) -> Result<(), LinkError> {
        self.send(MavMessage::PARAM_SET(PARAM_SET_DATA {
            param_value: value as f32,
            target_system: target.system,
            target_component: target.component,
            param_id: param_id(name),
            param_type: MavParamType::MAV_PARAM_TYPE_INT32,
        }))
        .await
    }

    async fn reboot(&self, target: LinkTarget, param: f32) -> Result<(), LinkError> {
        self.send(Self::command_long(
            target,
            MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
            param,
        ))
        .await
    }
}

/// Opens [`MavlinkLink`]s on discovered serial ports
pub struct MavlinkConnector;

#[async_trait]
impl LinkConnector for MavlinkConnector {
    async fn connect(&self, address: &str, baud: u32) -> Result<Arc<dyn TelemetryLink>, LinkError> {
        let address = address.to_string();
        let link = tokio::task::spawn_blocking(move || MavlinkLink::open(&address, baud))
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))??;
        Ok(Arc::new(link))
    }
}
