//! Firmware version word and vehicle class decoding

use serde::{Deserialize, Serialize};

/// Release channel packed into the low byte of the version word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Dev,
    Alpha,
    Beta,
    Rc,
    Official,
    Undefined,
}

impl ReleaseType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ReleaseType::Dev,
            64 => ReleaseType::Alpha,
            128 => ReleaseType::Beta,
            192 => ReleaseType::Rc,
            255 => ReleaseType::Official,
            _ => ReleaseType::Undefined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseType::Dev => "dev",
            ReleaseType::Alpha => "alpha",
            ReleaseType::Beta => "beta",
            ReleaseType::Rc => "rc",
            ReleaseType::Official => "official",
            ReleaseType::Undefined => "undefined",
        }
    }
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded flight software version
///
/// Bit layout of the packed word: major 31..24, minor 23..16, patch 15..8,
/// release type 7..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub release_type: ReleaseType,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl VersionInfo {
    pub fn decode(word: u32) -> Self {
        let [major, minor, patch, release] = word.to_be_bytes();
        Self {
            release_type: ReleaseType::from_byte(release),
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}.{}.{}",
            self.release_type, self.major, self.minor, self.patch
        )
    }
}

/// Vehicle class reported in the heartbeat type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleClass {
    Plane,
    Copter,
    Rover,
    Sub,
    Boat,
    Unknown,
}

impl VehicleClass {
    /// Map a MAV_TYPE code to a vehicle class
    pub fn from_mav_type(mav_type: u8) -> Self {
        match mav_type {
            1 => VehicleClass::Plane,   // MAV_TYPE_FIXED_WING
            2 => VehicleClass::Copter,  // MAV_TYPE_QUADROTOR
            10 => VehicleClass::Rover,  // MAV_TYPE_GROUND_ROVER
            11 => VehicleClass::Boat,   // MAV_TYPE_SURFACE_BOAT
            12 => VehicleClass::Sub,    // MAV_TYPE_SUBMARINE
            _ => VehicleClass::Unknown,
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VehicleClass::Plane => "Plane",
            VehicleClass::Copter => "Copter",
            VehicleClass::Rover => "Rover",
            VehicleClass::Sub => "Sub",
            VehicleClass::Boat => "Boat",
            VehicleClass::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Result of a successful firmware query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareIdentity {
    pub vehicle: VehicleClass,
    pub version: VersionInfo,
}

impl std::fmt::Display for FirmwareIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Vehicle: {}, Firmware version: {}",
            self.vehicle, self.version
        )
    }
}
