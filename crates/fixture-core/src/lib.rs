//! fixture-core - Status model for the flight-controller production fixture
//!
//! This crate holds the data every other fixture crate agrees on:
//!
//! - [`CheckStatus`]: the outcome of one named hardware check
//! - [`StatusRegistry`]: the ordered check → status mapping with derived entries
//! - [`TestSession`]: one test pass over one physical unit
//! - [`TestRecord`]: the persisted JSON layout handed to report generation
//! - [`VersionInfo`] / [`VehicleClass`]: firmware identity decoding

pub mod registry;
pub mod session;
pub mod status;
pub mod version;

pub use registry::{all_pass, DeriveRule, StatusRegistry, StatusSnapshot, StatusUpdate};
pub use session::{ResultEntry, TestRecord, TestSession, FAILED_FIRMWARE_PLACEHOLDER};
pub use status::CheckStatus;
pub use version::{FirmwareIdentity, ReleaseType, VehicleClass, VersionInfo};
