//! End-to-end tests for fixture sessions
//!
//! These tests drive complete sessions through the orchestrator with the
//! in-memory rig from `fixture_session::testing`: mock telemetry link,
//! scripted companion streams, a mock shell and a scripted operator. No
//! hardware is needed and time is paused, so timeouts resolve instantly.
//!
//! ```bash
//! cargo test -p fixture-tests
//! ```
//!
//! # Test Structure
//!
//! - `session_e2e.rs` - full runs: pass path, fail path, abort and artifacts

// This crate only contains tests, no library code
