//! Simulated tomograph for tomo-sim.
//!
//! This crate provides the in-memory instrument that experiments drive:
//!
//! - [`Tomograph`] - device handle: X-ray source, shutter, object motors and
//!   detector, every operation gated by the access guard
//! - [`RunToken`] / [`Caller`] - exclusive run ownership and the per-call
//!   admission check
//! - [`Tomograph::capture_frame`] - frame capture behind a scoped shutter
//!   interlock
//! - [`render_readout`] - seeded detector pixel source
//! - [`ErrorConfig`] / [`MockRng`] - fault injection and reproducible
//!   randomness for mock collaborators
//!
//! # Limits
//!
//! - Voltage: 2-60 kV
//! - Current: 2-80 mA
//! - Exposure: 0.1-16000 ms, stored rounded
//! - Motors: configured per axis, angle wraps into [0, 360)

pub mod common;
mod capture;
pub mod guard;
mod pattern;
pub mod state;
mod tomograph;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, MockRng};

pub use capture::CapturedFrame;
pub use guard::{check_access, Caller, RunControl, RunToken};
pub use pattern::render_readout;
pub use state::DeviceState;
pub use tomograph::{DeviceStatus, Tomograph};
