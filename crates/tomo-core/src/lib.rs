//! Core types for the tomograph simulator.
//!
//! - [`error`]: the `TomoError` taxonomy shared by every crate
//! - [`document`]: snapshots, frame records and terminal events
//! - [`config`]: Figment-based layered configuration

pub mod config;
pub mod document;
pub mod error;

pub use config::TomographConfig;
pub use error::{TomoError, TomoResult};
