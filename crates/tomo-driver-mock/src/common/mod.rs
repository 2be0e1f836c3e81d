//! Common infrastructure for mock collaborators.
//!
//! - **errors**: Fault injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
