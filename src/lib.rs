//! # tomo-sim
//!
//! A simulated X-ray tomograph with an experiment sequencer.
//!
//! ## Crate Structure
//!
//! - **`tomo_core`**: error taxonomy, snapshots, frame and terminal event
//!   documents, layered configuration.
//! - **`tomo_driver_mock`**: the instrument itself. Device state, the access
//!   guard and frame capture.
//! - **`tomo_experiment`**: parameter validation, the sequencer, frame
//!   dispatch, storage and encoder seams, and the start-experiment entry
//!   point.
//!
//! This crate ties them together for the `tomo-sim` binary: tracing setup
//! and an in-process [`Simulator`].

use std::sync::Arc;

use tomo_core::TomographConfig;
use tomo_driver_mock::Tomograph;
use tomo_experiment::{ExperimentService, MockStorageSink, PatternEncoder};
use tracing_subscriber::EnvFilter;

/// Common imports for driving the simulator.
pub mod prelude {
    pub use tomo_core::document::{
        DeviceSnapshot, FrameMode, FrameRecord, StorageEvent, TerminalEvent, TerminalKind,
    };
    pub use tomo_core::{TomoError, TomoResult, TomographConfig};
    pub use tomo_driver_mock::{Caller, DeviceStatus, RunToken, Tomograph};
    pub use tomo_experiment::{
        ExperimentParams, ExperimentService, FrameEncoder, MockStorageSink, PatternEncoder,
        StartedRun, StorageSink,
    };
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// One instrument wired to in-process collaborators.
#[derive(Debug, Clone)]
pub struct Simulator {
    pub service: ExperimentService,
    pub storage: Arc<MockStorageSink>,
}

impl Simulator {
    pub fn new(config: &TomographConfig) -> Self {
        let storage = Arc::new(MockStorageSink::new());
        let service = ExperimentService::new(
            Tomograph::new(config),
            Arc::new(PatternEncoder::new()),
            storage.clone(),
            config.clone(),
        );
        Self { service, storage }
    }

    pub fn device(&self) -> &Tomograph {
        self.service.device()
    }
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::*;

    #[tokio::test]
    async fn test_simulator_runs_experiment() {
        let sim = Simulator::new(&TomographConfig::instant());
        let body = r#"{
            "exp_id": "sim-1", "advanced": false,
            "DARK": {"count": 1, "exposure": 1.0},
            "EMPTY": {"count": 1, "exposure": 1.0},
            "DATA": {"step count": 2, "exposure": 1.0, "angle step": 90.0,
                     "count per step": 1, "delay": 0}
        }"#;
        let run = sim.service.start_experiment(body).await.unwrap();
        let event = run.handle.await.unwrap();
        assert_eq!(event.kind, TerminalKind::Success);
        assert_eq!(sim.storage.frame_count(), 4);
        assert_eq!(sim.device().state(), DeviceStatus::Ready);
    }
}
