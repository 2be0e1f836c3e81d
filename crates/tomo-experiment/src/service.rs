//! Admission entry point for experiments.
//!
//! [`ExperimentService::start_experiment`] validates the parameter document,
//! claims the device, notifies storage and launches the sequencer in the
//! background. It returns as soon as the run is launched; the outcome is only
//! delivered to storage as the run's terminal event.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tomo_core::document::{StorageEvent, TerminalEvent};
use tomo_core::error::TomoResult;
use tomo_core::TomographConfig;
use tomo_driver_mock::Tomograph;
use tracing::{info, warn};

use crate::encoder::FrameEncoder;
use crate::params::ExperimentParams;
use crate::sequencer::Sequencer;
use crate::sink::StorageSink;

/// A run accepted by [`ExperimentService::start_experiment`].
#[derive(Debug)]
pub struct StartedRun {
    pub run_id: String,
    /// Resolves to the terminal event once the device has been released.
    pub handle: JoinHandle<TerminalEvent>,
}

/// Starts experiments on one device.
#[derive(Clone)]
pub struct ExperimentService {
    device: Tomograph,
    encoder: Arc<dyn FrameEncoder>,
    sink: Arc<dyn StorageSink>,
    config: TomographConfig,
}

impl ExperimentService {
    pub fn new(
        device: Tomograph,
        encoder: Arc<dyn FrameEncoder>,
        sink: Arc<dyn StorageSink>,
        config: TomographConfig,
    ) -> Self {
        Self {
            device,
            encoder,
            sink,
            config,
        }
    }

    pub fn device(&self) -> &Tomograph {
        &self.device
    }

    /// Validate a JSON parameter document and start the experiment.
    pub async fn start_experiment(&self, document: &str) -> TomoResult<StartedRun> {
        let params = ExperimentParams::from_json(document).map_err(|e| {
            warn!(error = %e, "Experiment rejected");
            e
        })?;
        self.start(params).await
    }

    /// Start an experiment from already validated parameters.
    ///
    /// Rejected with `DeviceBusy` if a run owns the device, or with the sink
    /// error if storage refuses the start notification. In both cases the
    /// device is left as it was.
    pub async fn start(&self, params: ExperimentParams) -> TomoResult<StartedRun> {
        let token = self.device.acquire(params.exp_id.clone()).map_err(|e| {
            warn!(exp_id = %params.exp_id, error = %e, "Experiment rejected");
            e
        })?;

        let started = StorageEvent::Started {
            experiment_id: params.exp_id.clone(),
            params: params.to_json(),
        };
        if let Err(e) = self.sink.post_event(&started).await {
            warn!(exp_id = %params.exp_id, error = %e, "Storage refused experiment start");
            drop(token);
            return Err(e);
        }

        let run_id = token.run_id().to_string();
        let sequencer = Sequencer::new(
            self.device.clone(),
            params,
            self.config.sequencer.clone(),
            &token,
            Arc::clone(&self.encoder),
            Arc::clone(&self.sink),
            self.config.dispatch.max_in_flight,
        );
        let handle = tokio::spawn(sequencer.run(token));
        info!(run_id = %run_id, "Experiment admitted");

        Ok(StartedRun { run_id, handle })
    }
}

impl std::fmt::Debug for ExperimentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentService")
            .field("device", &self.device)
            .finish()
    }
}
