//! Experiment orchestration for tomo-sim.
//!
//! - [`params`]: parameter document and admission validation
//! - [`sequencer`]: the INIT → DARK → EMPTY → DATA state machine
//! - [`dispatch`]: per-frame encode-and-forward units
//! - [`encoder`] / [`sink`]: collaborator seams with in-process implementations
//! - [`service`]: the start-experiment entry point
//!
//! # Usage
//!
//! ```rust,ignore
//! let device = Tomograph::new(&config);
//! let sink = Arc::new(MockStorageSink::new());
//! let service = ExperimentService::new(device, Arc::new(PatternEncoder::new()), sink, config);
//!
//! let run = service.start_experiment(&body).await?;
//! let outcome = run.handle.await?;
//! ```

pub mod dispatch;
pub mod encoder;
pub mod params;
pub mod sequencer;
pub mod service;
pub mod sink;

pub use dispatch::FrameDispatcher;
pub use encoder::{FrameEncoder, PatternEncoder};
pub use params::ExperimentParams;
pub use sequencer::{FrameCounter, Phase, Sequencer};
pub use service::{ExperimentService, StartedRun};
pub use sink::{check_storage_response, MockStorageSink, StorageSink, StoredFrame};
