//! Per-frame dispatch units.
//!
//! Each captured frame becomes one task: encode the payload, then post it
//! with its metadata to storage. Tasks run concurrently with the sequencer
//! and with each other, bounded by a semaphore, so storage may receive
//! frames out of capture order.
//!
//! A failing unit never returns its error to the sequencer. It records the
//! error on the run's [`RunControl`] instead, and the access guard raises it
//! at the sequencer's next device call.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tomo_core::document::FrameRecord;
use tomo_core::error::{TomoError, TomoResult};
use tomo_driver_mock::RunControl;
use tracing::{debug, warn};

use crate::encoder::FrameEncoder;
use crate::sink::StorageSink;

/// Encode one frame and forward it to storage.
pub async fn dispatch_frame(
    frame: FrameRecord,
    encoder: Arc<dyn FrameEncoder>,
    sink: Arc<dyn StorageSink>,
) -> TomoResult<()> {
    let raw = frame.raw;
    let payload = tokio::task::spawn_blocking(move || encoder.encode(&raw))
        .await
        .map_err(|e| TomoError::encode(format!("Encoder task failed: {}", e)))??;
    sink.post_frame(frame.metadata_json(), payload, frame.live_preview)
        .await
}

/// Spawns and tracks the dispatch units of one run.
pub struct FrameDispatcher {
    encoder: Arc<dyn FrameEncoder>,
    sink: Arc<dyn StorageSink>,
    control: Arc<RunControl>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    dispatched: u64,
}

impl FrameDispatcher {
    pub fn new(
        encoder: Arc<dyn FrameEncoder>,
        sink: Arc<dyn StorageSink>,
        control: Arc<RunControl>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            encoder,
            sink,
            control,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tasks: JoinSet::new(),
            dispatched: 0,
        }
    }

    /// Hand a frame off.
    ///
    /// Waits for a free slot when `max_in_flight` units are already running,
    /// so at most that many frames are held by dispatch at once.
    pub async fn dispatch(&mut self, frame: FrameRecord) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        self.reap();
        let encoder = Arc::clone(&self.encoder);
        let sink = Arc::clone(&self.sink);
        let control = Arc::clone(&self.control);
        self.dispatched += 1;

        self.tasks.spawn(async move {
            let _permit = permit;
            let number = frame.number.clone();
            match dispatch_frame(frame, encoder, sink).await {
                Ok(()) => debug!(run_id = %control.run_id(), frame = %number, "Frame stored"),
                Err(e) => {
                    warn!(run_id = %control.run_id(), frame = %number, error = %e, "Frame dispatch failed");
                    control.request_stop(e);
                }
            }
        });
    }

    /// Join units that have already finished.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record_join(joined);
        }
    }

    fn record_join(&self, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            warn!(run_id = %self.control.run_id(), error = %e, "Dispatch unit did not complete");
            self.control
                .request_stop(TomoError::encode(format!("Dispatch unit failed: {}", e)));
        }
    }

    /// Frames handed off so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Units spawned and not yet joined.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every outstanding unit.
    ///
    /// A unit that panicked is recorded as an encoder failure.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.record_join(joined);
        }
    }
}
