//! Experiment sequencer - state machine driving one run
//!
//! The sequencer owns the device for the whole run through its
//! [`RunToken`] and walks the acquisition phases:
//!
//! ```text
//! ┌──────┐   ┌──────┐   ┌───────┐   ┌──────┐   ┌──────┐
//! │ Init │──▶│ Dark │──▶│ Empty │──▶│ Data │──▶│ Done │
//! └──────┘   └──────┘   └───────┘   └──────┘   └──────┘
//!     │          │          │           │
//!     └──────────┴──────────┴───────────┴──────▶ Aborted
//! ```
//!
//! Every device call is made as the owning run. Once a dispatch unit has
//! recorded a stop cause, the next call returns that cause and the run
//! unwinds to `Aborted` with `?`. Before the outcome is classified all
//! dispatch units are drained, so a late failure still aborts the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::yield_now;
use tokio::time::sleep;
use tomo_core::config::SequencerConfig;
use tomo_core::document::{FrameMode, FrameRecord, StorageEvent, TerminalEvent};
use tomo_core::error::TomoResult;
use tomo_driver_mock::{RunToken, Tomograph};
use tracing::{debug, error, info, warn};

use crate::dispatch::FrameDispatcher;
use crate::encoder::FrameEncoder;
use crate::params::ExperimentParams;
use crate::sink::StorageSink;

/// Sequencer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Dark,
    Empty,
    Data,
    Done,
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Dark => write!(f, "dark"),
            Phase::Empty => write!(f, "empty"),
            Phase::Data => write!(f, "data"),
            Phase::Done => write!(f, "done"),
            Phase::Aborted => write!(f, "aborted"),
        }
    }
}

/// Sequence numbering shared by all phases.
#[derive(Debug, Clone)]
pub struct FrameCounter {
    next: u64,
    width: usize,
    send_every_n: u64,
}

impl FrameCounter {
    pub fn new(width: usize, send_every_n: u64) -> Self {
        Self {
            next: 0,
            width,
            send_every_n: send_every_n.max(1),
        }
    }

    /// Next zero-padded number and whether that frame goes to the live preview.
    pub fn advance(&mut self) -> (String, bool) {
        let n = self.next;
        self.next += 1;
        (format!("{:0width$}", n, width = self.width), n % self.send_every_n == 0)
    }

    /// Frames numbered so far.
    pub fn count(&self) -> u64 {
        self.next
    }
}

/// Drives one experiment from power-on to its terminal event.
pub struct Sequencer {
    device: Tomograph,
    params: ExperimentParams,
    config: SequencerConfig,
    sink: Arc<dyn StorageSink>,
    dispatcher: FrameDispatcher,
    counter: FrameCounter,
    phase: Phase,
}

impl Sequencer {
    pub fn new(
        device: Tomograph,
        params: ExperimentParams,
        config: SequencerConfig,
        token: &RunToken,
        encoder: Arc<dyn FrameEncoder>,
        sink: Arc<dyn StorageSink>,
        max_in_flight: usize,
    ) -> Self {
        let counter = FrameCounter::new(params.number_width(), config.frame_send_every_n);
        let dispatcher =
            FrameDispatcher::new(encoder, Arc::clone(&sink), token.control(), max_in_flight);
        Self {
            device,
            params,
            config,
            sink,
            dispatcher,
            counter,
            phase: Phase::Init,
        }
    }

    /// Run to completion, report the outcome to storage and release the device.
    pub async fn run(mut self, token: RunToken) -> TerminalEvent {
        let run_id = token.run_id().to_string();
        info!(run_id = %run_id, frames = self.params.total_frames(), "Experiment started");

        if let Err(e) = self.execute(&token).await {
            // Guard errors are the recorded cause itself; anything else
            // becomes the cause here.
            token.control().request_stop(e);
        }

        self.dispatcher.drain().await;

        let event = match token.stop_cause() {
            None => {
                self.phase = Phase::Done;
                TerminalEvent::success(&run_id)
            }
            Some(cause) => {
                warn!(
                    run_id = %run_id,
                    phase = %self.phase,
                    error = %cause,
                    "Experiment aborted"
                );
                self.phase = Phase::Aborted;
                self.device.secure(&token);
                TerminalEvent::emergency_stop(&run_id, &cause)
            }
        };

        info!(
            run_id = %run_id,
            phase = %self.phase,
            outcome = ?event.kind,
            frames = self.counter.count(),
            "Experiment finished"
        );

        if let Err(e) = self
            .sink
            .post_event(&StorageEvent::Finished(event.clone()))
            .await
        {
            error!(run_id = %run_id, error = %e, "Could not report experiment outcome to storage");
        }

        drop(token);
        event
    }

    async fn execute(&mut self, token: &RunToken) -> TomoResult<()> {
        self.device.power_on(token.caller())?;
        self.collect_dark(token).await?;
        self.collect_empty(token).await?;
        self.collect_data(token).await?;
        self.device.power_off(token.caller())?;
        Ok(())
    }

    fn enter(&mut self, phase: Phase, token: &RunToken) {
        info!(run_id = %token.run_id(), from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    async fn collect_dark(&mut self, token: &RunToken) -> TomoResult<()> {
        self.enter(Phase::Dark, token);
        self.device.close_shutter(token.caller())?;
        settle(self.config.dark_settle).await;
        self.device
            .set_exposure(token.caller(), self.params.dark.exposure)?;
        for _ in 0..self.params.dark.count {
            self.take_frame(token, FrameMode::Dark).await?;
        }
        Ok(())
    }

    async fn collect_empty(&mut self, token: &RunToken) -> TomoResult<()> {
        self.enter(Phase::Empty, token);
        self.device.move_away(token.caller())?;
        self.device
            .set_exposure(token.caller(), self.params.empty.exposure)?;
        self.device.open_shutter(token.caller())?;
        self.check_source(token).await?;
        for _ in 0..self.params.empty.count {
            self.take_frame(token, FrameMode::Empty).await?;
        }
        self.device.close_shutter(token.caller())?;
        self.device.move_back(token.caller())?;
        Ok(())
    }

    async fn collect_data(&mut self, token: &RunToken) -> TomoResult<()> {
        self.enter(Phase::Data, token);
        let baseline = self.device.angle(token.caller())?;
        self.device
            .set_exposure(token.caller(), self.params.data.exposure)?;
        let delay = self.params.inter_frame_delay();

        self.device.move_back(token.caller())?;
        self.device.open_shutter(token.caller())?;
        for angle in self.params.data_angles(baseline) {
            self.check_source(token).await?;
            self.device.set_angle(token.caller(), angle)?;
            debug!(run_id = %token.run_id(), angle, "Data step");
            for _ in 0..self.params.data.count_per_step {
                self.take_frame(token, FrameMode::Data).await?;
                settle(delay).await;
            }
        }
        self.device.close_shutter(token.caller())?;
        Ok(())
    }

    /// Capture one frame and hand it to dispatch.
    ///
    /// Yields afterwards so dispatch units get to run, and record a stop
    /// cause, between any two captures.
    async fn take_frame(&mut self, token: &RunToken, mode: FrameMode) -> TomoResult<()> {
        let open_shutter = mode != FrameMode::Dark;
        let captured = self
            .device
            .capture_frame(token.caller(), None, open_shutter)?;
        let (number, live_preview) = self.counter.advance();
        debug!(run_id = %token.run_id(), frame = %number, mode = %mode, "Frame captured");
        self.dispatcher.dispatch(FrameRecord {
            experiment_id: token.run_id().to_string(),
            number,
            mode,
            captured_at: Utc::now(),
            snapshot: captured.snapshot,
            raw: captured.raw,
            live_preview,
        })
        .await;
        yield_now().await;
        Ok(())
    }

    /// Source health check with bounded power-cycle recovery.
    ///
    /// Never fails on an unhealthy source: after `max_recovery_attempts`
    /// power cycles the phase continues with a warning. Guard errors still
    /// propagate.
    async fn check_source(&self, token: &RunToken) -> TomoResult<()> {
        let threshold = self.config.source_health_threshold;
        let mut attempts = 0;
        loop {
            let current = self.device.current(token.caller())?;
            let voltage = self.device.voltage(token.caller())?;
            let healthy = matches!(
                (current, voltage),
                (Some(c), Some(v)) if c > threshold && v > threshold
            );
            if healthy {
                return Ok(());
            }
            if attempts >= self.config.max_recovery_attempts {
                warn!(
                    run_id = %token.run_id(),
                    ?current,
                    ?voltage,
                    attempts,
                    "X-ray source still in wrong mode, continuing"
                );
                return Ok(());
            }
            attempts += 1;
            warn!(
                run_id = %token.run_id(),
                ?current,
                ?voltage,
                attempt = attempts,
                "X-ray source in wrong mode, restarting (off/on)"
            );
            self.device.power_off(token.caller())?;
            settle(self.config.source_recovery_settle).await;
            self.device.power_on(token.caller())?;
            settle(self.config.source_recovery_settle).await;
        }
    }
}

async fn settle(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}
