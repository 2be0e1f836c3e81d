//! Frame capture with a scoped shutter interlock.
//!
//! A capture sets the exposure (if given), drives the shutter, reads a
//! [`DeviceSnapshot`] and describes the detector readout as [`RawSamples`].
//! No pixels are produced here.
//!
//! Once admitted, the capture holds a [`ShutterInterlock`] which closes the
//! shutter when it goes out of scope, on success and on every error path.

use std::ops::{Deref, DerefMut};

use tomo_core::document::{DeviceSnapshot, RawSamples};
use tomo_core::error::TomoResult;
use tracing::debug;

use crate::guard::{check_access, Caller};
use crate::state::DeviceState;
use crate::Tomograph;

/// Ingredients of a frame: metadata plus the detector readout handle.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub snapshot: DeviceSnapshot,
    pub raw: RawSamples,
}

/// Closes the shutter when dropped.
struct ShutterInterlock<'a> {
    state: &'a mut DeviceState,
}

impl<'a> ShutterInterlock<'a> {
    fn arm(state: &'a mut DeviceState) -> Self {
        Self { state }
    }
}

impl Deref for ShutterInterlock<'_> {
    type Target = DeviceState;

    fn deref(&self) -> &DeviceState {
        self.state
    }
}

impl DerefMut for ShutterInterlock<'_> {
    fn deref_mut(&mut self) -> &mut DeviceState {
        self.state
    }
}

impl Drop for ShutterInterlock<'_> {
    fn drop(&mut self) {
        self.state.close_shutter();
    }
}

impl Tomograph {
    /// Capture one frame.
    ///
    /// The shutter is left closed afterwards regardless of `open_shutter` or
    /// the outcome. Validation errors from the exposure propagate unchanged;
    /// a snapshot that breaks the frame contract yields
    /// [`TomoError::FrameFormat`](tomo_core::TomoError::FrameFormat).
    pub fn capture_frame(
        &self,
        caller: Caller<'_>,
        exposure: Option<f64>,
        open_shutter: bool,
    ) -> TomoResult<CapturedFrame> {
        let shared = self.shared();
        let mut inner = shared.inner.lock();
        check_access(inner.owner.as_ref(), caller)?;

        let mut interlock = ShutterInterlock::arm(&mut inner.state);

        if let Some(exposure) = exposure {
            interlock.set_exposure(exposure)?;
        }
        if open_shutter {
            interlock.open_shutter();
        } else {
            interlock.close_shutter();
        }

        let snapshot = interlock.snapshot();
        snapshot.validate()?;

        let (width, height) = interlock.detector_size();

        let lit = interlock.shutter_open() && interlock.source_on();
        let max_value = shared.rng.signal_ceiling(lit);
        let raw = RawSamples {
            width,
            height,
            seed: shared.rng.readout_seed(),
            max_value,
        };

        debug!(
            exposure = snapshot.exposure,
            angle = snapshot.object.angle,
            shutter_open = snapshot.shutter.open,
            max_value,
            "Frame captured"
        );

        Ok(CapturedFrame { snapshot, raw })
    }
}
