//! Simulated tomograph device handle.
//!
//! [`Tomograph`] is a cheap-to-clone handle to one instrument. Physical state
//! and run ownership live behind a single lock, so the access check and the
//! operation it admits happen atomically.
//!
//! # Example
//!
//! ```rust
//! use tomo_core::TomographConfig;
//! use tomo_driver_mock::{Caller, Tomograph};
//!
//! let device = Tomograph::new(&TomographConfig::instant());
//! device.set_voltage(Caller::External, 40.0)?;
//!
//! let token = device.acquire("run-1")?;
//! assert!(device.set_voltage(Caller::External, 30.0).is_err());
//! device.set_voltage(token.caller(), 30.0)?;
//! # Ok::<(), tomo_core::TomoError>(())
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tomo_core::config::DeviceConfig;
use tomo_core::document::DeviceSnapshot;
use tomo_core::error::{TomoError, TomoResult};
use tomo_core::TomographConfig;
use tracing::{debug, info};

use crate::common::MockRng;
use crate::guard::{check_access, Caller, RunControl, RunToken};
use crate::state::DeviceState;

/// Ownership status reported by [`Tomograph::state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Ready,
    Experiment { run_id: String },
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "ready"),
            DeviceStatus::Experiment { run_id } => write!(f, "experiment {}", run_id),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) state: DeviceState,
    pub(crate) owner: Option<Arc<RunControl>>,
}

pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) rng: MockRng,
    config: DeviceConfig,
}

/// Handle to one simulated instrument.
#[derive(Clone)]
pub struct Tomograph {
    shared: Arc<Shared>,
}

impl Tomograph {
    pub fn new(config: &TomographConfig) -> Self {
        let device = config.device.clone();
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: DeviceState::new(&device),
                    owner: None,
                }),
                rng: MockRng::new(device.rng_seed),
                config: device,
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Run `f` on the device state once `caller` has been admitted.
    fn with_state<T>(
        &self,
        caller: Caller<'_>,
        op: &'static str,
        f: impl FnOnce(&mut DeviceState) -> TomoResult<T>,
    ) -> TomoResult<T> {
        let mut inner = self.shared.inner.lock();
        check_access(inner.owner.as_ref(), caller)?;
        let result = f(&mut inner.state);
        match &result {
            Ok(_) => debug!(op, "Device operation"),
            Err(e) => debug!(op, error = %e, "Device operation rejected"),
        }
        result
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Current ownership status. Never guarded.
    pub fn state(&self) -> DeviceStatus {
        match &self.shared.inner.lock().owner {
            Some(owner) => DeviceStatus::Experiment {
                run_id: owner.run_id().to_string(),
            },
            None => DeviceStatus::Ready,
        }
    }

    /// Claim the device for a run.
    ///
    /// The idle check and the claim happen under one lock. Fails with
    /// [`TomoError::DeviceBusy`] if another run already owns the device.
    pub fn acquire(&self, run_id: impl Into<String>) -> TomoResult<RunToken> {
        let mut inner = self.shared.inner.lock();
        if inner.owner.is_some() {
            return Err(TomoError::DeviceBusy);
        }
        let control = Arc::new(RunControl::new(run_id));
        inner.owner = Some(Arc::clone(&control));
        info!(run_id = %control.run_id(), "Device ownership acquired");
        Ok(RunToken::new(control, Arc::clone(&self.shared)))
    }

    /// Close the shutter and power the source off for the owning run,
    /// regardless of its stop flag.
    ///
    /// Used on the abort path, where every guarded call would re-raise the
    /// stop cause. Does nothing if `token` does not own the device.
    pub fn secure(&self, token: &RunToken) {
        let mut inner = self.shared.inner.lock();
        if inner.owner.as_ref().is_some_and(|owner| token.is(owner)) {
            inner.state.close_shutter();
            inner.state.power_off();
            info!(run_id = %token.run_id(), "Device secured");
        }
    }

    // =========================================================================
    // Source
    // =========================================================================

    pub fn power_on(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "power_on", |s| {
            s.power_on();
            Ok(())
        })
    }

    pub fn power_off(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "power_off", |s| {
            s.power_off();
            Ok(())
        })
    }

    pub fn source_on(&self, caller: Caller<'_>) -> TomoResult<bool> {
        self.with_state(caller, "source_on", |s| Ok(s.source_on()))
    }

    pub fn set_voltage(&self, caller: Caller<'_>, voltage: f64) -> TomoResult<()> {
        self.with_state(caller, "set_voltage", |s| s.set_voltage(voltage))
    }

    pub fn set_current(&self, caller: Caller<'_>, current: f64) -> TomoResult<()> {
        self.with_state(caller, "set_current", |s| s.set_current(current))
    }

    pub fn voltage(&self, caller: Caller<'_>) -> TomoResult<Option<f64>> {
        self.with_state(caller, "voltage", |s| Ok(s.voltage()))
    }

    pub fn current(&self, caller: Caller<'_>) -> TomoResult<Option<f64>> {
        self.with_state(caller, "current", |s| Ok(s.current()))
    }

    // =========================================================================
    // Shutter
    // =========================================================================

    pub fn open_shutter(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "open_shutter", |s| {
            s.open_shutter();
            Ok(())
        })
    }

    pub fn close_shutter(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "close_shutter", |s| {
            s.close_shutter();
            Ok(())
        })
    }

    pub fn shutter_open(&self, caller: Caller<'_>) -> TomoResult<bool> {
        self.with_state(caller, "shutter_open", |s| Ok(s.shutter_open()))
    }

    // =========================================================================
    // Motors
    // =========================================================================

    pub fn set_x(&self, caller: Caller<'_>, x: f64) -> TomoResult<()> {
        self.with_state(caller, "set_x", |s| s.set_x(x))
    }

    pub fn set_y(&self, caller: Caller<'_>, y: f64) -> TomoResult<()> {
        self.with_state(caller, "set_y", |s| s.set_y(y))
    }

    pub fn set_angle(&self, caller: Caller<'_>, angle: f64) -> TomoResult<()> {
        self.with_state(caller, "set_angle", |s| s.set_angle(angle))
    }

    pub fn x(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "x", |s| Ok(s.x()))
    }

    pub fn y(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "y", |s| Ok(s.y()))
    }

    pub fn angle(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "angle", |s| Ok(s.angle()))
    }

    pub fn reset_angle(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "reset_angle", |s| {
            s.reset_angle();
            Ok(())
        })
    }

    pub fn move_away(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "move_away", |s| {
            s.move_away();
            Ok(())
        })
    }

    pub fn move_back(&self, caller: Caller<'_>) -> TomoResult<()> {
        self.with_state(caller, "move_back", |s| {
            s.move_back();
            Ok(())
        })
    }

    pub fn object_present(&self, caller: Caller<'_>) -> TomoResult<bool> {
        self.with_state(caller, "object_present", |s| Ok(s.object_present()))
    }

    // =========================================================================
    // Detector
    // =========================================================================

    pub fn set_exposure(&self, caller: Caller<'_>, exposure: f64) -> TomoResult<()> {
        self.with_state(caller, "set_exposure", |s| s.set_exposure(exposure))
    }

    pub fn exposure(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "exposure", |s| Ok(s.exposure()))
    }

    pub fn chip_temp(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "chip_temp", |s| Ok(s.chip_temp()))
    }

    pub fn hous_temp(&self, caller: Caller<'_>) -> TomoResult<f64> {
        self.with_state(caller, "hous_temp", |s| Ok(s.hous_temp()))
    }

    /// Full metadata bundle of the current state.
    pub fn snapshot(&self, caller: Caller<'_>) -> TomoResult<DeviceSnapshot> {
        self.with_state(caller, "snapshot", |s| Ok(s.snapshot()))
    }
}

impl std::fmt::Debug for Tomograph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tomograph")
            .field("status", &self.state())
            .finish()
    }
}
