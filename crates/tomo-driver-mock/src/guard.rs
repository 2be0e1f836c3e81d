//! Access guard for the simulated tomograph.
//!
//! Ownership of a [`Tomograph`](crate::Tomograph) is represented by a
//! [`RunToken`]. Exactly one token can exist per device; it is minted by
//! [`Tomograph::acquire`](crate::Tomograph::acquire) and gives ownership back
//! when dropped.
//!
//! Every device operation names its [`Caller`]:
//!
//! - [`Caller::External`] is rejected with [`TomoError::DeviceBusy`] while a
//!   run owns the device.
//! - [`Caller::Run`] is admitted only for the owning run, and only while its
//!   stop slot is empty. Once a dispatch unit has recorded a stop cause, the
//!   next call re-raises that cause verbatim.
//!
//! The check itself ([`check_access`]) never mutates anything.

use std::sync::{Arc, OnceLock};

use tomo_core::error::{TomoError, TomoResult};
use tracing::{info, warn};

use crate::tomograph::Shared;

/// Per-run control block shared between the sequencer and its dispatch units.
#[derive(Debug)]
pub struct RunControl {
    run_id: String,
    stop_cause: OnceLock<TomoError>,
}

impl RunControl {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stop_cause: OnceLock::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record why the run must stop. First failure wins.
    ///
    /// Returns `true` if this call set the cause, `false` if the run was
    /// already stopping and `cause` was dropped.
    pub fn request_stop(&self, cause: TomoError) -> bool {
        let first = self.stop_cause.set(cause.clone()).is_ok();
        if first {
            warn!(run_id = %self.run_id, error = %cause, "Stop requested");
        }
        first
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_cause.get().is_some()
    }

    pub fn stop_cause(&self) -> Option<&TomoError> {
        self.stop_cause.get()
    }
}

/// Exclusive ownership of one device by one run.
///
/// Not `Clone`: there is exactly one writer per device. Dispatch units get
/// the [`RunControl`] instead, which lets them stop the run but not drive
/// the device.
pub struct RunToken {
    control: Arc<RunControl>,
    shared: Arc<Shared>,
}

impl RunToken {
    pub(crate) fn new(control: Arc<RunControl>, shared: Arc<Shared>) -> Self {
        Self { control, shared }
    }

    pub fn run_id(&self) -> &str {
        self.control.run_id()
    }

    /// Handle for dispatch units to record a stop cause.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn stop_requested(&self) -> bool {
        self.control.stop_requested()
    }

    pub fn stop_cause(&self) -> Option<TomoError> {
        self.control.stop_cause().cloned()
    }

    /// Shorthand for `Caller::Run(self)`.
    pub fn caller(&self) -> Caller<'_> {
        Caller::Run(self)
    }

    pub(crate) fn is(&self, owner: &Arc<RunControl>) -> bool {
        Arc::ptr_eq(&self.control, owner)
    }
}

impl std::fmt::Debug for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunToken")
            .field("run_id", &self.control.run_id())
            .field("stop_requested", &self.control.stop_requested())
            .finish()
    }
}

impl Drop for RunToken {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if inner.owner.as_ref().is_some_and(|owner| self.is(owner)) {
            inner.owner = None;
            info!(run_id = %self.control.run_id(), "Device ownership released");
        }
    }
}

/// Who is issuing a device command.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    /// Operator or remote client, never allowed while a run owns the device
    External,
    /// The sequencer of the run holding this token
    Run(&'a RunToken),
}

/// Admission gate invoked before every device state access.
pub fn check_access(owner: Option<&Arc<RunControl>>, caller: Caller<'_>) -> TomoResult<()> {
    match (caller, owner) {
        (Caller::External, None) => Ok(()),
        (Caller::External, Some(_)) => Err(TomoError::DeviceBusy),
        (Caller::Run(token), Some(owner)) if token.is(owner) => match owner.stop_cause() {
            Some(cause) => Err(cause.clone()),
            None => Ok(()),
        },
        (Caller::Run(_), _) => Err(TomoError::DeviceBusy),
    }
}
