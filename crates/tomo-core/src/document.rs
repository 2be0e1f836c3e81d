//! Document model for frames and run outcomes.
//!
//! Every captured frame produces one [`FrameRecord`]; every run ends with
//! exactly one [`TerminalEvent`]. Both serialize to the JSON layout the
//! storage endpoint expects.
//!
//! ```text
//! StorageEvent::Started (1)
//!    │
//!    ├── FrameRecord (N, dark → empty → data)
//!    │
//! TerminalEvent (1, success | emergency_stop)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TomoError, TomoResult};

/// Message attached to a run that finished every phase.
pub const SUCCESSFUL_STOP_MSG: &str = "Experiment was finished successfully";

/// Message attached to a run interrupted by a failure.
pub const EMERGENCY_STOP_MSG: &str = "Experiment was emergency stopped";

// =============================================================================
// Device Snapshot
// =============================================================================

/// Source sub-record of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub on: bool,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

/// Shutter sub-record of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutterRecord {
    pub open: bool,
}

/// Object (motor) sub-record of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub present: bool,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

/// Detector sub-record of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRecord {
    pub width: u32,
    pub height: u32,
    pub chip_temp: f64,
    pub hous_temp: f64,
}

/// Metadata bundle read from the device at capture time.
///
/// Holds no pixel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub exposure: f64,
    pub detector: DetectorRecord,
    pub object: ObjectRecord,
    pub shutter: ShutterRecord,
    pub source: SourceRecord,
}

impl DeviceSnapshot {
    /// Check the snapshot against the frame contract.
    pub fn validate(&self) -> TomoResult<()> {
        if self.detector.width == 0 || self.detector.height == 0 {
            return Err(TomoError::FrameFormat(format!(
                "detector geometry {}x{} is empty",
                self.detector.width, self.detector.height
            )));
        }
        let numbers = [
            ("exposure", self.exposure),
            ("chip_temp", self.detector.chip_temp),
            ("hous_temp", self.detector.hous_temp),
            ("x", self.object.x),
            ("y", self.object.y),
            ("angle", self.object.angle),
        ];
        if let Some((name, value)) = numbers.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TomoError::FrameFormat(format!(
                "field '{}' is not finite ({})",
                name, value
            )));
        }
        if !(0.0..360.0).contains(&self.object.angle) {
            return Err(TomoError::FrameFormat(format!(
                "angle {} outside [0, 360)",
                self.object.angle
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Opaque handle to the detector's raw samples.
///
/// The detector only describes the readout; turning it into pixels is the
/// frame encoder's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSamples {
    pub width: u32,
    pub height: u32,
    /// Seed for the simulated readout noise
    pub seed: u64,
    /// Upper bound of the simulated signal
    pub max_value: u16,
}

/// Acquisition phase a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    Dark,
    Empty,
    Data,
}

impl std::fmt::Display for FrameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameMode::Dark => write!(f, "dark"),
            FrameMode::Empty => write!(f, "empty"),
            FrameMode::Data => write!(f, "data"),
        }
    }
}

/// One captured frame, handed to dispatch right after capture.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub experiment_id: String,
    /// Zero-padded sequence number across all phases
    pub number: String,
    pub mode: FrameMode,
    pub captured_at: DateTime<Utc>,
    pub snapshot: DeviceSnapshot,
    pub raw: RawSamples,
    /// Forward to the live preview as well as to storage
    pub live_preview: bool,
}

#[derive(Serialize)]
struct FrameMetadata<'a> {
    #[serde(flatten)]
    snapshot: &'a DeviceSnapshot,
    mode: FrameMode,
    number: &'a str,
    captured_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct FrameEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    exp_id: &'a str,
    frame: FrameMetadata<'a>,
}

impl FrameRecord {
    /// Metadata event sent alongside the encoded payload.
    pub fn metadata_json(&self) -> serde_json::Value {
        let envelope = FrameEnvelope {
            kind: "frame",
            exp_id: &self.experiment_id,
            frame: FrameMetadata {
                snapshot: &self.snapshot,
                mode: self.mode,
                number: &self.number,
                captured_at: self.captured_at,
            },
        };
        serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Terminal Event
// =============================================================================

/// Outcome classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Success,
    EmergencyStop,
}

/// The single outcome message closing out a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
    #[serde(rename = "exp_id")]
    pub experiment_id: String,
    pub kind: TerminalKind,
    pub message: String,
    pub error: Option<String>,
    #[serde(rename = "exception message")]
    pub detail: Option<String>,
}

impl TerminalEvent {
    pub fn success(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            kind: TerminalKind::Success,
            message: SUCCESSFUL_STOP_MSG.to_string(),
            error: None,
            detail: None,
        }
    }

    pub fn emergency_stop(experiment_id: &str, cause: &TomoError) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            kind: TerminalKind::EmergencyStop,
            message: EMERGENCY_STOP_MSG.to_string(),
            error: Some(cause.error()),
            detail: Some(cause.detail()),
        }
    }

    /// Wire form: `{"type": "message", "exp_id": .., "message": .., ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.insert("type".to_string(), "message".into());
            map.insert(
                "error".to_string(),
                self.error.clone().unwrap_or_default().into(),
            );
            map.insert(
                "exception message".to_string(),
                self.detail.clone().unwrap_or_default().into(),
            );
        }
        value
    }
}

// =============================================================================
// Storage Events
// =============================================================================

/// Run-level message posted to the storage sink.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    /// Sent before the sequencer launches; carries the accepted parameters
    Started {
        experiment_id: String,
        params: serde_json::Value,
    },
    /// Sent exactly once when the run ends
    Finished(TerminalEvent),
}

impl StorageEvent {
    pub fn experiment_id(&self) -> &str {
        match self {
            StorageEvent::Started { experiment_id, .. } => experiment_id,
            StorageEvent::Finished(event) => &event.experiment_id,
        }
    }

    /// Body posted to the storage endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StorageEvent::Started { params, .. } => params.clone(),
            StorageEvent::Finished(event) => event.to_json(),
        }
    }
}
