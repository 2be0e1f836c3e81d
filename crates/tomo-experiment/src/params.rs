//! Experiment parameter document and admission validation.
//!
//! The start request carries a JSON document:
//!
//! ```json
//! { "exp_id": "scan-1", "advanced": false,
//!   "DARK":  { "count": 1, "exposure": 1.0 },
//!   "EMPTY": { "count": 1, "exposure": 1.0 },
//!   "DATA":  { "step count": 1, "exposure": 1.0, "angle step": 0.0,
//!              "count per step": 1, "delay": 0 } }
//! ```
//!
//! Structural problems in a section are reported as
//! `Incorrect format in '<SECTION>' parameters`; well-typed but unusable
//! values as `Bad parameters in '<SECTION>' parameters`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tomo_core::error::{TomoError, TomoResult};
use tomo_driver_mock::state::{normalize_angle, EXPOSURE_RANGE};

/// Exposure and frame count of the DARK or EMPTY phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureSection {
    pub count: u64,
    pub exposure: f64,
}

/// Rotation scan settings of the DATA phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(rename = "step count")]
    pub step_count: u64,
    pub exposure: f64,
    #[serde(rename = "angle step")]
    pub angle_step: f64,
    #[serde(rename = "count per step")]
    pub count_per_step: u64,
    /// Pause after each data frame, in seconds
    pub delay: f64,
}

/// Validated parameters of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentParams {
    pub exp_id: String,
    pub advanced: bool,
    #[serde(rename = "DARK")]
    pub dark: ExposureSection,
    #[serde(rename = "EMPTY")]
    pub empty: ExposureSection,
    #[serde(rename = "DATA")]
    pub data: DataSection,
    #[serde(skip)]
    total_frames: u64,
    #[serde(skip)]
    delay: Duration,
}

fn section<T: DeserializeOwned>(doc: &Value, name: &str) -> TomoResult<T> {
    doc.get(name)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(|| {
            TomoError::validation(format!("Incorrect format in '{}' parameters", name))
        })
}

fn bad_parameters(name: &str) -> TomoError {
    TomoError::validation(format!("Bad parameters in '{}' parameters", name))
}

fn check_exposure(name: &str, exposure: f64) -> TomoResult<()> {
    let (min, max) = EXPOSURE_RANGE;
    if exposure >= min && exposure <= max {
        Ok(())
    } else {
        Err(bad_parameters(name))
    }
}

impl ExperimentParams {
    /// Parse and validate a start request body.
    pub fn from_json(body: &str) -> TomoResult<Self> {
        let doc: Value = serde_json::from_str(body)
            .map_err(|e| TomoError::validation(format!("Parameters are not JSON: {}", e)))?;
        Self::from_value(&doc)
    }

    /// Validate an already parsed document.
    pub fn from_value(doc: &Value) -> TomoResult<Self> {
        if !doc.is_object() {
            return Err(TomoError::validation("Incorrect format of keywords"));
        }
        let (exp_id, advanced) = match (doc.get("exp_id"), doc.get("advanced")) {
            (Some(Value::String(id)), Some(Value::Bool(advanced))) => (id.clone(), *advanced),
            (Some(_), Some(_)) => {
                return Err(TomoError::validation("Incorrect format: incorrect types"));
            }
            _ => return Err(TomoError::validation("Incorrect format of keywords")),
        };
        if exp_id.trim().is_empty() {
            return Err(TomoError::validation("Experiment id must not be empty"));
        }
        if advanced {
            return Err(TomoError::validation(
                "Advanced mode (instruction scripts) is not supported",
            ));
        }

        let dark: ExposureSection = section(doc, "DARK")?;
        let empty: ExposureSection = section(doc, "EMPTY")?;
        let data: DataSection = section(doc, "DATA")?;

        if !data.angle_step.is_finite() {
            return Err(bad_parameters("DATA"));
        }
        let delay =
            Duration::try_from_secs_f64(data.delay).map_err(|_| bad_parameters("DATA"))?;
        check_exposure("DARK", dark.exposure)?;
        check_exposure("EMPTY", empty.exposure)?;
        check_exposure("DATA", data.exposure)?;

        let total_frames = data
            .step_count
            .checked_mul(data.count_per_step)
            .and_then(|n| n.checked_add(dark.count))
            .and_then(|n| n.checked_add(empty.count))
            .ok_or_else(|| bad_parameters("DATA"))?;

        Ok(Self {
            exp_id,
            advanced,
            dark,
            empty,
            data,
            total_frames,
            delay,
        })
    }

    /// Document form, as forwarded to storage with the start notification.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Frames the run will capture across all phases.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Digits used to zero-pad frame numbers: the width of `total - 1`.
    pub fn number_width(&self) -> usize {
        self.total_frames.saturating_sub(1).to_string().len()
    }

    /// Target angles of the DATA phase, starting from `baseline`.
    ///
    /// Each angle is rounded to two decimals before wrapping into [0, 360).
    pub fn data_angles(&self, baseline: f64) -> impl Iterator<Item = f64> {
        let step = self.data.angle_step;
        (0..self.data.step_count).map(move |i| {
            let angle = i as f64 * step + baseline;
            normalize_angle((angle * 100.0).round() / 100.0)
        })
    }

    pub fn inter_frame_delay(&self) -> Duration {
        self.delay
    }
}
