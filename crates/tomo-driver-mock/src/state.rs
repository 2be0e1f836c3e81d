//! Physical state of the simulated tomograph.
//!
//! [`DeviceState`] owns every physical field and exposes only validated
//! setters. A rejected value leaves the state untouched. Access control is
//! not handled here; see [`crate::guard`].

use chrono::Utc;
use tomo_core::config::{AxisLimits, DeviceConfig};
use tomo_core::document::{
    DetectorRecord, DeviceSnapshot, ObjectRecord, ShutterRecord, SourceRecord,
};
use tomo_core::error::{TomoError, TomoResult};

/// Accepted tube voltage range (kV).
pub const VOLTAGE_RANGE: (f64, f64) = (2.0, 60.0);

/// Accepted tube current range (mA).
pub const CURRENT_RANGE: (f64, f64) = (2.0, 80.0);

/// Accepted exposure range (ms).
pub const EXPOSURE_RANGE: (f64, f64) = (0.1, 16000.0);

const DEFAULT_EXPOSURE: f64 = 100.0;

/// Map any finite angle into `[0, 360)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

fn check_range(name: &str, unit: &str, value: f64, (min, max): (f64, f64)) -> TomoResult<()> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(TomoError::validation(format!(
            "{} must be in [{}, {}] {}, got {}",
            name, min, max, unit, value
        )))
    }
}

fn check_axis(name: &str, value: f64, limits: AxisLimits) -> TomoResult<()> {
    if value.is_finite() && limits.contains(value) {
        Ok(())
    } else {
        Err(TomoError::validation(format!(
            "{} position must be in [{}, {}], got {}",
            name, limits.min, limits.max, value
        )))
    }
}

/// Mutable physical state of one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    source_on: bool,
    voltage: Option<f64>,
    current: Option<f64>,
    shutter_open: bool,
    x: f64,
    y: f64,
    angle: f64,
    exposure: f64,
    chip_temp: f64,
    hous_temp: f64,
    object_present: bool,
    saved_x: Option<f64>,
    x_limits: AxisLimits,
    y_limits: AxisLimits,
    away_offset: f64,
    detector: (u32, u32),
}

impl DeviceState {
    /// Fresh instrument: source off, shutter closed, object in the beam.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            source_on: false,
            voltage: None,
            current: None,
            shutter_open: false,
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            exposure: DEFAULT_EXPOSURE,
            chip_temp: config.chip_temp,
            hous_temp: config.hous_temp,
            object_present: true,
            saved_x: None,
            x_limits: config.x_limits,
            y_limits: config.y_limits,
            away_offset: config.away_offset,
            detector: (config.detector_width, config.detector_height),
        }
    }

    // -- Source -------------------------------------------------------------

    pub fn power_on(&mut self) {
        self.source_on = true;
    }

    pub fn power_off(&mut self) {
        self.source_on = false;
    }

    pub fn source_on(&self) -> bool {
        self.source_on
    }

    pub fn set_voltage(&mut self, voltage: f64) -> TomoResult<()> {
        check_range("Voltage", "kV", voltage, VOLTAGE_RANGE)?;
        self.voltage = Some(voltage);
        Ok(())
    }

    pub fn set_current(&mut self, current: f64) -> TomoResult<()> {
        check_range("Current", "mA", current, CURRENT_RANGE)?;
        self.current = Some(current);
        Ok(())
    }

    /// Voltage setpoint, `None` until first set.
    pub fn voltage(&self) -> Option<f64> {
        self.voltage
    }

    /// Current setpoint, `None` until first set.
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    // -- Shutter ------------------------------------------------------------

    pub fn open_shutter(&mut self) {
        self.shutter_open = true;
    }

    pub fn close_shutter(&mut self) {
        self.shutter_open = false;
    }

    pub fn shutter_open(&self) -> bool {
        self.shutter_open
    }

    // -- Motors -------------------------------------------------------------

    pub fn set_x(&mut self, x: f64) -> TomoResult<()> {
        check_axis("Horizontal", x, self.x_limits)?;
        self.x = x;
        Ok(())
    }

    pub fn set_y(&mut self, y: f64) -> TomoResult<()> {
        check_axis("Vertical", y, self.y_limits)?;
        self.y = y;
        Ok(())
    }

    pub fn set_angle(&mut self, angle: f64) -> TomoResult<()> {
        if !angle.is_finite() {
            return Err(TomoError::validation(format!(
                "Angle must be a finite number, got {}",
                angle
            )));
        }
        self.angle = normalize_angle(angle);
        Ok(())
    }

    pub fn reset_angle(&mut self) {
        self.angle = 0.0;
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn object_present(&self) -> bool {
        self.object_present
    }

    /// Horizontal position held while the object is out of the beam.
    pub fn saved_x(&self) -> Option<f64> {
        self.saved_x
    }

    /// Move the object out of the beam. No-op when it is already away.
    pub fn move_away(&mut self) {
        if !self.object_present {
            return;
        }
        self.saved_x = Some(self.x);
        self.x += self.away_offset;
        self.object_present = false;
    }

    /// Return the object to its saved position. No-op when it is present.
    pub fn move_back(&mut self) {
        if self.object_present {
            return;
        }
        if let Some(x) = self.saved_x.take() {
            self.x = x;
        }
        self.object_present = true;
    }

    // -- Detector -----------------------------------------------------------

    /// Set exposure; stored rounded to an integer.
    pub fn set_exposure(&mut self, exposure: f64) -> TomoResult<()> {
        check_range("Exposure", "ms", exposure, EXPOSURE_RANGE)?;
        self.exposure = exposure.round();
        Ok(())
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn chip_temp(&self) -> f64 {
        self.chip_temp
    }

    pub fn hous_temp(&self) -> f64 {
        self.hous_temp
    }

    pub fn detector_size(&self) -> (u32, u32) {
        self.detector
    }

    /// Metadata bundle describing the current state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            timestamp: Utc::now(),
            exposure: self.exposure,
            detector: DetectorRecord {
                width: self.detector.0,
                height: self.detector.1,
                chip_temp: self.chip_temp,
                hous_temp: self.hous_temp,
            },
            object: ObjectRecord {
                present: self.object_present,
                x: self.x,
                y: self.y,
                angle: self.angle,
            },
            shutter: ShutterRecord {
                open: self.shutter_open,
            },
            source: SourceRecord {
                on: self.source_on,
                voltage: self.voltage,
                current: self.current,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state() -> DeviceState {
        DeviceState::new(&DeviceConfig::default())
    }

    #[test]
    fn test_initial_state() {
        let s = state();
        assert!(!s.source_on());
        assert!(!s.shutter_open());
        assert!(s.object_present());
        assert_eq!(s.saved_x(), None);
        assert_eq!(s.voltage(), None);
    }

    #[test]
    fn test_current_bounds() {
        let mut s = state();
        assert!(s.set_current(2.0).is_ok());
        assert!(s.set_current(80.0).is_ok());
        assert!(s.set_current(80.5).is_err());
        assert_eq!(s.current(), Some(80.0));
    }

    #[test]
    fn test_exposure_rounding() {
        let mut s = state();
        s.set_exposure(12.6).unwrap();
        assert_eq!(s.exposure(), 13.0);
        assert!(s.set_exposure(0.05).is_err());
        assert!(s.set_exposure(16000.1).is_err());
        assert_eq!(s.exposure(), 13.0);
    }

    #[test]
    fn test_axis_limits() {
        let mut s = state();
        assert!(s.set_x(4999.0).is_ok());
        let err = s.set_x(5001.0).unwrap_err();
        assert!(matches!(err, TomoError::Validation(_)));
        assert_eq!(s.x(), 4999.0);
        assert!(s.set_y(f64::NAN).is_err());
        assert_eq!(s.y(), 0.0);
    }

    #[test]
    fn test_move_away_and_back() {
        let mut s = state();
        s.set_x(12.5).unwrap();
        s.move_away();
        assert!(!s.object_present());
        assert_eq!(s.saved_x(), Some(12.5));
        let away_x = s.x();

        // Second move_away is a no-op
        s.move_away();
        assert_eq!(s.x(), away_x);
        assert_eq!(s.saved_x(), Some(12.5));

        s.move_back();
        assert!(s.object_present());
        assert_eq!(s.x(), 12.5);
        assert_eq!(s.saved_x(), None);

        // Second move_back is a no-op
        s.move_back();
        assert_eq!(s.x(), 12.5);
    }

    #[test]
    fn test_normalize_angle_edges() {
        assert_eq!(normalize_angle(360.0), 0.0);
        assert_eq!(normalize_angle(-90.0), 270.0);
        assert_eq!(normalize_angle(725.0), 5.0);
        assert!(normalize_angle(-1e-20) < 360.0);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut s = state();
        s.power_on();
        s.set_voltage(40.0).unwrap();
        s.open_shutter();
        let snap = s.snapshot();
        assert!(snap.source.on);
        assert_eq!(snap.source.voltage, Some(40.0));
        assert!(snap.shutter.open);
        assert!(snap.validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_voltage_accepted_iff_in_range(v in -100.0f64..200.0) {
            let mut s = state();
            s.set_voltage(30.0).unwrap();
            let result = s.set_voltage(v);
            if (2.0..=60.0).contains(&v) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(s.voltage(), Some(v));
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(s.voltage(), Some(30.0));
            }
        }

        #[test]
        fn prop_angle_normalized(a in -1.0e6f64..1.0e6) {
            let mut s = state();
            s.set_angle(a).unwrap();
            let stored = s.angle();
            prop_assert!((0.0..360.0).contains(&stored));
            prop_assert_eq!(stored, normalize_angle(a));
        }

        #[test]
        fn prop_saved_x_iff_away(ops in proptest::collection::vec(any::<bool>(), 0..20)) {
            let mut s = state();
            s.set_x(3.0).unwrap();
            for away in ops {
                if away { s.move_away() } else { s.move_back() }
                prop_assert_eq!(s.saved_x().is_some(), !s.object_present());
            }
            s.move_back();
            prop_assert_eq!(s.x(), 3.0);
        }
    }
}
