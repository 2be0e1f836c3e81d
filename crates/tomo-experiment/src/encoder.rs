//! Frame encoder seam.
//!
//! Dispatch units hand the detector's [`RawSamples`] to a [`FrameEncoder`]
//! and forward the resulting bytes to storage. Encoding is CPU-bound and
//! synchronous; dispatch runs it on the blocking pool.

use bytes::{BufMut, Bytes, BytesMut};
use tomo_core::document::RawSamples;
use tomo_core::error::{TomoError, TomoResult};
use tomo_driver_mock::{render_readout, ErrorConfig};

/// Turns raw detector samples into a storable payload.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, raw: &RawSamples) -> TomoResult<Bytes>;
}

/// Magic bytes opening every [`PatternEncoder`] payload.
pub const PATTERN_MAGIC: &[u8; 4] = b"TOMO";

/// Size of the payload header in bytes.
pub const HEADER_LEN: usize = 4 + 4 + 4 + 2;

/// Largest frame accepted by default (pixels).
pub const DEFAULT_MAX_PIXELS: u64 = 4096 * 4096;

/// In-process encoder rendering the simulated readout.
///
/// Payload layout, all little-endian:
///
/// ```text
/// "TOMO" | width: u32 | height: u32 | max_value: u16 | pixels: [u16; width * height]
/// ```
#[derive(Debug, Clone)]
pub struct PatternEncoder {
    max_pixels: u64,
    errors: ErrorConfig,
}

impl PatternEncoder {
    pub fn new() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
            errors: ErrorConfig::none(),
        }
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Inject faults on the `encode` operation.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    fn check(&self, raw: &RawSamples) -> TomoResult<()> {
        if raw.width == 0 || raw.height == 0 {
            return Err(TomoError::encode(format!(
                "empty frame {}x{}",
                raw.width, raw.height
            )));
        }
        let pixels = u64::from(raw.width) * u64::from(raw.height);
        if pixels > self.max_pixels {
            return Err(TomoError::encode(format!(
                "frame of {} pixels exceeds limit of {}",
                pixels, self.max_pixels
            )));
        }
        if raw.max_value == 0 {
            return Err(TomoError::encode("zero dynamic range"));
        }
        Ok(())
    }
}

impl Default for PatternEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder for PatternEncoder {
    fn encode(&self, raw: &RawSamples) -> TomoResult<Bytes> {
        self.errors
            .check_operation("pattern_encoder", "encode")
            .map_err(|fault| TomoError::encode(fault.to_string()))?;
        self.check(raw)?;

        let pixels = render_readout(raw);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + pixels.len() * 2);
        buf.put_slice(PATTERN_MAGIC);
        buf.put_u32_le(raw.width);
        buf.put_u32_le(raw.height);
        buf.put_u16_le(raw.max_value);
        for pixel in pixels {
            buf.put_u16_le(pixel);
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomo_core::error::ENCODE_ERROR;
    use tomo_driver_mock::ErrorScenario;

    fn raw(width: u32, height: u32, max_value: u16) -> RawSamples {
        RawSamples {
            width,
            height,
            seed: 11,
            max_value,
        }
    }

    #[test]
    fn test_payload_layout() {
        let payload = PatternEncoder::new().encode(&raw(8, 4, 2000)).unwrap();
        assert_eq!(payload.len(), HEADER_LEN + 8 * 4 * 2);
        assert_eq!(&payload[..4], PATTERN_MAGIC);
        assert_eq!(u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]), 8);
        assert_eq!(u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]), 4);
        assert_eq!(u16::from_le_bytes([payload[12], payload[13]]), 2000);
    }

    #[test]
    fn test_malformed_inputs() {
        let encoder = PatternEncoder::new().with_max_pixels(100);
        for bad in [raw(0, 4, 10), raw(11, 10, 10), raw(4, 4, 0)] {
            let err = encoder.encode(&bad).unwrap_err();
            assert_eq!(err.error(), ENCODE_ERROR);
        }
    }

    #[test]
    fn test_injected_fault() {
        let encoder = PatternEncoder::new().with_errors(ErrorConfig::scenario(
            ErrorScenario::FailOnce {
                operation: "encode",
                index: 1,
            },
        ));
        assert!(encoder.encode(&raw(4, 4, 100)).is_ok());
        let err = encoder.encode(&raw(4, 4, 100)).unwrap_err();
        assert!(matches!(err, TomoError::Encode { .. }));
        assert!(err.detail().contains("pattern_encoder"));
        assert!(encoder.encode(&raw(4, 4, 100)).is_ok());
    }
}
