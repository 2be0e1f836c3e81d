//! Simulated detector readout.
//!
//! Turns a [`RawSamples`] description into pixels: a flat field at the
//! signal ceiling, a disc attenuated by the object, and seeded per-pixel
//! noise. The same `RawSamples` always renders the same image.

use tomo_core::document::RawSamples;

/// Simple pseudo-random number generator (LCG) for reproducible noise.
/// Uses the same algorithm as glibc for predictable cross-platform behavior.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Fraction of the flat field transmitted through the object.
const TRANSMISSION: f64 = 0.45;

/// Renders a detector readout as row-major 16-bit pixels.
///
/// - Flat field at ~90% of `max_value`
/// - Centered disc (radius 1/3 of the short side) at `TRANSMISSION` of the field
/// - Noise of roughly ±3% of `max_value`
pub fn render_readout(raw: &RawSamples) -> Vec<u16> {
    let w = raw.width as usize;
    let h = raw.height as usize;
    let mut buffer = vec![0u16; w * h];

    let ceiling = f64::from(raw.max_value);
    let field = ceiling * 0.9;
    let noise_amplitude = (ceiling * 0.03).max(1.0);

    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let radius = w.min(h) as f64 / 3.0;
    let radius_sq = radius * radius;

    let frame_seed = raw.seed.wrapping_mul(2654435761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;

            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let base = if dx * dx + dy * dy <= radius_sq {
                field * TRANSMISSION
            } else {
                field
            };

            // Map the LCG output into [-1, 1)
            let noise = (prng(frame_seed ^ idx as u64) & 0xFFFF) as f64 / 32768.0 - 1.0;
            let value = (base + noise * noise_amplitude).clamp(0.0, ceiling);
            buffer[idx] = value as u16;
        }
    }

    buffer
}
