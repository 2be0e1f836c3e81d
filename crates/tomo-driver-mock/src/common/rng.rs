//! Seeded randomness for detector readouts and fault injection.
//!
//! One generator per instrument. With `rng_seed` set in the device config a
//! run's readouts and injected failures replay exactly.

use std::ops::RangeInclusive;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Signal ceiling when the source illuminates the detector.
const LIT_SIGNAL: RangeInclusive<u16> = 1000..=65535;

/// Signal ceiling for a dark readout.
const DARK_SIGNAL: RangeInclusive<u16> = 1..=512;

pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate`, clamped to `[0, 1]`.
    pub fn should_fail(&self, rate: f64) -> bool {
        match rate {
            r if r.is_nan() || r <= 0.0 => false,
            r if r >= 1.0 => true,
            r => self.inner.lock().gen_bool(r),
        }
    }

    /// Seed for the pixel pattern of one readout.
    pub fn readout_seed(&self) -> u64 {
        self.inner.lock().gen()
    }

    /// Peak pixel value of one readout.
    pub fn signal_ceiling(&self, lit: bool) -> u16 {
        let range = if lit { LIT_SIGNAL } else { DARK_SIGNAL };
        self.inner.lock().gen_range(range)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MockRng(ChaCha8)")
    }
}
