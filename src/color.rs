use image::Rgba;

use crate::error::{RectifyError, Result};

const QUANTUM_RANGE: f64 = 255.0;

/// Color-distance tolerance as a percentage of the channel range (0-100).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Fuzz(f64);

impl Fuzz {
    /// Exact color match.
    pub const EXACT: Fuzz = Fuzz(0.0);

    pub fn new(percent: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(RectifyError::out_of_range(
                "fuzz",
                format!("{} is not a percentage between 0 and 100", percent),
            ));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> f64 {
        self.0
    }

    /// Squared tolerance in 8-bit quantum units.
    fn squared_distance(&self) -> f64 {
        let absolute = self.0 / 100.0 * QUANTUM_RANGE;
        absolute * absolute
    }
}

/// Fuzzy color equality.
///
/// Color channels are weighted by their alpha so fully transparent pixels
/// compare equal regardless of their RGB value. The alpha difference is
/// checked first against the fuzz on its own. A zero fuzz means identical.
pub fn fuzzy_eq(a: Rgba<u8>, b: Rgba<u8>, fuzz: Fuzz) -> bool {
    if fuzz.0 == 0.0 {
        return a == b;
    }

    let alpha_a = a[3] as f64 / QUANTUM_RANGE;
    let alpha_b = b[3] as f64 / QUANTUM_RANGE;

    let alpha_diff = a[3] as f64 - b[3] as f64;
    let mut distance = alpha_diff * alpha_diff;
    let mut limit = fuzz.squared_distance();
    if distance > limit {
        return false;
    }

    // Scale so 100% fuzz spans the full RGB cube diagonal.
    distance *= 3.0;
    limit *= 3.0;
    for c in 0..3 {
        let diff = alpha_a * a[c] as f64 - alpha_b * b[c] as f64;
        distance += diff * diff;
        if distance > limit {
            return false;
        }
    }

    true
}
