//! Scalar helpers shared by the effect and capture layers.

/// Clamp with defined behavior for non-finite input: NaN and -inf map to
/// `min`, +inf maps to `max`.
pub fn clamp_f32(x: f32, min: f32, max: f32) -> f32 {
    if x.is_nan() {
        return min;
    }
    if x == f32::INFINITY {
        return max;
    }
    if x == f32::NEG_INFINITY {
        return min;
    }
    x.clamp(min, max)
}

/// Map `x` into [0, 1] relative to `[min, max]`, clamping first.
///
/// A degenerate range (`max <= min`) maps everything to 0.
pub fn normalize_f32(x: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return 0.0;
    }
    (clamp_f32(x, min, max) - min) / (max - min)
}
