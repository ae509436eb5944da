//! Raw reading → volume scalar conversion.
//!
//! Raw readings come from a 10-bit ADC (0-1023). They are mapped to
//! `[0.0, 1.0]`, truncated to two decimals and snapped onto the exact
//! extremes so a slider parked at either end doesn't jitter forever.

use crate::protocol::MAX_RAW_READING;

/// Distance under which two scalars are considered equal
const EDGE_EPSILON: f32 = 0.000_001;

/// Map a raw reading to a normalized scalar with two points of precision
pub fn normalize_reading(raw: u16) -> f32 {
    let dirty = raw.min(MAX_RAW_READING) as f32 / MAX_RAW_READING as f32;
    normalize_scalar(dirty)
}

/// Truncate to two decimals and snap near-extremes onto 0.0 / 1.0
pub fn normalize_scalar(value: f32) -> f32 {
    let truncated = ((value as f64 * 100.0).floor() / 100.0) as f32;

    if almost_equals(truncated, 0.0) {
        0.0
    } else if almost_equals(truncated, 1.0) {
        1.0
    } else {
        truncated.clamp(0.0, 1.0)
    }
}

/// Whether `new` differs enough from `old` to be treated as a real move
///
/// Reaching an extreme always counts, even below the threshold, so a
/// slider pushed all the way down really does mute its targets.
pub fn significantly_different(old: f32, new: f32, threshold: f32) -> bool {
    if (old - new).abs() >= threshold {
        return true;
    }

    (almost_equals(new, 1.0) && !almost_equals(old, 1.0))
        || (almost_equals(new, 0.0) && !almost_equals(old, 0.0))
}

fn almost_equals(a: f32, b: f32) -> bool {
    (a - b).abs() < EDGE_EPSILON
}
