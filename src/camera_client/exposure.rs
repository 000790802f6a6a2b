//! Exposure unit conversion
//!
//! The camera service takes exposures as integer microseconds; everything
//! above the client works in seconds.

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Seconds to whole microseconds, rounded to nearest. Negative and NaN
/// inputs clamp to zero.
pub fn seconds_to_micros(seconds: f64) -> u64 {
    let micros = (seconds * MICROS_PER_SECOND).round();
    if micros.is_nan() || micros <= 0.0 {
        0
    } else {
        micros as u64
    }
}

/// Microseconds to seconds
pub fn micros_to_seconds(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_SECOND
}
