//! Progress estimation and photo naming

use chrono::{DateTime, Utc};

/// Estimated run duration in seconds. Batch mode only waits for exposures.
pub fn estimated_total_seconds(count: u32, interval_seconds: f64, exposure_seconds: f64) -> f64 {
    (exposure_seconds + interval_seconds) * f64::from(count)
}

/// `min(elapsed / total, 1)`, never negative. A zero estimate is complete.
pub fn progress_fraction(elapsed_seconds: f64, estimated_total_seconds: f64) -> f64 {
    if estimated_total_seconds <= 0.0 {
        return 1.0;
    }
    (elapsed_seconds / estimated_total_seconds).clamp(0.0, 1.0)
}

/// Seconds since `started_at`, clamped at zero
pub fn elapsed_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
    elapsed.max(0.0)
}

/// `{timestamp}_seq{NNNN}of{NNNN}_gain{g}_exp{e}s.{ext}`
pub fn photo_file_name(
    taken_at: DateTime<Utc>,
    index: u32,
    total: u32,
    gain: i64,
    exposure_seconds: f64,
    extension: &str,
) -> String {
    format!(
        "{}_seq{:04}of{:04}_gain{}_exp{}s.{}",
        taken_at.format("%Y%m%d_%H%M%S"),
        index,
        total,
        gain,
        format_exposure(exposure_seconds),
        extension
    )
}

/// Up to millisecond precision, trailing zeros dropped
fn format_exposure(seconds: f64) -> String {
    let text = format!("{:.3}", seconds);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
