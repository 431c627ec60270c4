//! Wall-clock helpers. The wire convention for every timestamp and deadline
//! is `f64` seconds since the Unix epoch.

use std::time::Duration;

use chrono::Utc;

/// Current wall-clock time as epoch seconds.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Convert a (possibly negative) span in seconds to a `Duration`, clamping
/// negatives to zero so it can be fed to `tokio::time::sleep`.
pub fn span(seconds: f64) -> Duration {
    if seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}
