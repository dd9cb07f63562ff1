//! Utility modules shared across the crate

pub mod throttle;

pub use throttle::LogThrottler;

/// Wall clock in milliseconds since the Unix epoch
///
/// Browser clients stamp control messages with `Date.now()`, so latency is
/// computed against the same clock.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
