//! Log throttling utility
//!
//! Limits how often the same log message is recorded, so a peer spamming
//! malformed control messages or a sink rejecting every sample cannot
//! flood the log.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Log throttler keyed by message kind
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use droidlink::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("decode_error"));
/// assert!(!throttler.should_log("decode_error"));
/// ```
pub struct LogThrottler {
    last_logged: RwLock<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a throttler with the minimum interval between messages of one key
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    /// Create a throttler with the interval given in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    ///
    /// A `true` result records the current time for `key`.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();

        {
            let map = self.last_logged.read();
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.interval {
                    return false;
                }
            }
        }

        let mut map = self.last_logged.write();
        // Another thread may have logged between the two locks
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}
