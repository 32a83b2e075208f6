//! Wall-clock helpers.
//!
//! Expiry math across the workspace is done on Unix timestamps so that records
//! survive serialization and can be compared between processes.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current time in seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_agree() {
        let ms = now_ms();
        let secs = now_secs();
        assert!(ms / 1000 >= secs.saturating_sub(1));
        assert!(ms / 1000 <= secs + 1);
    }
}
