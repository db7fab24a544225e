//! Clock and window policy shared by client and server.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{LocalResult, TimeZone, Utc};

/// Symmetric tolerance applied to header and signature timestamps.
pub const WINDOW_SECS: i64 = 30;

/// Current Unix time, unless overridden via `GIT_TIMESTAMP_FAKE_TIME`
/// for deterministic tests.
pub fn sig_time() -> i64 {
    if let Ok(fake) = std::env::var("GIT_TIMESTAMP_FAKE_TIME") {
        if let Ok(t) = fake.parse() {
            return t;
        }
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Is this timestamp strictly within the ±30 s window around now?
pub fn within_window(stamp: i64) -> bool {
    let now = sig_time();
    stamp > now - WINDOW_SECS && stamp < now + WINDOW_SECS
}

/// `2019-03-08 14:00:00` style UTC rendering of a Unix timestamp.
pub fn time_str(stamp: i64) -> String {
    match Utc.timestamp_opt(stamp, 0) {
        LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => format!("@{}", stamp),
    }
}

/// Same, with the ` UTC` suffix used in branch timestamp bodies.
pub fn time_str_utc(stamp: i64) -> String {
    format!("{} UTC", time_str(stamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_boundaries() {
        let now = sig_time();
        assert!(within_window(now));
        assert!(within_window(now + 29));
        assert!(within_window(now - 29));
        assert!(!within_window(now + 31));
        assert!(!within_window(now - 31));
        assert!(!within_window(now + 30));
        assert!(!within_window(now - 30));
    }

    #[test]
    fn test_time_str() {
        assert_eq!(time_str(0), "1970-01-01 00:00:00");
        assert_eq!(time_str_utc(1552053600), "2019-03-08 14:00:00 UTC");
    }
}
