//! Time source abstraction.

use chrono::Utc;

/// Clock abstraction for testability.
pub trait Clock: Send + Sync {
    /// Returns current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;

    /// Returns current time in whole seconds since Unix epoch.
    fn now_unix_sec(&self) -> i64 {
        (self.now_ms() / 1000) as i64
    }
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch clocks read as zero.
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_now_unix_sec_truncates() {
        let clock = FixedClock(1_700_000_000_999);
        assert_eq!(clock.now_unix_sec(), 1_700_000_000);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_unix_sec() > 1_577_836_800);
    }

    #[test]
    fn test_system_clock_tracks_chrono() {
        let before = Utc::now().timestamp_millis();
        let now = SystemClock.now_ms() as i64;
        let after = Utc::now().timestamp_millis();
        assert!(before <= now && now <= after);
    }
}
