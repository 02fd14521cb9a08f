use chrono::Utc;

/// Wall-clock source in epoch milliseconds. Elapsed time is always derived
/// from this, never from tick counts.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Whole seconds between `start_ms` and `now_ms`, zero if the clock went
/// backwards.
pub fn elapsed_secs(start_ms: i64, now_ms: i64) -> u64 {
    let delta = now_ms.saturating_sub(start_ms);
    if delta <= 0 {
        0
    } else {
        (delta / 1000) as u64
    }
}

#[cfg(test)]
pub use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_floors_to_whole_seconds() {
        assert_eq!(elapsed_secs(1_000, 1_999), 0);
        assert_eq!(elapsed_secs(1_000, 2_000), 1);
        assert_eq!(elapsed_secs(0, 125_999), 125);
    }

    #[test]
    fn elapsed_saturates_when_clock_goes_backwards() {
        assert_eq!(elapsed_secs(10_000, 5_000), 0);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        clock.advance_secs(5);
        assert_eq!(clock.now_ms(), 6_000);
    }
}
