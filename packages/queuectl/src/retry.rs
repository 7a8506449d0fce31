//! Pure backoff arithmetic — no I/O, fully unit-testable (§4.4).

use chrono::{DateTime, Duration, Utc};

/// `base ^ attempts` seconds. `attempts` is the post-increment count, i.e.
/// the attempt that just failed.
pub fn backoff_seconds(attempts: i64, base: f64) -> f64 {
    base.powi(attempts as i32)
}

/// Earliest the job may be claimed again after a failing attempt.
pub fn next_due_at(now: DateTime<Utc>, attempts: i64, base: f64) -> DateTime<Utc> {
    let delay = backoff_seconds(attempts, base);
    now + Duration::milliseconds((delay * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backoff_grows_exponentially_from_base() {
        assert_eq!(backoff_seconds(1, 2.0), 2.0);
        assert_eq!(backoff_seconds(2, 2.0), 4.0);
        assert_eq!(backoff_seconds(3, 2.0), 8.0);
    }

    #[test]
    fn next_due_at_adds_backoff_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let due = next_due_at(now, 2, 2.0);
        assert_eq!(due, now + Duration::seconds(4));
    }

    #[test]
    fn minimum_delay_is_base_to_the_first_power() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let due = next_due_at(now, 1, 3.0);
        assert_eq!(due, now + Duration::seconds(3));
    }
}
