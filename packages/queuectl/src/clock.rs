//! UTC clock abstraction.
//!
//! A trait keeps [`crate::retry`] and the claim engine testable without
//! sleeping real wall-clock seconds.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_iso(&self) -> String {
        to_iso(self.now())
    }
}

/// Canonical `YYYY-MM-DDTHH:MM:SSZ` form used for every timestamp column.
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.trunc_subsecs(0).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_trailing_z_and_second_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(to_iso(ts), "2026-01-02T03:04:05Z");
    }
}
