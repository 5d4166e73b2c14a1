//! Expiration policy for scope grants.
//!
//! Expirations have day granularity: every computed instant falls on the end
//! of a calendar day (23:59:00) in the server's local timezone. Calendar math
//! is timezone-naive relative to the server clock, so moving the server to a
//! different timezone shifts every computed expiry by the offset difference.

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};
use std::num::NonZeroU32;

/// 9999-12-31T23:59:59Z, the "does not expire" marker.
const NEVER_TIMESTAMP: i64 = 253_402_300_799;

/// A relative expiration as an administrator expresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// End of the day `days` calendar days from today.
    Days(NonZeroU32),
    /// Never expires.
    Never,
    /// Already expired (end of yesterday).
    Expired,
}

impl Expiry {
    pub fn days(days: u32) -> Option<Self> {
        NonZeroU32::new(days).map(Expiry::Days)
    }

    /// Resolve against the current local date.
    pub fn resolve(self) -> DateTime<Utc> {
        self.resolve_from(today())
    }

    pub fn resolve_from(self, today: NaiveDate) -> DateTime<Utc> {
        match self {
            Expiry::Days(days) => after_from(today, days.get()),
            Expiry::Never => never(),
            Expiry::Expired => expired_from(today),
        }
    }
}

/// Today's date on the server clock.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// End of the local day `days` days from today.
pub fn after(days: u32) -> DateTime<Utc> {
    after_from(today(), days)
}

pub fn after_from(today: NaiveDate, days: u32) -> DateTime<Utc> {
    after_in(&Local, today, days)
}

/// End of tomorrow.
pub fn tomorrow() -> DateTime<Utc> {
    after(1)
}

/// An instant no real clock will reach.
pub fn never() -> DateTime<Utc> {
    Utc.timestamp_opt(NEVER_TIMESTAMP, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// End of yesterday. Grants stamped with this are invalid from the start.
pub fn expired_marker() -> DateTime<Utc> {
    expired_from(today())
}

pub fn expired_from(today: NaiveDate) -> DateTime<Utc> {
    match today.checked_sub_days(Days::new(1)) {
        Some(yesterday) => end_of_day(&Local, yesterday),
        None => DateTime::<Utc>::MIN_UTC,
    }
}

/// A grant is valid strictly before its expiry; at the expiry instant it is
/// already expired.
pub fn is_valid(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at > now
}

pub(crate) fn after_in<Tz: TimeZone>(tz: &Tz, today: NaiveDate, days: u32) -> DateTime<Utc> {
    let never = never();
    match today.checked_add_days(Days::new(u64::from(days))) {
        Some(date) => end_of_day(tz, date).min(never),
        None => never,
    }
}

fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let Some(local) = date.and_hms_opt(23, 59, 0) else {
        return never();
    };
    // A DST gap at 23:59 has no local mapping; fall back to reading it as UTC.
    match tz.from_local_datetime(&local).earliest() {
        Some(instant) => instant.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Timelike};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_after_is_end_of_day() {
        let at = after_in(&Utc, date(2025, 3, 10), 2);
        assert_eq!(at.date_naive(), date(2025, 3, 12));
        assert_eq!((at.hour(), at.minute(), at.second()), (23, 59, 0));
        assert_eq!(at.nanosecond(), 0);
    }

    #[test]
    fn test_after_respects_timezone_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = after_in(&plus_two, date(2025, 3, 10), 1);
        // 23:59 at +02:00 is 21:59 UTC
        assert_eq!(at.hour(), 21);
        assert_eq!(at.date_naive(), date(2025, 3, 11));
    }

    #[test]
    fn test_after_is_strictly_monotonic() {
        let today = date(2025, 1, 31);
        let days = [1u32, 2, 7, 28, 29, 30, 365, 366, 3650, 36500];
        for pair in days.windows(2) {
            assert!(
                after_from(today, pair[0]) < after_from(today, pair[1]),
                "after({}) should precede after({})",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_after_same_day_is_equal() {
        assert_eq!(after(3), after(3));
        assert_eq!(tomorrow(), after(1));
    }

    #[test]
    fn test_never_beats_realistic_expirations() {
        assert!(never() > after(36500));
        assert!(never() > after_from(date(2025, 1, 1), 365 * 7000));
    }

    #[test]
    fn test_after_clamps_to_never() {
        assert_eq!(after(u32::MAX), never());
        assert_eq!(after_from(date(9999, 12, 30), 5), never());
    }

    #[test]
    fn test_expired_marker_is_in_the_past() {
        assert!(expired_marker() < Utc::now());
        assert!(!is_valid(expired_marker(), Utc::now()));
        assert!(expired_from(date(2025, 6, 1)) < after_from(date(2025, 6, 1), 1));
    }

    #[test]
    fn test_is_valid_boundary() {
        let now = Utc::now();
        assert!(is_valid(now + Duration::seconds(1), now));
        assert!(!is_valid(now, now));
        assert!(!is_valid(now - Duration::seconds(1), now));
    }

    #[test]
    fn test_expiry_resolution() {
        let today = date(2025, 6, 15);
        assert_eq!(Expiry::days(0), None);
        assert_eq!(
            Expiry::days(3).unwrap().resolve_from(today),
            after_from(today, 3)
        );
        assert_eq!(Expiry::Never.resolve_from(today), never());
        assert_eq!(Expiry::Expired.resolve_from(today), expired_from(today));
    }
}
