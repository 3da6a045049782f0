//! Timestamp utilities.
//!
//! Counts and check keys store instants as `i64` microseconds since the
//! Unix epoch. This module provides conversion to/from chrono types and a
//! monotonic-ish `now` that refuses to move backward when the wall clock
//! jumps (NTP corrections, VM migration): check-key invalidation depends
//! on touch timestamps never regressing.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{NaiveDateTime, TimeZone, Utc};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Backward jumps smaller than this are treated as normal jitter.
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;

/// High-water mark of observed wall-clock values (microseconds).
static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

/// Current time as microseconds since the Unix epoch.
///
/// If the wall clock jumped backward by more than one second, returns the
/// last observed value instead, so stored timestamps and check-key touches
/// never regress.
#[inline]
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.load(Ordering::Relaxed);

    if last != 0 && current - last < -BACKWARD_JUMP_THRESHOLD_US {
        // Keep the high-water mark; don't store the regressed value.
        tracing::warn!(
            regressed_by_us = last - current,
            "wall clock moved backward; holding last observed timestamp"
        );
        return last;
    }

    LAST_SYSTEM_TIME_US.store(current, Ordering::Relaxed);
    current
}

/// The raw wall-clock time without the backward-jump guard.
///
/// Only for display purposes; stored timestamps should use [`now_micros`].
#[inline]
#[must_use]
pub fn now_micros_raw() -> i64 {
    Utc::now().timestamp_micros()
}

/// Convert chrono `NaiveDateTime` to microseconds since the Unix epoch.
#[inline]
#[must_use]
pub fn naive_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Convert microseconds since the Unix epoch to chrono `NaiveDateTime`.
///
/// Values outside chrono's representable range saturate instead of
/// panicking.
#[inline]
#[must_use]
pub fn micros_to_naive(micros: i64) -> NaiveDateTime {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or(if micros < 0 {
            chrono::DateTime::<Utc>::MIN_UTC
        } else {
            chrono::DateTime::<Utc>::MAX_UTC
        })
        .naive_utc()
}

/// Format microseconds as an ISO-8601 string.
#[inline]
#[must_use]
pub fn micros_to_iso(micros: i64) -> String {
    micros_to_naive(micros)
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// Parse an ISO-8601 string to microseconds. Returns `None` when the
/// string cannot be parsed.
#[must_use]
pub fn iso_to_micros(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_micros());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(naive_to_micros(dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive_to_micros(dt));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_micros_is_close_to_wall_clock() {
        let before = Utc::now().timestamp_micros();
        let now = now_micros();
        let after = Utc::now().timestamp_micros();
        // The guard may return a slightly newer high-water mark, never an
        // older one.
        assert!(now >= before - BACKWARD_JUMP_THRESHOLD_US);
        assert!(now <= after + BACKWARD_JUMP_THRESHOLD_US);
    }

    #[test]
    fn now_micros_non_decreasing() {
        let t1 = now_micros();
        let t2 = now_micros();
        let t3 = now_micros();
        assert!(t2 >= t1);
        assert!(t3 >= t2);
    }

    #[test]
    fn round_trip_preserves_micros() {
        let now = Utc::now().naive_utc();
        let micros = naive_to_micros(now);
        let back = micros_to_naive(micros);
        let diff = (now.and_utc().timestamp_micros() - back.and_utc().timestamp_micros()).abs();
        assert!(diff <= 1, "round trip drifted by {diff}us");
    }

    #[test]
    fn iso_round_trip() {
        let micros = 1_704_067_200_123_456_i64;
        let iso = micros_to_iso(micros);
        assert!(iso.starts_with("2024-01-01T00:00:00"));
        assert_eq!(iso_to_micros(&iso), Some(micros));
    }

    #[test]
    fn iso_parsing_variants() {
        assert_eq!(
            iso_to_micros("2024-01-01T00:00:00+00:00"),
            Some(1_704_067_200_000_000)
        );
        assert_eq!(
            iso_to_micros("2024-01-01T00:00:00"),
            Some(1_704_067_200_000_000)
        );
        assert_eq!(iso_to_micros("not-a-date"), None);
        assert_eq!(iso_to_micros(""), None);
    }

    #[test]
    fn extreme_values_saturate() {
        use chrono::Datelike;
        assert!(micros_to_naive(i64::MIN).year() < -200_000);
        assert!(micros_to_naive(i64::MAX).year() > 200_000);
    }

    #[test]
    fn pre_epoch_values_round_trip() {
        let micros = -500_000_i64;
        let dt = micros_to_naive(micros);
        assert_eq!(naive_to_micros(dt), micros);
    }
}
