//! Cadence-local fire times.
//!
//! A step fires at a local time-of-day, `day_offset` calendar days after
//! "today" in the cadence's zone. The UTC instant is found by guessing,
//! formatting the guess back into the zone and correcting by the observed
//! local-time delta. A second pass settles guesses that straddle a DST switch.

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Resolve an IANA zone name. Empty or unknown names fall back to UTC.
pub fn zone_or_utc(name: &str) -> Tz {
    let name = name.trim();
    if name.is_empty() {
        return Tz::UTC;
    }
    name.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(zone = %name, "Unknown timezone, falling back to UTC");
        Tz::UTC
    })
}

/// UTC instant at which the zone's wall clock reads `date time`.
///
/// Nonexistent local times (spring-forward gap) land on the instant the
/// correction converges to, which is shifted by the size of the gap.
pub fn local_to_utc(zone: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let target = NaiveDateTime::new(date, time);
    let mut guess = target.and_utc();
    for _ in 0..2 {
        let observed = guess.with_timezone(&zone).naive_local();
        let delta = observed - target;
        if delta.is_zero() {
            break;
        }
        guess -= delta;
    }
    guess
}

/// Pull a fire time that is already overdue back into the future.
/// Same-day steps fire after `grace`; multi-day steps move a full day.
pub fn correct_past(
    candidate: DateTime<Utc>,
    now: DateTime<Utc>,
    day_offset: i64,
    grace: Duration,
) -> DateTime<Utc> {
    if candidate >= now {
        return candidate;
    }
    if day_offset <= 0 {
        now + grace
    } else {
        candidate + Duration::hours(24)
    }
}

/// Fire time for a step `day_offset` days after today, at `time_of_day` in `zone`.
///
/// Without a configured time the step fires at `now` shifted by the offset.
pub fn fire_time(
    now: DateTime<Utc>,
    zone: Tz,
    time_of_day: Option<NaiveTime>,
    day_offset: i64,
    grace: Duration,
) -> DateTime<Utc> {
    let days = day_offset.max(0) as u64;
    let Some(time) = time_of_day else {
        return now + Duration::days(days as i64);
    };

    let today = now.with_timezone(&zone).date_naive();
    let target_date = today.checked_add_days(Days::new(days)).unwrap_or(today);
    let candidate = local_to_utc(zone, target_date, time);
    correct_past(candidate, now, day_offset, grace)
}
