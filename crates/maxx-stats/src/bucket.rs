//! Time-bucket truncation. Minute and hour buckets are UTC; day and
//! month buckets are truncated in the configured timezone.

use chrono::{Datelike, Months, NaiveDate, TimeZone};
use chrono_tz::Tz;
use time::OffsetDateTime;

use maxx_storage::store::UsageGranularity;

/// Start of the bucket containing `ts`.
pub fn truncate(ts: OffsetDateTime, granularity: UsageGranularity, tz: Tz) -> OffsetDateTime {
    let unix = ts.unix_timestamp();
    match granularity {
        UsageGranularity::Minute => from_unix(unix - unix.rem_euclid(60)),
        UsageGranularity::Hour => from_unix(unix - unix.rem_euclid(3_600)),
        UsageGranularity::Day => from_unix(local_midnight(unix, tz, false)),
        UsageGranularity::Month => from_unix(local_midnight(unix, tz, true)),
    }
}

/// Start of the bucket after the one containing `ts`.
pub fn next_bucket(ts: OffsetDateTime, granularity: UsageGranularity, tz: Tz) -> OffsetDateTime {
    let start = truncate(ts, granularity, tz);
    match granularity {
        UsageGranularity::Minute => start + time::Duration::minutes(1),
        UsageGranularity::Hour => start + time::Duration::hours(1),
        UsageGranularity::Day => {
            // Local midnight the day after; DST can make this ±1h from 24h.
            truncate(start + time::Duration::hours(36), granularity, tz)
        }
        UsageGranularity::Month => {
            let local = tz
                .timestamp_opt(start.unix_timestamp(), 0)
                .single()
                .map(|dt| dt.date_naive())
                .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
            let next = local
                .checked_add_months(Months::new(1))
                .unwrap_or(local)
                .with_day(1)
                .unwrap_or(local);
            from_unix(midnight_of(next, tz))
        }
    }
}

fn local_midnight(unix: i64, tz: Tz, month_start: bool) -> i64 {
    let Some(local) = tz.timestamp_opt(unix, 0).single() else {
        return unix - unix.rem_euclid(86_400);
    };
    let mut date = local.date_naive();
    if month_start {
        date = date.with_day(1).unwrap_or(date);
    }
    midnight_of(date, tz)
}

fn midnight_of(date: NaiveDate, tz: Tz) -> i64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    match tz.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(dt) => dt.timestamp(),
        chrono::LocalResult::Ambiguous(first, _) => first.timestamp(),
        // Midnight skipped by a DST jump; take the earliest valid instant.
        chrono::LocalResult::None => tz
            .from_local_datetime(&date.and_hms_opt(1, 0, 0).expect("valid 01:00"))
            .earliest()
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp()),
    }
}

fn from_unix(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).expect("in-range unix timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn shanghai() -> Tz {
        "Asia/Shanghai".parse().unwrap()
    }

    #[test]
    fn minute_and_hour_truncate_in_utc() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_123).unwrap();
        assert_eq!(
            truncate(ts, UsageGranularity::Minute, shanghai()).unix_timestamp(),
            1_700_000_120 - 1_700_000_120 % 60
        );
        assert_eq!(
            truncate(ts, UsageGranularity::Hour, shanghai()).unix_timestamp() % 3_600,
            0
        );
    }

    #[test]
    fn day_truncates_at_local_midnight_not_utc() {
        // 2023-11-15T18:00:00Z = 2023-11-16T02:00 in Shanghai (+08:00).
        let ts = OffsetDateTime::from_unix_timestamp(1_700_071_200).unwrap();
        let day = truncate(ts, UsageGranularity::Day, shanghai());
        // Local midnight 2023-11-16T00:00+08:00 = 2023-11-15T16:00:00Z.
        assert_eq!(day.unix_timestamp(), 1_700_064_000);
    }

    #[test]
    fn month_rolls_to_first_of_month() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_071_200).unwrap();
        let month = truncate(ts, UsageGranularity::Month, shanghai());
        // 2023-11-01T00:00+08:00 = 2023-10-31T16:00:00Z.
        assert_eq!(month.unix_timestamp(), 1_698_768_000);
        let next = next_bucket(ts, UsageGranularity::Month, shanghai());
        // 2023-12-01T00:00+08:00.
        assert_eq!(next.unix_timestamp(), 1_701_360_000);
    }

    #[test]
    fn next_day_bucket_is_following_midnight() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_071_200).unwrap();
        let next = next_bucket(ts, UsageGranularity::Day, shanghai());
        assert_eq!(next.unix_timestamp(), 1_700_064_000 + 86_400);
    }
}
