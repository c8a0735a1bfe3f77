use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::calendar::CalendarTable;
use crate::models::{NextSchoolDay, TodayInfo};

/// The school runs on UTC-5 all year; no daylight-saving adjustment applies.
pub const SCHOOL_UTC_OFFSET_HOURS: i32 = -5;

/// Calendar date at the school's fixed offset, independent of the host timezone.
pub fn school_date(now: DateTime<Utc>) -> NaiveDate {
    (now.naive_utc() + Duration::hours(i64::from(SCHOOL_UTC_OFFSET_HOURS))).date()
}

pub fn today_info(table: &CalendarTable, now: DateTime<Utc>) -> TodayInfo {
    let date = school_date(now);
    TodayInfo {
        date,
        info: table.get(date).cloned(),
    }
}

/// First date after today that carries a cycle day. When the school year has no
/// cycle day left, `info` is `None` and `date` is tomorrow.
pub fn next_school_day_info(table: &CalendarTable, now: DateTime<Utc>) -> NextSchoolDay {
    let tomorrow = school_date(now) + Duration::days(1);
    let mut date = tomorrow.max(table.start());

    while date <= table.end() {
        if let Some(info) = table.get(date).filter(|info| info.cycle_day.is_some()) {
            return NextSchoolDay {
                date,
                info: Some(info.clone()),
                is_tomorrow: date == tomorrow,
            };
        }
        date += Duration::days(1);
    }

    NextSchoolDay {
        date: tomorrow,
        info: None,
        is_tomorrow: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{build_school_calendar, parse_date_key};
    use crate::models::CycleDay;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        parse_date_key(value).unwrap()
    }

    #[test]
    fn school_date_uses_fixed_offset() {
        // 03:00 UTC is still the previous evening at UTC-5.
        assert_eq!(school_date(at("2025-08-12T03:00:00Z")), date("2025-08-11"));
        assert_eq!(school_date(at("2025-08-12T05:00:00Z")), date("2025-08-12"));
        assert_eq!(school_date(at("2025-08-12T04:59:59Z")), date("2025-08-11"));
    }

    #[test]
    fn today_info_looks_up_the_table() {
        let table = build_school_calendar(None).unwrap();
        let today = today_info(&table, at("2025-08-11T13:00:00Z"));
        assert_eq!(today.date, date("2025-08-11"));
        assert_eq!(today.info.unwrap().cycle_day, Some(CycleDay::D1));

        let weekend = today_info(&table, at("2025-08-16T13:00:00Z"));
        assert_eq!(weekend.date, date("2025-08-16"));
        assert!(weekend.info.is_none());

        let summer = today_info(&table, at("2026-07-01T13:00:00Z"));
        assert!(summer.info.is_none());
    }

    #[test]
    fn next_school_day_is_tomorrow_midweek() {
        let table = build_school_calendar(None).unwrap();
        let next = next_school_day_info(&table, at("2025-08-11T23:00:00Z"));
        assert_eq!(next.date, date("2025-08-12"));
        assert!(next.is_tomorrow);
        assert_eq!(next.info.unwrap().cycle_day, Some(CycleDay::D2));
    }

    #[test]
    fn next_school_day_skips_weekend_and_holiday() {
        let table = build_school_calendar(None).unwrap();
        // Friday evening; Monday 2025-08-18 is a holiday.
        let next = next_school_day_info(&table, at("2025-08-15T23:00:00Z"));
        assert_eq!(next.date, date("2025-08-19"));
        assert!(!next.is_tomorrow);
        assert_eq!(next.info.unwrap().cycle_day, Some(CycleDay::D6));
    }

    #[test]
    fn next_school_day_before_the_year_starts() {
        let table = build_school_calendar(None).unwrap();
        let next = next_school_day_info(&table, at("2025-07-01T15:00:00Z"));
        assert_eq!(next.date, date("2025-08-11"));
        assert!(!next.is_tomorrow);
    }

    #[test]
    fn next_school_day_is_exhausted_after_last_cycle_day() {
        let table = build_school_calendar(None).unwrap();
        let next = next_school_day_info(&table, at("2026-06-11T23:00:00Z"));
        assert!(next.info.is_none());
        assert_eq!(next.date, date("2026-06-12"));
        assert!(!next.is_tomorrow);

        let after = next_school_day_info(&table, at("2026-09-01T23:00:00Z"));
        assert!(after.info.is_none());
    }
}
