use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveTime};

use crate::error::{Result, TrackbitError};
use crate::habit::{Habit, HabitFrequency};

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Sunday = 0 .. Saturday = 6.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn weekday_name(index: u8) -> &'static str {
    WEEKDAY_NAMES[usize::from(index % 7)]
}

pub fn is_due_on(habit: &Habit, date: NaiveDate) -> bool {
    match habit.frequency {
        HabitFrequency::Daily => true,
        HabitFrequency::Weekly | HabitFrequency::Custom => {
            habit.target_days.contains(&weekday_index(date))
        }
    }
}

/// Every date from `start` to `end`, both inclusive. Empty when `end < start`.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let len = (end - start).num_days().max(-1) + 1;
    (0..len).map(move |offset| start + Duration::days(offset))
}

/// `[today - days, today]`. The start saturates at the earliest representable date.
pub fn window_ending(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    (start, today)
}

/// Sunday through Saturday of the week containing `date`, clamped to the calendar range.
pub fn week_window(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let (start, _) = window_ending(date, u32::from(weekday_index(date)));
    let end = start.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
    (start, end)
}

pub fn month_window(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| TrackbitError::validation(format!("`{raw}` is not a YYYY-MM-DD date")))
}

pub fn parse_reminder_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| TrackbitError::validation(format!("`{raw}` is not an HH:MM time")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::NewHabit;

    fn habit_from(form: NewHabit) -> Habit {
        Habit::from_form(form.validated().unwrap())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sunday_is_zero() {
        assert_eq!(weekday_index(date(2024, 1, 7)), 0);
        assert_eq!(weekday_index(date(2024, 1, 6)), 6);
    }

    #[test]
    fn daily_habit_is_due_every_day() {
        let habit = habit_from(NewHabit::daily("Stretch"));
        for day in dates_between(date(2024, 1, 1), date(2024, 3, 1)) {
            assert!(is_due_on(&habit, day));
        }
    }

    #[test]
    fn custom_habit_follows_target_days() {
        let habit = habit_from(NewHabit::on_days("Gym", [1, 3, 5]));
        for day in dates_between(date(2024, 1, 1), date(2024, 1, 31)) {
            let expected = matches!(weekday_index(day), 1 | 3 | 5);
            assert_eq!(is_due_on(&habit, day), expected, "{day}");
        }
    }

    #[test]
    fn reversed_range_is_empty() {
        assert_eq!(dates_between(date(2024, 1, 5), date(2024, 1, 1)).count(), 0);
        assert_eq!(dates_between(date(2024, 1, 1), date(2024, 1, 1)).count(), 1);
    }

    #[test]
    fn windows_cover_expected_spans() {
        assert_eq!(
            week_window(date(2024, 1, 10)),
            (date(2024, 1, 7), date(2024, 1, 13))
        );
        assert_eq!(
            month_window(2024, 2),
            Some((date(2024, 2, 1), date(2024, 2, 29)))
        );
        assert_eq!(
            month_window(2023, 2),
            Some((date(2023, 2, 1), date(2023, 2, 28)))
        );
        assert_eq!(
            month_window(2024, 12),
            Some((date(2024, 12, 1), date(2024, 12, 31)))
        );
        assert_eq!(month_window(2024, 13), None);
        assert_eq!(
            window_ending(date(2024, 1, 31), 30),
            (date(2024, 1, 1), date(2024, 1, 31))
        );
    }

    #[test]
    fn huge_window_saturates_instead_of_overflowing() {
        let today = date(2024, 1, 31);
        assert_eq!(window_ending(today, u32::MAX), (NaiveDate::MIN, today));
        let (start, end) = week_window(NaiveDate::MAX);
        assert_eq!(end, NaiveDate::MAX);
        assert!(start <= end);
    }

    #[test]
    fn parses_form_inputs() {
        assert_eq!(parse_date("2024-01-05").unwrap(), date(2024, 1, 5));
        assert!(parse_date("05/01/2024").is_err());
        assert!(parse_reminder_time("07:30").is_ok());
        assert!(parse_reminder_time("7pm").is_err());
    }
}
