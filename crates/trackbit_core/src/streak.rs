use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::habit::{Habit, HabitLog};
use crate::schedule::{dates_between, is_due_on, window_ending};
use crate::store::{Record, RecordKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakStats {
    pub current: u32,
    pub longest: u32,
    pub last_completed: Option<NaiveDate>,
}

/// Walks the completed dates and measures runs of consecutive calendar days. The current
/// run is the one ending at the most recent completion, independent of today's date.
pub fn compute_streak<I>(completed_dates: I) -> StreakStats
where
    I: IntoIterator<Item = NaiveDate>,
{
    let dates: BTreeSet<NaiveDate> = completed_dates.into_iter().collect();
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut previous: Option<NaiveDate> = None;

    for date in &dates {
        run = match previous {
            Some(prev) if (*date - prev).num_days() == 1 => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*date);
    }

    StreakStats {
        current: run,
        longest,
        last_completed: previous,
    }
}

/// Persisted per habit. `longest` never shrinks once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub habit_id: String,
    pub current: u32,
    pub longest: u32,
    pub last_completed: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl StreakRecord {
    pub fn empty(habit_id: impl Into<String>) -> Self {
        Self {
            habit_id: habit_id.into(),
            current: 0,
            longest: 0,
            last_completed: None,
            updated_at: Utc::now(),
        }
    }

    /// Folds freshly derived stats into the record.
    pub fn advance(&self, stats: StreakStats) -> Self {
        Self {
            habit_id: self.habit_id.clone(),
            current: stats.current,
            longest: self.longest.max(stats.longest),
            last_completed: stats.last_completed,
            updated_at: Utc::now(),
        }
    }

    /// Whether the current run still reaches today (or yesterday, which can still be extended).
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        match self.last_completed {
            Some(last) => {
                let gap = (today - last).num_days();
                self.current > 0 && (0..=1).contains(&gap)
            }
            None => false,
        }
    }
}

impl Record for StreakRecord {
    const KIND: RecordKind = RecordKind::Streaks;

    fn record_id(&self) -> String {
        self.habit_id.clone()
    }
}

pub fn completed_dates<'a>(
    habit_id: &str,
    logs: impl IntoIterator<Item = &'a HabitLog>,
) -> BTreeSet<NaiveDate> {
    logs.into_iter()
        .filter(|log| log.habit_id == habit_id && log.completed)
        .map(|log| log.date)
        .collect()
}

/// Percentage (0-100) of scheduled dates in `[today - days, today]` that were completed.
/// Returns 0 when nothing was scheduled in the window.
pub fn habit_completion_rate<'a>(
    habit: &Habit,
    logs: impl IntoIterator<Item = &'a HabitLog>,
    days: u32,
    today: NaiveDate,
) -> f64 {
    let done = completed_dates(&habit.id, logs);
    let (start, end) = window_ending(today, days);
    let mut scheduled = 0usize;
    let mut hit = 0usize;
    for date in dates_between(start, end).filter(|date| is_due_on(habit, *date)) {
        scheduled += 1;
        if done.contains(&date) {
            hit += 1;
        }
    }
    percentage(hit, scheduled)
}

/// Percentage of active habits due on `date` that were completed that day.
pub fn date_completion_rate<'a>(
    habits: impl IntoIterator<Item = &'a Habit>,
    logs: &[HabitLog],
    date: NaiveDate,
) -> f64 {
    let (completed, due) = date_completion_counts(habits, logs, date);
    percentage(completed, due)
}

pub(crate) fn date_completion_counts<'a>(
    habits: impl IntoIterator<Item = &'a Habit>,
    logs: &[HabitLog],
    date: NaiveDate,
) -> (usize, usize) {
    let mut due = 0usize;
    let mut completed = 0usize;
    for habit in habits
        .into_iter()
        .filter(|habit| !habit.is_archived() && is_due_on(habit, date))
    {
        due += 1;
        if logs
            .iter()
            .any(|log| log.habit_id == habit.id && log.date == date && log.completed)
        {
            completed += 1;
        }
    }
    (completed, due)
}

pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::NewHabit;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn done(habit_id: &str, day: NaiveDate) -> HabitLog {
        HabitLog {
            completed: true,
            ..HabitLog::new(habit_id, day)
        }
    }

    #[test]
    fn gap_breaks_current_run_but_keeps_longest() {
        let stats = compute_streak([
            date(2024, 1, 1),
            date(2024, 1, 2),
            date(2024, 1, 3),
            date(2024, 1, 5),
        ]);
        assert_eq!(stats.current, 1);
        assert_eq!(stats.longest, 3);
        assert_eq!(stats.last_completed, Some(date(2024, 1, 5)));
    }

    #[test]
    fn empty_history_has_no_streak() {
        assert_eq!(compute_streak(Vec::new()), StreakStats::default());
    }

    #[test]
    fn unordered_and_duplicate_dates_are_tolerated() {
        let stats = compute_streak([date(2024, 3, 2), date(2024, 3, 1), date(2024, 3, 2)]);
        assert_eq!(stats.current, 2);
        assert_eq!(stats.longest, 2);
    }

    #[test]
    fn record_keeps_high_water_mark() {
        let record = StreakRecord::empty("h").advance(StreakStats {
            current: 5,
            longest: 5,
            last_completed: Some(date(2024, 1, 5)),
        });
        let shrunk = record.advance(StreakStats {
            current: 1,
            longest: 2,
            last_completed: Some(date(2024, 1, 9)),
        });
        assert_eq!(shrunk.longest, 5);
        assert_eq!(shrunk.current, 1);
    }

    #[test]
    fn streak_activity_depends_on_today() {
        let record = StreakRecord::empty("h").advance(compute_streak([date(2024, 1, 5)]));
        assert!(record.is_active_on(date(2024, 1, 6)));
        assert!(!record.is_active_on(date(2024, 1, 8)));
    }

    #[test]
    fn completion_rate_counts_only_scheduled_days() {
        let habit = Habit::from_form(NewHabit::on_days("Gym", [1]).validated().unwrap());
        // Mondays in [2024-01-01, 2024-01-15]: 1st, 8th, 15th.
        let logs = vec![done(&habit.id, date(2024, 1, 1)), done(&habit.id, date(2024, 1, 8))];
        let rate = habit_completion_rate(&habit, &logs, 14, date(2024, 1, 15));
        assert!((rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn completion_rate_without_scheduled_days_is_zero() {
        let habit = Habit::from_form(NewHabit::on_days("Gym", [0]).validated().unwrap());
        // 2024-01-01..=2024-01-03 holds no Sunday.
        let rate = habit_completion_rate(&habit, Vec::<HabitLog>::new().iter(), 2, date(2024, 1, 3));
        assert_eq!(rate, 0.0);
        assert!(!rate.is_nan());
    }

    #[test]
    fn date_rate_ignores_archived_habits() {
        let read = Habit::from_form(NewHabit::daily("Read").validated().unwrap());
        let mut old = Habit::from_form(NewHabit::daily("Old").validated().unwrap());
        old.archived_at = Some(Utc::now());
        let logs = vec![done(&read.id, date(2024, 1, 1))];
        let rate = date_completion_rate([&read, &old], &logs, date(2024, 1, 1));
        assert_eq!(rate, 100.0);
        assert_eq!(
            date_completion_rate(Vec::<&Habit>::new(), &logs, date(2024, 1, 1)),
            0.0
        );
    }
}
