use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackbitError};
use crate::habit::{Habit, HabitLog};
use crate::schedule::{dates_between, month_window, weekday_index, window_ending, WEEKDAY_NAMES};
use crate::service::HabitService;
use crate::streak::{compute_streak, date_completion_counts, percentage};

/// Completion summary of one date across the active habits due that day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCompletion {
    pub date: NaiveDate,
    pub completed: usize,
    pub due: usize,
    pub percentage: f64,
}

impl DayCompletion {
    pub fn is_perfect(&self) -> bool {
        self.due > 0 && self.completed == self.due
    }
}

fn day_completions(
    habits: &[Habit],
    logs: &[HabitLog],
    dates: impl Iterator<Item = NaiveDate>,
) -> Vec<DayCompletion> {
    dates
        .map(|date| {
            let (completed, due) = date_completion_counts(habits, logs, date);
            DayCompletion {
                date,
                completed,
                due,
                percentage: percentage(completed, due),
            }
        })
        .collect()
}

pub fn month_calendar(
    service: &HabitService,
    year: i32,
    month: u32,
) -> Result<Vec<DayCompletion>> {
    let (start, end) = month_window(year, month)
        .ok_or_else(|| TrackbitError::validation(format!("{year}-{month} is not a month")))?;
    let habits = service.habits();
    let logs = service.all_logs();
    Ok(day_completions(&habits, &logs, dates_between(start, end)))
}

/// The seven days ending at `today`, oldest first.
pub fn week_overview(service: &HabitService, today: NaiveDate) -> Vec<DayCompletion> {
    let habits = service.habits();
    let logs = service.all_logs();
    let (start, end) = window_ending(today, 6);
    day_completions(&habits, &logs, dates_between(start, end))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayRate {
    pub weekday: u8,
    pub name: String,
    pub completed: usize,
    pub logged: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitReport {
    pub habit_id: String,
    pub name: String,
    pub total_completions: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_7_days: f64,
    pub last_30_days: f64,
    /// Weekdays with the highest completion ratio, strongest first. Empty without history.
    pub best_days: Vec<String>,
    pub weekdays: Vec<WeekdayRate>,
    pub total_value: f64,
}

/// Completion ratio per weekday over the days a habit has a log for.
pub fn weekday_rates(logs: &[HabitLog]) -> Vec<WeekdayRate> {
    let mut completed = [0usize; 7];
    let mut logged = [0usize; 7];
    for log in logs {
        let day = usize::from(weekday_index(log.date));
        logged[day] += 1;
        if log.completed {
            completed[day] += 1;
        }
    }
    (0..7u8)
        .map(|day| {
            let i = usize::from(day);
            WeekdayRate {
                weekday: day,
                name: WEEKDAY_NAMES[i].to_string(),
                completed: completed[i],
                logged: logged[i],
                rate: percentage(completed[i], logged[i]),
            }
        })
        .collect()
}

fn best_days(rates: &[WeekdayRate], take: usize) -> Vec<String> {
    let mut ranked: Vec<&WeekdayRate> = rates.iter().filter(|r| r.completed > 0).collect();
    ranked.sort_by(|a, b| b.rate.total_cmp(&a.rate).then(a.weekday.cmp(&b.weekday)));
    ranked.into_iter().take(take).map(|r| r.name.clone()).collect()
}

pub fn habit_report(
    service: &HabitService,
    habit_id: &str,
    today: NaiveDate,
) -> Option<HabitReport> {
    let habit = service.habit(habit_id)?;
    let logs = service.logs_for(habit_id);
    let stats = compute_streak(logs.iter().filter(|log| log.completed).map(|log| log.date));
    let longest = service
        .streak(habit_id)
        .map(|record| record.longest)
        .unwrap_or(0)
        .max(stats.longest);
    let weekdays = weekday_rates(&logs);
    Some(HabitReport {
        habit_id: habit.id.clone(),
        name: habit.name.clone(),
        total_completions: logs.iter().filter(|log| log.completed).count(),
        current_streak: stats.current,
        longest_streak: longest,
        last_7_days: service.completion_rate(habit_id, 7, today),
        last_30_days: service.completion_rate(habit_id, 30, today),
        best_days: best_days(&weekdays, 3),
        weekdays,
        total_value: logs.iter().filter_map(|log| log.value).sum(),
    })
}
