use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TrackbitError};
use crate::notifications::{ReminderRequest, ReminderSink};
use crate::schedule::{parse_reminder_time, window_ending};
use crate::service::HabitService;
use crate::store::{Record, RecordKind, Records};
use crate::streak::{compute_streak, percentage, StreakStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Ordered, without duplicates.
    pub habit_ids: Vec<String>,
    /// `HH:MM`.
    pub reminder_time: Option<String>,
    pub color: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Routine {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

impl Record for Routine {
    const KIND: RecordKind = RecordKind::Routines;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoutine {
    pub name: String,
    pub description: Option<String>,
    pub habit_ids: Vec<String>,
    pub reminder_time: Option<String>,
    pub color: String,
    pub icon: Option<String>,
}

impl NewRoutine {
    pub fn new(name: impl Into<String>, habit_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            habit_ids: habit_ids.into_iter().collect(),
            reminder_time: None,
            color: "#f59e0b".to_string(),
            icon: None,
        }
    }

    pub fn with_reminder(mut self, time: impl Into<String>) -> Self {
        self.reminder_time = Some(time.into());
        self
    }
}

/// Audit snapshot of a routine on one date. Never read back as a progress source; live
/// progress always comes from the habit logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineLog {
    pub routine_id: String,
    pub date: NaiveDate,
    pub completed_habits: Vec<String>,
    pub completed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Record for RoutineLog {
    const KIND: RecordKind = RecordKind::RoutineLogs;

    fn record_id(&self) -> String {
        format!("{}:{}", self.routine_id, self.date.format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutineProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl RoutineProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

#[derive(Debug, Default)]
struct RoutineState {
    routines: BTreeMap<String, Routine>,
    logs: BTreeMap<(String, NaiveDate), RoutineLog>,
}

/// Groups habits into routines. Holds a handle to the habit repository and derives every
/// progress figure from it on read.
pub struct RoutineService {
    habits: Arc<HabitService>,
    state: RwLock<RoutineState>,
    reminder_sink: Option<Box<dyn ReminderSink>>,
}

pub struct RoutineServiceBuilder {
    habits: Arc<HabitService>,
    reminder_sink: Option<Box<dyn ReminderSink>>,
}

impl RoutineServiceBuilder {
    pub fn with_reminder_sink(mut self, sink: Box<dyn ReminderSink>) -> Self {
        self.reminder_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<RoutineService> {
        let service = RoutineService {
            habits: self.habits,
            state: RwLock::new(RoutineState::default()),
            reminder_sink: self.reminder_sink,
        };
        service.reload_all()?;
        Ok(service)
    }
}

impl RoutineService {
    pub fn builder(habits: Arc<HabitService>) -> RoutineServiceBuilder {
        RoutineServiceBuilder {
            habits,
            reminder_sink: None,
        }
    }

    pub fn habits(&self) -> &Arc<HabitService> {
        &self.habits
    }

    fn with_records<T>(&self, f: impl FnOnce(Records<'_>) -> Result<T>) -> Result<T> {
        let store = self.habits.store();
        f(Records::new(store.as_ref(), self.habits.user_id()))
    }

    pub fn reload_all(&self) -> Result<()> {
        let (routines, logs) = self.with_records(|records| {
            Ok((
                records.load_all::<Routine>()?,
                records.load_all::<RoutineLog>()?,
            ))
        })?;
        let mut state = RoutineState::default();
        for routine in routines {
            state.routines.insert(routine.id.clone(), routine);
        }
        for log in logs {
            state.logs.insert((log.routine_id.clone(), log.date), log);
        }
        debug!(routines = state.routines.len(), "hydrated routine state");
        *self.state.write() = state;
        Ok(())
    }

    #[instrument(skip(self, form), fields(name = %form.name))]
    pub fn create_routine(&self, form: NewRoutine) -> Result<Routine> {
        let form = self.validate(form)?;
        let routine = Routine {
            id: uuid::Uuid::new_v4().to_string(),
            name: form.name,
            description: form.description,
            habit_ids: form.habit_ids,
            reminder_time: form.reminder_time,
            color: form.color,
            icon: form.icon,
            created_at: Utc::now(),
            archived_at: None,
        };
        self.with_records(|records| records.save(&routine))?;
        self.state
            .write()
            .routines
            .insert(routine.id.clone(), routine.clone());
        self.schedule_reminder(&routine);
        info!(routine_id = %routine.id, habits = routine.habit_ids.len(), "routine created");
        Ok(routine)
    }

    #[instrument(skip(self, form))]
    pub fn update_routine(&self, routine_id: &str, form: NewRoutine) -> Result<Routine> {
        let form = self.validate(form)?;
        let mut state = self.state.write();
        let mut routine = state
            .routines
            .get(routine_id)
            .cloned()
            .ok_or_else(|| TrackbitError::not_found(RecordKind::Routines, routine_id))?;
        routine.name = form.name;
        routine.description = form.description;
        routine.habit_ids = form.habit_ids;
        routine.reminder_time = form.reminder_time;
        routine.color = form.color;
        routine.icon = form.icon;
        self.with_records(|records| records.save(&routine))?;
        state.routines.insert(routine.id.clone(), routine.clone());
        drop(state);
        self.clear_reminder(&routine.id);
        self.schedule_reminder(&routine);
        Ok(routine)
    }

    pub fn add_habit(&self, routine_id: &str, habit_id: &str) -> Result<bool> {
        if self.habits.habit(habit_id).is_none() {
            return Ok(false);
        }
        self.edit_members(routine_id, |ids| {
            if ids.iter().any(|id| id == habit_id) {
                false
            } else {
                ids.push(habit_id.to_string());
                true
            }
        })
    }

    pub fn remove_habit(&self, routine_id: &str, habit_id: &str) -> Result<bool> {
        self.edit_members(routine_id, |ids| {
            let before = ids.len();
            ids.retain(|id| id != habit_id);
            ids.len() != before
        })
    }

    fn edit_members(
        &self,
        routine_id: &str,
        edit: impl FnOnce(&mut Vec<String>) -> bool,
    ) -> Result<bool> {
        let mut state = self.state.write();
        let Some(mut routine) = state.routines.get(routine_id).cloned() else {
            debug!(routine_id, "membership change ignored for unknown routine");
            return Ok(false);
        };
        if !edit(&mut routine.habit_ids) {
            return Ok(false);
        }
        self.with_records(|records| records.save(&routine))?;
        state.routines.insert(routine.id.clone(), routine);
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn archive_routine(&self, routine_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let Some(mut routine) = state.routines.get(routine_id).cloned() else {
            return Ok(false);
        };
        if routine.is_archived() {
            return Ok(true);
        }
        routine.archived_at = Some(Utc::now());
        self.with_records(|records| records.save(&routine))?;
        state.routines.insert(routine.id.clone(), routine);
        drop(state);
        self.clear_reminder(routine_id);
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn delete_routine(&self, routine_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        if !state.routines.contains_key(routine_id) {
            return Ok(false);
        }
        self.with_records(|records| records.remove::<Routine>(routine_id))?;
        let keys: Vec<(String, NaiveDate)> = state
            .logs
            .keys()
            .filter(|(id, _)| id == routine_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(log) = state.logs.remove(&key) {
                let log_id = log.record_id();
                if let Err(err) = self.with_records(|records| records.remove::<RoutineLog>(&log_id))
                {
                    warn!(%err, %log_id, "orphaned routine log left in store");
                }
            }
        }
        state.routines.remove(routine_id);
        drop(state);
        self.clear_reminder(routine_id);
        Ok(true)
    }

    pub fn routines(&self) -> Vec<Routine> {
        let mut routines: Vec<Routine> = self.state.read().routines.values().cloned().collect();
        routines.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        routines
    }

    pub fn active_routines(&self) -> Vec<Routine> {
        self.routines()
            .into_iter()
            .filter(|routine| !routine.is_archived())
            .collect()
    }

    pub fn routine(&self, routine_id: &str) -> Option<Routine> {
        self.state.read().routines.get(routine_id).cloned()
    }

    pub fn find_routine(&self, id_or_name: &str) -> Option<Routine> {
        let needle = id_or_name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(routine) = self.routine(id_or_name) {
            return Some(routine);
        }
        self.routines().into_iter().find(|routine| {
            routine.name.to_lowercase() == needle || routine.id.starts_with(&needle)
        })
    }

    pub fn routines_for_habit(&self, habit_id: &str) -> Vec<Routine> {
        self.routines()
            .into_iter()
            .filter(|routine| routine.habit_ids.iter().any(|id| id == habit_id))
            .collect()
    }

    /// Member habits that still exist and are active.
    fn live_members(&self, routine: &Routine) -> Vec<String> {
        routine
            .habit_ids
            .iter()
            .filter(|id| {
                self.habits
                    .habit(id)
                    .map(|habit| !habit.is_archived())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Live progress for `date`. Unknown routines report zero progress.
    pub fn progress(&self, routine_id: &str, date: NaiveDate) -> RoutineProgress {
        let Some(routine) = self.routine(routine_id) else {
            return RoutineProgress::default();
        };
        self.progress_of(&routine, date)
    }

    pub fn progress_of(&self, routine: &Routine, date: NaiveDate) -> RoutineProgress {
        let members = self.live_members(routine);
        let completed = members
            .iter()
            .filter(|id| self.habits.is_completed(id, date))
            .count();
        RoutineProgress {
            completed,
            total: members.len(),
            percentage: percentage(completed, members.len()),
        }
    }

    pub fn is_completed_on(&self, routine_id: &str, date: NaiveDate) -> bool {
        self.progress(routine_id, date).is_complete()
    }

    /// Dates on which every live member habit was completed.
    fn completed_dates(&self, routine: &Routine) -> BTreeSet<NaiveDate> {
        let members = self.live_members(routine);
        let mut sets = members.iter().map(|id| {
            self.habits
                .logs_for(id)
                .into_iter()
                .filter(|log| log.completed)
                .map(|log| log.date)
                .collect::<BTreeSet<NaiveDate>>()
        });
        let Some(first) = sets.next() else {
            return BTreeSet::new();
        };
        sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())
    }

    pub fn routine_streak(&self, routine_id: &str) -> StreakStats {
        match self.routine(routine_id) {
            Some(routine) => compute_streak(self.completed_dates(&routine)),
            None => StreakStats::default(),
        }
    }

    /// Percentage of days in `[today - days, today]` on which the routine was fully completed.
    pub fn completion_rate(&self, routine_id: &str, days: u32, today: NaiveDate) -> f64 {
        let Some(routine) = self.routine(routine_id) else {
            return 0.0;
        };
        if self.live_members(&routine).is_empty() {
            return 0.0;
        }
        let done = self.completed_dates(&routine);
        let (start, end) = window_ending(today, days);
        let span = usize::try_from((end - start).num_days() + 1).unwrap_or(0);
        percentage(done.range(start..=end).count(), span)
    }

    /// Writes an audit snapshot of the live progress for `date`.
    #[instrument(skip(self))]
    pub fn record_snapshot(&self, routine_id: &str, date: NaiveDate) -> Result<Option<RoutineLog>> {
        let Some(routine) = self.routine(routine_id) else {
            return Ok(None);
        };
        let completed_habits: Vec<String> = self
            .live_members(&routine)
            .into_iter()
            .filter(|id| self.habits.is_completed(id, date))
            .collect();
        let progress = self.progress_of(&routine, date);
        let log = RoutineLog {
            routine_id: routine.id.clone(),
            date,
            completed_habits,
            completed: progress.is_complete(),
            recorded_at: Utc::now(),
        };
        self.with_records(|records| records.save(&log))?;
        self.state
            .write()
            .logs
            .insert((log.routine_id.clone(), date), log.clone());
        Ok(Some(log))
    }

    /// Re-snapshots every routine that contains `habit_id`.
    pub fn refresh_for_habit(&self, habit_id: &str, date: NaiveDate) -> Result<Vec<RoutineLog>> {
        let mut logs = Vec::new();
        for routine in self.routines_for_habit(habit_id) {
            if let Some(log) = self.record_snapshot(&routine.id, date)? {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    pub fn history(&self, routine_id: &str) -> Vec<RoutineLog> {
        self.state
            .read()
            .logs
            .values()
            .filter(|log| log.routine_id == routine_id)
            .cloned()
            .collect()
    }

    fn validate(&self, mut form: NewRoutine) -> Result<NewRoutine> {
        form.name = form.name.trim().to_string();
        if form.name.is_empty() {
            return Err(TrackbitError::validation("routine name is required"));
        }
        form.reminder_time = match form.reminder_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_reminder_time(raw)?.format("%H:%M").to_string()),
        };
        let mut seen = BTreeSet::new();
        let requested = form.habit_ids.len();
        form.habit_ids.retain(|id| seen.insert(id.clone()));
        form.habit_ids.retain(|id| self.habits.habit(id).is_some());
        if form.habit_ids.len() != requested {
            debug!(
                requested,
                kept = form.habit_ids.len(),
                "dropped duplicate or unknown routine members"
            );
        }
        form.description = form.description.filter(|d| !d.trim().is_empty());
        Ok(form)
    }

    fn schedule_reminder(&self, routine: &Routine) {
        let (Some(sink), Some(raw)) = (&self.reminder_sink, &routine.reminder_time) else {
            return;
        };
        let Ok(at) = parse_reminder_time(raw) else {
            return;
        };
        if routine.is_archived() {
            return;
        }
        sink.schedule_daily(ReminderRequest {
            routine_id: routine.id.clone(),
            title: format!("Routine: {}", routine.name),
            body: format!("{} habits waiting", routine.habit_ids.len()),
            at,
        });
    }

    fn clear_reminder(&self, routine_id: &str) {
        if let Some(sink) = &self.reminder_sink {
            sink.clear_for_routine(routine_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::NewHabit;
    use parking_lot::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn services() -> (Arc<HabitService>, RoutineService) {
        let habits = Arc::new(HabitService::builder().build().unwrap());
        let routines = RoutineService::builder(habits.clone()).build().unwrap();
        (habits, routines)
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ReminderSink for RecordingSink {
        fn schedule_daily(&self, reminder: ReminderRequest) {
            self.events
                .lock()
                .push(format!("schedule {} {}", reminder.routine_id, reminder.at));
        }

        fn clear_for_routine(&self, routine_id: &str) {
            self.events.lock().push(format!("clear {routine_id}"));
        }
    }

    #[test]
    fn empty_routine_has_zero_progress() {
        let (_, routines) = services();
        let routine = routines
            .create_routine(NewRoutine::new("Empty", Vec::new()))
            .unwrap();
        let progress = routines.progress(&routine.id, date(2024, 1, 1));
        assert_eq!(progress, RoutineProgress::default());
        assert_eq!(routines.routine_streak(&routine.id), StreakStats::default());
    }

    #[test]
    fn progress_is_read_live_from_habit_logs() {
        let (habits, routines) = services();
        let water = habits.add_habit(NewHabit::daily("Water")).unwrap();
        let stretch = habits.add_habit(NewHabit::daily("Stretch")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new(
                "Morning",
                [water.id.clone(), stretch.id.clone(), water.id.clone()],
            ))
            .unwrap();
        assert_eq!(routine.habit_ids.len(), 2);

        let day = date(2024, 1, 1);
        habits.toggle_completion(&water.id, day).unwrap();
        let progress = routines.progress(&routine.id, day);
        assert_eq!((progress.completed, progress.total), (1, 2));
        assert_eq!(progress.percentage, 50.0);

        habits.toggle_completion(&stretch.id, day).unwrap();
        assert!(routines.is_completed_on(&routine.id, day));
    }

    #[test]
    fn stale_snapshot_does_not_affect_progress() {
        let (habits, routines) = services();
        let water = habits.add_habit(NewHabit::daily("Water")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Morning", [water.id.clone()]))
            .unwrap();
        let day = date(2024, 1, 1);
        habits.toggle_completion(&water.id, day).unwrap();
        let snapshot = routines.refresh_for_habit(&water.id, day).unwrap();
        assert!(snapshot[0].completed);

        habits.toggle_completion(&water.id, day).unwrap();
        assert!(!routines.is_completed_on(&routine.id, day));
        assert_eq!(routines.history(&routine.id).len(), 1);
    }

    #[test]
    fn deleted_habits_are_filtered_from_progress() {
        let (habits, routines) = services();
        let a = habits.add_habit(NewHabit::daily("A")).unwrap();
        let b = habits.add_habit(NewHabit::daily("B")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Pair", [a.id.clone(), b.id.clone()]))
            .unwrap();
        let day = date(2024, 1, 1);
        habits.toggle_completion(&a.id, day).unwrap();
        habits.delete_habit(&b.id).unwrap();
        let progress = routines.progress(&routine.id, day);
        assert_eq!((progress.completed, progress.total), (1, 1));
    }

    #[test]
    fn routine_streak_requires_every_member() {
        let (habits, routines) = services();
        let a = habits.add_habit(NewHabit::daily("A")).unwrap();
        let b = habits.add_habit(NewHabit::daily("B")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Pair", [a.id.clone(), b.id.clone()]))
            .unwrap();
        for day in 1..=4 {
            habits.toggle_completion(&a.id, date(2024, 1, day)).unwrap();
        }
        for day in [1, 2, 4] {
            habits.toggle_completion(&b.id, date(2024, 1, day)).unwrap();
        }
        let streak = routines.routine_streak(&routine.id);
        assert_eq!(streak.current, 1);
        assert_eq!(streak.longest, 2);
        let rate = routines.completion_rate(&routine.id, 3, date(2024, 1, 4));
        assert_eq!(rate, 75.0);
    }

    #[test]
    fn completion_rate_over_an_unbounded_window_stays_finite() {
        let (habits, routines) = services();
        let a = habits.add_habit(NewHabit::daily("A")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Solo", [a.id.clone()]))
            .unwrap();
        habits.toggle_completion(&a.id, date(2024, 1, 4)).unwrap();
        let rate = routines.completion_rate(&routine.id, u32::MAX, date(2024, 1, 4));
        assert!(rate > 0.0 && rate < 1.0);
    }

    #[test]
    fn blank_lookup_matches_nothing() {
        let (habits, routines) = services();
        let a = habits.add_habit(NewHabit::daily("A")).unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Morning", [a.id.clone()]))
            .unwrap();
        assert!(routines.find_routine("").is_none());
        assert!(routines.find_routine("   ").is_none());
        assert_eq!(routines.find_routine(" morning ").unwrap().id, routine.id);
        assert_eq!(routines.find_routine(&routine.id[..8]).unwrap().id, routine.id);
    }

    #[test]
    fn membership_edits_and_validation() {
        let (habits, routines) = services();
        let a = habits.add_habit(NewHabit::daily("A")).unwrap();
        assert!(routines
            .create_routine(NewRoutine::new("  ", Vec::new()))
            .is_err());
        assert!(routines
            .create_routine(NewRoutine::new("Bad", Vec::new()).with_reminder("25:99"))
            .is_err());

        let routine = routines
            .create_routine(NewRoutine::new("Solo", ["ghost".to_string()]))
            .unwrap();
        assert!(routine.habit_ids.is_empty());
        assert!(routines.add_habit(&routine.id, &a.id).unwrap());
        assert!(!routines.add_habit(&routine.id, &a.id).unwrap());
        assert!(!routines.add_habit("missing", &a.id).unwrap());
        assert!(routines.remove_habit(&routine.id, &a.id).unwrap());
        assert!(routines.routine(&routine.id).unwrap().habit_ids.is_empty());
    }

    #[test]
    fn reminders_follow_routine_lifecycle() {
        let habits = Arc::new(HabitService::builder().build().unwrap());
        let sink = RecordingSink::default();
        let routines = RoutineService::builder(habits)
            .with_reminder_sink(Box::new(sink.clone()))
            .build()
            .unwrap();
        let routine = routines
            .create_routine(NewRoutine::new("Evening", Vec::new()).with_reminder("9:05"))
            .unwrap();
        assert_eq!(routine.reminder_time.as_deref(), Some("09:05"));
        routines.delete_routine(&routine.id).unwrap();

        let events = sink.events.lock().clone();
        assert_eq!(
            events,
            vec![
                format!("schedule {} 09:05:00", routine.id),
                format!("clear {}", routine.id),
            ]
        );
        assert!(routines.routine(&routine.id).is_none());
    }
}
