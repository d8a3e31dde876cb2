use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TrackbitError};
use crate::habit::{Habit, HabitLog, NewHabit};
use crate::schedule::is_due_on;
use crate::store::{MemoryStore, RecordKind, RecordStore, Records};
use crate::streak::{self, compute_streak, StreakRecord};

pub const DEFAULT_USER: &str = "local";

type LogKey = (String, NaiveDate);

#[derive(Debug, Default)]
struct HabitState {
    habits: BTreeMap<String, Habit>,
    logs: BTreeMap<LogKey, HabitLog>,
    streaks: HashMap<String, StreakRecord>,
}

impl HabitState {
    fn completed_dates(&self, habit_id: &str) -> Vec<NaiveDate> {
        self.logs_for(habit_id)
            .filter(|log| log.completed)
            .map(|log| log.date)
            .collect()
    }

    fn logs_for<'a>(&'a self, habit_id: &'a str) -> impl Iterator<Item = &'a HabitLog> + 'a {
        let start = (habit_id.to_string(), NaiveDate::MIN);
        let end = (habit_id.to_string(), NaiveDate::MAX);
        self.logs.range(start..=end).map(|(_, log)| log)
    }
}

/// Habit and log repository for one user. Every mutation is written to the record store
/// first and only then applied in memory, so a failed write leaves the model untouched.
pub struct HabitService {
    store: Arc<dyn RecordStore>,
    user_id: String,
    state: RwLock<HabitState>,
}

pub struct HabitServiceBuilder {
    store: Option<Arc<dyn RecordStore>>,
    user_id: String,
}

impl HabitServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            user_id: DEFAULT_USER.to_string(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn build(self) -> Result<HabitService> {
        let service = HabitService {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>),
            user_id: self.user_id,
            state: RwLock::new(HabitState::default()),
        };
        service.reload_all()?;
        Ok(service)
    }
}

impl Default for HabitServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HabitService {
    pub fn builder() -> HabitServiceBuilder {
        HabitServiceBuilder::new()
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn records(&self) -> Records<'_> {
        Records::new(self.store.as_ref(), &self.user_id)
    }

    /// Hydrates habits, logs and streak records from the store. Streaks are re-derived from
    /// the logs, keeping any persisted high-water mark.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub fn reload_all(&self) -> Result<()> {
        let records = self.records();
        let habits: Vec<Habit> = records.load_all()?;
        let logs: Vec<HabitLog> = records.load_all()?;
        let persisted: Vec<StreakRecord> = records.load_all()?;

        let mut state = HabitState::default();
        for habit in habits {
            state.habits.insert(habit.id.clone(), habit);
        }
        let mut orphans = 0usize;
        for log in logs {
            if !state.habits.contains_key(&log.habit_id) {
                orphans += 1;
                continue;
            }
            state.logs.insert((log.habit_id.clone(), log.date), log);
        }
        let mut persisted: HashMap<String, StreakRecord> = persisted
            .into_iter()
            .map(|record| (record.habit_id.clone(), record))
            .collect();
        let habit_ids: Vec<String> = state.habits.keys().cloned().collect();
        for habit_id in habit_ids {
            let previous = persisted
                .remove(&habit_id)
                .unwrap_or_else(|| StreakRecord::empty(&habit_id));
            let record = previous.advance(compute_streak(state.completed_dates(&habit_id)));
            state.streaks.insert(habit_id, record);
        }

        debug!(
            habits = state.habits.len(),
            logs = state.logs.len(),
            orphans,
            "hydrated habit state"
        );
        *self.state.write() = state;
        Ok(())
    }

    #[instrument(skip(self, form), fields(name = %form.name))]
    pub fn add_habit(&self, form: NewHabit) -> Result<Habit> {
        let habit = Habit::from_form(form.validated()?);
        let streak = StreakRecord::empty(&habit.id);
        let records = self.records();
        records.save(&habit)?;
        if let Err(err) = records.save(&streak) {
            warn!(%err, habit_id = %habit.id, "unable to persist initial streak record");
        }

        let mut state = self.state.write();
        state.habits.insert(habit.id.clone(), habit.clone());
        state.streaks.insert(habit.id.clone(), streak);
        info!(habit_id = %habit.id, "habit created");
        Ok(habit)
    }

    #[instrument(skip(self, form))]
    pub fn update_habit(&self, habit_id: &str, form: NewHabit) -> Result<Habit> {
        let form = form.validated()?;
        let mut state = self.state.write();
        let mut habit = state
            .habits
            .get(habit_id)
            .cloned()
            .ok_or_else(|| TrackbitError::not_found(RecordKind::Habits, habit_id))?;
        habit.apply_form(form);
        self.records().save(&habit)?;
        state.habits.insert(habit.id.clone(), habit.clone());
        Ok(habit)
    }

    /// Soft delete. Logs and streaks are retained.
    #[instrument(skip(self))]
    pub fn archive_habit(&self, habit_id: &str) -> Result<bool> {
        self.set_archived(habit_id, true)
    }

    #[instrument(skip(self))]
    pub fn restore_habit(&self, habit_id: &str) -> Result<bool> {
        self.set_archived(habit_id, false)
    }

    fn set_archived(&self, habit_id: &str, archived: bool) -> Result<bool> {
        let mut state = self.state.write();
        let Some(mut habit) = state.habits.get(habit_id).cloned() else {
            debug!(habit_id, "archive state change ignored for unknown habit");
            return Ok(false);
        };
        if habit.is_archived() == archived {
            return Ok(true);
        }
        habit.archived_at = archived.then(Utc::now);
        self.records().save(&habit)?;
        state.habits.insert(habit.id.clone(), habit);
        Ok(true)
    }

    /// Hard delete, cascading to the habit's logs and streak record.
    #[instrument(skip(self))]
    pub fn delete_habit(&self, habit_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        if !state.habits.contains_key(habit_id) {
            debug!(habit_id, "delete ignored for unknown habit");
            return Ok(false);
        }
        let records = self.records();
        records.remove::<Habit>(habit_id)?;

        let keys: Vec<LogKey> = state
            .logs_for(habit_id)
            .map(|log| (log.habit_id.clone(), log.date))
            .collect();
        for key in &keys {
            let log_id = crate::habit::log_key(&key.0, key.1);
            if let Err(err) = records.remove::<HabitLog>(&log_id) {
                warn!(%err, %log_id, "orphaned habit log left in store");
            }
            state.logs.remove(key);
        }
        if let Err(err) = records.remove::<StreakRecord>(habit_id) {
            warn!(%err, habit_id, "orphaned streak record left in store");
        }
        state.streaks.remove(habit_id);
        state.habits.remove(habit_id);
        info!(habit_id, logs = keys.len(), "habit deleted");
        Ok(true)
    }

    /// Flips the log for `(habit_id, date)`, creating it as completed when absent.
    #[instrument(skip(self))]
    pub fn toggle_completion(&self, habit_id: &str, date: NaiveDate) -> Result<Option<HabitLog>> {
        let mut state = self.state.write();
        let Some(habit) = state.habits.get(habit_id) else {
            debug!(habit_id, %date, "toggle ignored for unknown habit");
            return Ok(None);
        };
        let target = habit.target_value;
        let mut log = match state.logs.get(&(habit_id.to_string(), date)) {
            Some(existing) => {
                let mut log = existing.clone();
                log.completed = !log.completed;
                log
            }
            None => HabitLog {
                completed: true,
                value: target,
                ..HabitLog::new(habit_id, date)
            },
        };
        log.updated_at = Utc::now();
        self.commit_log(&mut state, log).map(Some)
    }

    /// Records a measured value. Completion follows `value > 0`; values above the target
    /// are kept as-is.
    #[instrument(skip(self))]
    pub fn update_value(
        &self,
        habit_id: &str,
        date: NaiveDate,
        value: f64,
    ) -> Result<Option<HabitLog>> {
        if !value.is_finite() || value < 0.0 {
            return Err(TrackbitError::validation("value must be zero or positive"));
        }
        let mut state = self.state.write();
        if !state.habits.contains_key(habit_id) {
            debug!(habit_id, %date, "value ignored for unknown habit");
            return Ok(None);
        }
        let mut log = state
            .logs
            .get(&(habit_id.to_string(), date))
            .cloned()
            .unwrap_or_else(|| HabitLog::new(habit_id, date));
        log.value = Some(value);
        log.completed = value > 0.0;
        log.updated_at = Utc::now();
        self.commit_log(&mut state, log).map(Some)
    }

    #[instrument(skip(self, notes))]
    pub fn set_notes(
        &self,
        habit_id: &str,
        date: NaiveDate,
        notes: &str,
    ) -> Result<Option<HabitLog>> {
        let mut state = self.state.write();
        if !state.habits.contains_key(habit_id) {
            return Ok(None);
        }
        let mut log = state
            .logs
            .get(&(habit_id.to_string(), date))
            .cloned()
            .unwrap_or_else(|| HabitLog::new(habit_id, date));
        let trimmed = notes.trim();
        log.notes = (!trimmed.is_empty()).then(|| trimmed.to_string());
        log.updated_at = Utc::now();
        self.commit_log(&mut state, log).map(Some)
    }

    fn commit_log(&self, state: &mut HabitState, log: HabitLog) -> Result<HabitLog> {
        let records = self.records();
        records.save(&log)?;
        let habit_id = log.habit_id.clone();
        state
            .logs
            .insert((habit_id.clone(), log.date), log.clone());

        let stats = compute_streak(state.completed_dates(&habit_id));
        let record = state
            .streaks
            .get(&habit_id)
            .cloned()
            .unwrap_or_else(|| StreakRecord::empty(&habit_id))
            .advance(stats);
        if let Err(err) = records.save(&record) {
            warn!(%err, %habit_id, "streak record not persisted; it will be re-derived on load");
        }
        state.streaks.insert(habit_id, record);
        Ok(log)
    }

    pub fn habits(&self) -> Vec<Habit> {
        let mut habits: Vec<Habit> = self.state.read().habits.values().cloned().collect();
        habits.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        habits
    }

    pub fn active_habits(&self) -> Vec<Habit> {
        self.habits()
            .into_iter()
            .filter(|habit| !habit.is_archived())
            .collect()
    }

    pub fn habit(&self, habit_id: &str) -> Option<Habit> {
        self.state.read().habits.get(habit_id).cloned()
    }

    /// Case-insensitive lookup by id or exact name.
    /// Exact id, then case-insensitive name, then id prefix. Blank input matches nothing.
    pub fn find_habit(&self, id_or_name: &str) -> Option<Habit> {
        let needle = id_or_name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(habit) = self.habit(id_or_name) {
            return Some(habit);
        }
        self.habits()
            .into_iter()
            .find(|habit| habit.name.to_lowercase() == needle || habit.id.starts_with(&needle))
    }

    pub fn habits_due_on(&self, date: NaiveDate) -> Vec<Habit> {
        self.active_habits()
            .into_iter()
            .filter(|habit| is_due_on(habit, date))
            .collect()
    }

    pub fn log_for(&self, habit_id: &str, date: NaiveDate) -> Option<HabitLog> {
        self.state
            .read()
            .logs
            .get(&(habit_id.to_string(), date))
            .cloned()
    }

    pub fn is_completed(&self, habit_id: &str, date: NaiveDate) -> bool {
        self.log_for(habit_id, date)
            .map(|log| log.completed)
            .unwrap_or(false)
    }

    /// Logs for one habit, oldest first.
    pub fn logs_for(&self, habit_id: &str) -> Vec<HabitLog> {
        self.state.read().logs_for(habit_id).cloned().collect()
    }

    pub fn logs_on(&self, date: NaiveDate) -> Vec<HabitLog> {
        self.state
            .read()
            .logs
            .values()
            .filter(|log| log.date == date)
            .cloned()
            .collect()
    }

    pub fn all_logs(&self) -> Vec<HabitLog> {
        self.state.read().logs.values().cloned().collect()
    }

    pub fn streak(&self, habit_id: &str) -> Option<StreakRecord> {
        self.state.read().streaks.get(habit_id).cloned()
    }

    /// Percentage of scheduled days completed in `[today - days, today]`; 0 for unknown habits.
    pub fn completion_rate(&self, habit_id: &str, days: u32, today: NaiveDate) -> f64 {
        let state = self.state.read();
        match state.habits.get(habit_id) {
            Some(habit) => {
                streak::habit_completion_rate(habit, state.logs_for(habit_id), days, today)
            }
            None => 0.0,
        }
    }

    /// Percentage of active habits due on `date` that were completed.
    pub fn completion_rate_on(&self, date: NaiveDate) -> f64 {
        let state = self.state.read();
        let logs: Vec<HabitLog> = state
            .logs
            .values()
            .filter(|log| log.date == date)
            .cloned()
            .collect();
        streak::date_completion_rate(state.habits.values(), &logs, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::HabitFrequency;
    use serde_json::Value;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service() -> HabitService {
        HabitService::builder().build().unwrap()
    }

    /// Store that rejects writes once armed.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: parking_lot::Mutex<bool>,
    }

    impl FlakyStore {
        fn fail_writes(&self) {
            *self.failing.lock() = true;
        }
    }

    impl RecordStore for FlakyStore {
        fn upsert(&self, user_id: &str, kind: RecordKind, id: &str, record: Value) -> Result<()> {
            if *self.failing.lock() {
                return Err(TrackbitError::storage("backend unreachable"));
            }
            self.inner.upsert(user_id, kind, id, record)
        }

        fn get(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<Option<Value>> {
            self.inner.get(user_id, kind, id)
        }

        fn delete(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<bool> {
            if *self.failing.lock() {
                return Err(TrackbitError::storage("backend unreachable"));
            }
            self.inner.delete(user_id, kind, id)
        }

        fn list(&self, user_id: &str, kind: RecordKind) -> Result<Vec<Value>> {
            self.inner.list(user_id, kind)
        }
    }

    #[test]
    fn add_habit_initialises_zero_streak() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("Read")).unwrap();
        let streak = service.streak(&habit.id).unwrap();
        assert_eq!((streak.current, streak.longest), (0, 0));
    }

    #[test]
    fn add_habit_rejects_invalid_forms_without_mutation() {
        let service = service();
        assert!(matches!(
            service.add_habit(NewHabit::daily("")),
            Err(TrackbitError::Validation(_))
        ));
        assert!(service
            .add_habit(NewHabit::on_days("Gym", []))
            .is_err());
        assert!(service.habits().is_empty());
    }

    #[test]
    fn double_toggle_restores_state_with_single_row() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("Meditate")).unwrap();
        let day = date(2024, 2, 1);

        let first = service.toggle_completion(&habit.id, day).unwrap().unwrap();
        assert!(first.completed);
        let second = service.toggle_completion(&habit.id, day).unwrap().unwrap();
        assert!(!second.completed);
        assert!(!service.is_completed(&habit.id, day));
        assert_eq!(service.logs_for(&habit.id).len(), 1);
        assert_eq!(service.all_logs().len(), 1);
    }

    #[test]
    fn concurrent_toggles_keep_one_row_per_day() {
        let service = Arc::new(service());
        let habit = service.add_habit(NewHabit::daily("Meditate")).unwrap();
        let day = date(2024, 2, 1);

        std::thread::scope(|scope| {
            for _ in 0..9 {
                let service = service.clone();
                let id = habit.id.clone();
                scope.spawn(move || {
                    service.toggle_completion(&id, day).unwrap();
                });
            }
        });

        assert_eq!(service.logs_for(&habit.id).len(), 1);
        // An odd number of flips ends completed.
        assert!(service.is_completed(&habit.id, day));
        assert_eq!(service.streak(&habit.id).unwrap().current, 1);
    }

    #[test]
    fn blank_lookup_matches_nothing() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("Read")).unwrap();
        assert!(service.find_habit("").is_none());
        assert!(service.find_habit(" \t ").is_none());
        assert_eq!(service.find_habit("READ").unwrap().id, habit.id);
        assert_eq!(service.find_habit(&habit.id[..6]).unwrap().id, habit.id);
    }

    #[test]
    fn new_toggle_defaults_value_to_target() {
        let service = service();
        let habit = service
            .add_habit(NewHabit::daily("Water").with_target(8.0, "glasses"))
            .unwrap();
        let log = service
            .toggle_completion(&habit.id, date(2024, 2, 1))
            .unwrap()
            .unwrap();
        assert_eq!(log.value, Some(8.0));
    }

    #[test]
    fn update_value_drives_completion_and_allows_overachievement() {
        let service = service();
        let habit = service
            .add_habit(NewHabit::daily("Pushups").with_target(20.0, "reps"))
            .unwrap();
        let day = date(2024, 2, 1);
        let log = service.update_value(&habit.id, day, 35.0).unwrap().unwrap();
        assert!(log.completed);
        assert_eq!(log.value, Some(35.0));
        let log = service.update_value(&habit.id, day, 0.0).unwrap().unwrap();
        assert!(!log.completed);
        assert!(service.update_value(&habit.id, day, -1.0).is_err());
        assert_eq!(service.logs_for(&habit.id).len(), 1);
    }

    #[test]
    fn unknown_habit_mutations_are_no_ops() {
        let service = service();
        let day = date(2024, 2, 1);
        assert!(service.toggle_completion("missing", day).unwrap().is_none());
        assert!(service.update_value("missing", day, 1.0).unwrap().is_none());
        assert!(!service.archive_habit("missing").unwrap());
        assert!(!service.delete_habit("missing").unwrap());
        assert!(service.all_logs().is_empty());
    }

    #[test]
    fn streak_scenario_with_gap() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("A")).unwrap();
        for day in [1, 2, 3, 5] {
            service
                .toggle_completion(&habit.id, date(2024, 1, day))
                .unwrap();
        }
        let streak = service.streak(&habit.id).unwrap();
        assert_eq!(streak.current, 1);
        assert_eq!(streak.longest, 3);
    }

    #[test]
    fn longest_streak_never_decreases_across_toggles() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("A")).unwrap();
        let sequence = [1, 2, 3, 2, 4, 1, 3, 5, 6, 2, 4];
        let mut high_water = 0;
        for day in sequence {
            service
                .toggle_completion(&habit.id, date(2024, 1, day))
                .unwrap();
            let longest = service.streak(&habit.id).unwrap().longest;
            assert!(longest >= high_water);
            high_water = longest;
        }
    }

    #[test]
    fn archive_keeps_logs_and_delete_cascades() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("Journal")).unwrap();
        service
            .toggle_completion(&habit.id, date(2024, 1, 1))
            .unwrap();

        assert!(service.archive_habit(&habit.id).unwrap());
        assert!(service.habit(&habit.id).unwrap().is_archived());
        assert!(service.active_habits().is_empty());
        assert_eq!(service.logs_for(&habit.id).len(), 1);

        assert!(service.restore_habit(&habit.id).unwrap());
        assert_eq!(service.active_habits().len(), 1);

        assert!(service.delete_habit(&habit.id).unwrap());
        assert!(service.habit(&habit.id).is_none());
        assert!(service.logs_for(&habit.id).is_empty());
        assert!(service.streak(&habit.id).is_none());
        let store = service.store();
        assert!(store
            .list(service.user_id(), RecordKind::HabitLogs)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn update_habit_revalidates_and_reports_unknown_ids() {
        let service = service();
        let habit = service.add_habit(NewHabit::daily("Run")).unwrap();
        let updated = service
            .update_habit(&habit.id, NewHabit::on_days("Run", [2, 4]))
            .unwrap();
        assert_eq!(updated.frequency, HabitFrequency::Custom);
        assert_eq!(updated.created_at, habit.created_at);
        assert!(matches!(
            service.update_habit("nope", NewHabit::daily("Run")),
            Err(TrackbitError::NotFound { .. })
        ));
        assert!(service
            .update_habit(&habit.id, NewHabit::on_days("Run", []))
            .is_err());
    }

    #[test]
    fn failed_writes_leave_memory_untouched() {
        let store = Arc::new(FlakyStore::default());
        let service = HabitService::builder()
            .with_store(store.clone())
            .build()
            .unwrap();
        let habit = service.add_habit(NewHabit::daily("Floss")).unwrap();
        store.fail_writes();

        assert!(matches!(
            service.toggle_completion(&habit.id, date(2024, 1, 1)),
            Err(TrackbitError::Storage(_))
        ));
        assert!(service.logs_for(&habit.id).is_empty());
        assert!(service.add_habit(NewHabit::daily("Other")).is_err());
        assert_eq!(service.habits().len(), 1);
        assert!(service.delete_habit(&habit.id).is_err());
        assert!(service.habit(&habit.id).is_some());
    }

    #[test]
    fn reload_rederives_streaks_from_logs() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let habit_id = {
            let service = HabitService::builder()
                .with_store(store.clone())
                .build()
                .unwrap();
            let habit = service.add_habit(NewHabit::daily("Walk")).unwrap();
            for day in 1..=4 {
                service
                    .toggle_completion(&habit.id, date(2024, 1, day))
                    .unwrap();
            }
            habit.id
        };
        store
            .delete(DEFAULT_USER, RecordKind::Streaks, &habit_id)
            .unwrap();

        let reloaded = HabitService::builder().with_store(store).build().unwrap();
        let streak = reloaded.streak(&habit_id).unwrap();
        assert_eq!((streak.current, streak.longest), (4, 4));
    }

    #[test]
    fn date_rate_and_due_lists_follow_schedule() {
        let service = service();
        let daily = service.add_habit(NewHabit::daily("Read")).unwrap();
        let monday = service.add_habit(NewHabit::on_days("Gym", [1])).unwrap();
        let monday_date = date(2024, 1, 1);
        let tuesday_date = date(2024, 1, 2);

        assert_eq!(service.habits_due_on(monday_date).len(), 2);
        assert_eq!(service.habits_due_on(tuesday_date).len(), 1);
        service.toggle_completion(&daily.id, monday_date).unwrap();
        assert_eq!(service.completion_rate_on(monday_date), 50.0);
        service.toggle_completion(&monday.id, monday_date).unwrap();
        assert_eq!(service.completion_rate_on(monday_date), 100.0);
        assert_eq!(service.completion_rate("missing", 7, monday_date), 0.0);
    }
}
