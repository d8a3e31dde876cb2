use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackbitError};
use crate::store::{Record, RecordKind};

pub const ALL_DAYS: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitFrequency {
    Daily,
    Weekly,
    Custom,
}

impl HabitFrequency {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: String,
    pub frequency: HabitFrequency,
    /// Weekday numbers, Sunday = 0.
    pub target_days: BTreeSet<u8>,
    pub target_value: Option<f64>,
    pub unit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Habit {
    /// Builds a fresh habit from an already validated form.
    pub fn from_form(form: NewHabit) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: form.name,
            description: form.description,
            icon: form.icon,
            color: form.color,
            frequency: form.frequency,
            target_days: form.target_days,
            target_value: form.target_value,
            unit: form.unit,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    /// Replaces user-editable fields, keeping identity and lifecycle timestamps.
    pub fn apply_form(&mut self, form: NewHabit) {
        self.name = form.name;
        self.description = form.description;
        self.icon = form.icon;
        self.color = form.color;
        self.frequency = form.frequency;
        self.target_days = form.target_days;
        self.target_value = form.target_value;
        self.unit = form.unit;
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_quantified(&self) -> bool {
        self.target_value.is_some()
    }

    /// Name and description joined for keyword matching.
    pub fn search_text(&self) -> String {
        match &self.description {
            Some(description) => format!("{} {}", self.name, description).to_lowercase(),
            None => self.name.to_lowercase(),
        }
    }
}

impl Record for Habit {
    const KIND: RecordKind = RecordKind::Habits;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

/// Form payload for creating or editing a habit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHabit {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: String,
    pub frequency: HabitFrequency,
    pub target_days: BTreeSet<u8>,
    pub target_value: Option<f64>,
    pub unit: Option<String>,
}

impl NewHabit {
    pub fn daily(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            icon: None,
            color: "#6366f1".to_string(),
            frequency: HabitFrequency::Daily,
            target_days: ALL_DAYS.into_iter().collect(),
            target_value: None,
            unit: None,
        }
    }

    pub fn on_days(name: impl Into<String>, days: impl IntoIterator<Item = u8>) -> Self {
        Self {
            frequency: HabitFrequency::Custom,
            target_days: days.into_iter().collect(),
            ..Self::daily(name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(mut self, value: f64, unit: impl Into<String>) -> Self {
        self.target_value = Some(value);
        self.unit = Some(unit.into());
        self
    }

    /// Checks the form and normalises it. Daily habits always cover the whole week.
    pub fn validated(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(TrackbitError::validation("habit name is required"));
        }
        if let Some(day) = self.target_days.iter().find(|day| **day > 6) {
            return Err(TrackbitError::validation(format!(
                "weekday {day} is out of range 0-6"
            )));
        }
        match self.frequency {
            HabitFrequency::Daily => {
                self.target_days = ALL_DAYS.into_iter().collect();
            }
            HabitFrequency::Weekly | HabitFrequency::Custom => {
                if self.target_days.is_empty() {
                    return Err(TrackbitError::validation(
                        "select at least one day for this habit",
                    ));
                }
            }
        }
        if let Some(target) = self.target_value {
            if !target.is_finite() || target <= 0.0 {
                return Err(TrackbitError::validation("target value must be positive"));
            }
        }
        self.description = self.description.filter(|d| !d.trim().is_empty());
        self.unit = self.unit.filter(|u| !u.trim().is_empty());
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitLog {
    pub habit_id: String,
    pub date: NaiveDate,
    pub completed: bool,
    pub value: Option<f64>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl HabitLog {
    pub fn new(habit_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            habit_id: habit_id.into(),
            date,
            completed: false,
            value: None,
            notes: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        log_key(&self.habit_id, self.date)
    }
}

impl Record for HabitLog {
    const KIND: RecordKind = RecordKind::HabitLogs;

    fn record_id(&self) -> String {
        self.key()
    }
}

/// Composite store id for the single log a habit may have on a date.
pub fn log_key(habit_id: &str, date: NaiveDate) -> String {
    format!("{habit_id}:{}", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_form_is_normalised_to_full_week() {
        let mut form = NewHabit::daily("  Read  ");
        form.target_days.clear();
        let form = form.validated().unwrap();
        assert_eq!(form.name, "Read");
        assert_eq!(form.target_days.len(), 7);
    }

    #[test]
    fn custom_form_requires_days() {
        let form = NewHabit::on_days("Gym", []);
        assert!(matches!(
            form.validated(),
            Err(TrackbitError::Validation(_))
        ));
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(NewHabit::daily("   ").validated().is_err());
    }

    #[test]
    fn out_of_range_weekday_is_rejected() {
        assert!(NewHabit::on_days("Swim", [2, 9]).validated().is_err());
    }

    #[test]
    fn non_positive_target_is_rejected() {
        let form = NewHabit::daily("Water").with_target(0.0, "glasses");
        assert!(form.validated().is_err());
    }

    #[test]
    fn non_finite_target_is_rejected() {
        for target in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let form = NewHabit::daily("Water").with_target(target, "glasses");
            assert!(matches!(form.validated(), Err(TrackbitError::Validation(_))));
        }
    }

    #[test]
    fn frequency_parses_case_insensitively() {
        assert_eq!(HabitFrequency::parse("Weekly"), Some(HabitFrequency::Weekly));
        assert_eq!(HabitFrequency::parse("monthly"), None);
    }
}
