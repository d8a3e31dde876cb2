use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Result, TrackbitError};
use crate::schedule::dates_between;
use crate::service::HabitService;
use crate::store::{Record, RecordKind, Records};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitGoal {
    pub id: String,
    pub habit_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target_days: u32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HabitGoal {
    /// Number of days in the window, `start_date..=end_date`.
    pub fn total_days(&self) -> u32 {
        self.target_days
    }
}

impl Record for HabitGoal {
    const KIND: RecordKind = RecordKind::HabitGoals;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalThresholds {
    pub effective: f64,
    pub moderate: f64,
}

impl Default for GoalThresholds {
    fn default() -> Self {
        Self {
            effective: 0.8,
            moderate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effectiveness {
    HighlyEffective,
    ModeratelyEffective,
    NeedsImprovement,
}

impl Effectiveness {
    pub fn classify(rate: f64, thresholds: GoalThresholds) -> Self {
        if rate >= thresholds.effective {
            Self::HighlyEffective
        } else if rate >= thresholds.moderate {
            Self::ModeratelyEffective
        } else {
            Self::NeedsImprovement
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HighlyEffective => "Highly Effective",
            Self::ModeratelyEffective => "Moderately Effective",
            Self::NeedsImprovement => "Needs Improvement",
        }
    }
}

impl fmt::Display for Effectiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalAssessment {
    pub goal_id: String,
    pub completed_days: u32,
    pub total_days: u32,
    /// Fraction in `[0, 1]`.
    pub rate: f64,
    pub effectiveness: Effectiveness,
    pub days_remaining: u32,
}

/// Scores a goal against completion dates. Pure; safe to call repeatedly.
pub fn assess_goal(
    goal: &HabitGoal,
    completed: &std::collections::BTreeSet<NaiveDate>,
    thresholds: GoalThresholds,
    today: NaiveDate,
) -> GoalAssessment {
    let completed_days = dates_between(goal.start_date, goal.end_date)
        .filter(|date| completed.contains(date))
        .count() as u32;
    let total_days = goal.total_days();
    let rate = if total_days == 0 {
        0.0
    } else {
        f64::from(completed_days) / f64::from(total_days)
    };
    let days_remaining = if today > goal.end_date {
        0
    } else {
        let from = today.max(goal.start_date);
        ((goal.end_date - from).num_days() + 1) as u32
    };
    GoalAssessment {
        goal_id: goal.id.clone(),
        completed_days,
        total_days,
        rate,
        effectiveness: Effectiveness::classify(rate, thresholds),
        days_remaining,
    }
}

pub struct GoalService {
    habits: Arc<HabitService>,
    thresholds: GoalThresholds,
    goals: RwLock<BTreeMap<String, HabitGoal>>,
}

impl GoalService {
    pub fn new(habits: Arc<HabitService>, thresholds: GoalThresholds) -> Result<Self> {
        let service = Self {
            habits,
            thresholds,
            goals: RwLock::new(BTreeMap::new()),
        };
        service.reload_all()?;
        Ok(service)
    }

    pub fn thresholds(&self) -> GoalThresholds {
        self.thresholds
    }

    fn with_records<T>(&self, f: impl FnOnce(Records<'_>) -> Result<T>) -> Result<T> {
        let store = self.habits.store();
        f(Records::new(store.as_ref(), self.habits.user_id()))
    }

    pub fn reload_all(&self) -> Result<()> {
        let goals: Vec<HabitGoal> = self.with_records(|records| records.load_all())?;
        debug!(goals = goals.len(), "hydrated goals");
        *self.goals.write() = goals
            .into_iter()
            .map(|goal| (goal.id.clone(), goal))
            .collect();
        Ok(())
    }

    /// Opens a window of `target_days` days starting today, so the last day is
    /// `today + target_days - 1`.
    #[instrument(skip(self, notes))]
    pub fn create_goal(
        &self,
        habit_id: &str,
        target_days: u32,
        notes: Option<String>,
        today: NaiveDate,
    ) -> Result<HabitGoal> {
        if target_days == 0 {
            return Err(TrackbitError::validation("a goal needs at least one day"));
        }
        if self.habits.habit(habit_id).is_none() {
            return Err(TrackbitError::not_found(RecordKind::Habits, habit_id));
        }
        let end_date = today
            .checked_add_days(Days::new(u64::from(target_days - 1)))
            .ok_or_else(|| {
                TrackbitError::validation(format!("a {target_days} day goal ends past the calendar"))
            })?;
        let goal = HabitGoal {
            id: uuid::Uuid::new_v4().to_string(),
            habit_id: habit_id.to_string(),
            start_date: today,
            end_date,
            target_days,
            notes: notes.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
        };
        self.with_records(|records| records.save(&goal))?;
        self.goals.write().insert(goal.id.clone(), goal.clone());
        Ok(goal)
    }

    pub fn assess(&self, goal: &HabitGoal, today: NaiveDate) -> GoalAssessment {
        let completed = crate::streak::completed_dates(
            &goal.habit_id,
            self.habits.logs_for(&goal.habit_id).iter(),
        );
        assess_goal(goal, &completed, self.thresholds, today)
    }

    pub fn goal(&self, goal_id: &str) -> Option<HabitGoal> {
        self.goals.read().get(goal_id).cloned()
    }

    pub fn goals(&self) -> Vec<HabitGoal> {
        let mut goals: Vec<HabitGoal> = self.goals.read().values().cloned().collect();
        goals.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        goals
    }

    pub fn goals_for(&self, habit_id: &str) -> Vec<HabitGoal> {
        self.goals()
            .into_iter()
            .filter(|goal| goal.habit_id == habit_id)
            .collect()
    }

    #[instrument(skip(self))]
    pub fn delete_goal(&self, goal_id: &str) -> Result<bool> {
        let mut goals = self.goals.write();
        if !goals.contains_key(goal_id) {
            return Ok(false);
        }
        self.with_records(|records| records.remove::<HabitGoal>(goal_id))?;
        goals.remove(goal_id);
        Ok(true)
    }
}
