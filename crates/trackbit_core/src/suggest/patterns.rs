use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::habit::{Habit, HabitLog};
use crate::schedule::{dates_between, is_due_on, weekday_index, weekday_name};
use crate::streak::completed_dates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitCategory {
    Health,
    Mindfulness,
    Productivity,
    Learning,
    Fitness,
}

impl HabitCategory {
    pub const ALL: [HabitCategory; 5] = [
        HabitCategory::Health,
        HabitCategory::Mindfulness,
        HabitCategory::Productivity,
        HabitCategory::Learning,
        HabitCategory::Fitness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Mindfulness => "mindfulness",
            Self::Productivity => "productivity",
            Self::Learning => "learning",
            Self::Fitness => "fitness",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|category| category.as_str() == raw)
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Health => &[
                "water", "hydrat", "vitamin", "sleep", "diet", "eat", "vegetable", "fruit",
                "floss", "health", "medicine", "sugar",
            ],
            Self::Mindfulness => &[
                "meditat", "breath", "journal", "gratitude", "mindful", "yoga", "relax",
                "pray", "calm",
            ],
            Self::Productivity => &[
                "plan", "email", "inbox", "focus", "work", "todo", "to-do", "clean",
                "organiz", "review", "task",
            ],
            Self::Learning => &[
                "read", "study", "learn", "course", "language", "book", "practice", "write",
                "flashcard",
            ],
            Self::Fitness => &[
                "run", "gym", "walk", "workout", "exercise", "stretch", "push-up", "pushup",
                "bike", "swim", "steps", "squat",
            ],
        }
    }
}

impl fmt::Display for HabitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword match over the habit's name and description. A habit can land in several buckets.
pub fn categorize(habit: &Habit) -> BTreeSet<HabitCategory> {
    let text = habit.search_text();
    HabitCategory::ALL
        .into_iter()
        .filter(|category| category.keywords().iter().any(|kw| text.contains(kw)))
        .collect()
}

pub fn user_categories<'a>(habits: impl IntoIterator<Item = &'a Habit>) -> BTreeSet<HabitCategory> {
    habits.into_iter().flat_map(categorize).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPattern {
    pub habit_id: String,
    /// Completion ratio per weekday (Sunday = 0), `0.0` for weekdays never seen.
    pub rates: [f64; 7],
    pub occurrences: [usize; 7],
    pub completions: [usize; 7],
}

impl WeeklyPattern {
    /// Weekdays with at least one completion, strongest first.
    pub fn best_days(&self, take: usize) -> Vec<u8> {
        let mut days: Vec<u8> = (0..7u8)
            .filter(|day| self.completions[usize::from(*day)] > 0)
            .collect();
        days.sort_by(|a, b| {
            self.rates[usize::from(*b)]
                .total_cmp(&self.rates[usize::from(*a)])
                .then(a.cmp(b))
        });
        days.truncate(take);
        days
    }

    /// `(best, worst)` among weekdays seen at least `min_occurrences` times.
    pub fn spread(&self, min_occurrences: usize) -> Option<(u8, u8)> {
        let seen: Vec<u8> = (0..7u8)
            .filter(|day| self.occurrences[usize::from(*day)] >= min_occurrences.max(1))
            .collect();
        let rate = |day: &u8| self.rates[usize::from(*day)];
        let best = seen
            .iter()
            .copied()
            .max_by(|a, b| rate(a).total_cmp(&rate(b)).then(b.cmp(a)))?;
        let worst = seen
            .iter()
            .copied()
            .min_by(|a, b| rate(a).total_cmp(&rate(b)).then(a.cmp(b)))?;
        (best != worst).then_some((best, worst))
    }

    pub fn best_day_names(&self, take: usize) -> Vec<&'static str> {
        self.best_days(take).into_iter().map(weekday_name).collect()
    }
}

/// Completions on each weekday divided by how often that weekday occurs between the first
/// and last logged date of the habit.
pub fn weekly_pattern(habit_id: &str, logs: &[HabitLog]) -> WeeklyPattern {
    let mut occurrences = [0usize; 7];
    let mut completions = [0usize; 7];
    let own: Vec<&HabitLog> = logs.iter().filter(|log| log.habit_id == habit_id).collect();
    let first = own.iter().map(|log| log.date).min();
    let last = own.iter().map(|log| log.date).max();
    if let (Some(first), Some(last)) = (first, last) {
        for date in dates_between(first, last) {
            occurrences[usize::from(weekday_index(date))] += 1;
        }
    }
    for date in completed_dates(habit_id, own.iter().copied()) {
        completions[usize::from(weekday_index(date))] += 1;
    }
    let mut rates = [0.0f64; 7];
    for day in 0..7 {
        if occurrences[day] > 0 {
            rates[day] = completions[day] as f64 / occurrences[day] as f64;
        }
    }
    WeeklyPattern {
        habit_id: habit_id.to_string(),
        rates,
        occurrences,
        completions,
    }
}

/// Jaccard similarity of two completed-date sets. Two empty sets score 0.
pub fn correlation(a: &BTreeSet<NaiveDate>, b: &BTreeSet<NaiveDate>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitCorrelation {
    pub first_id: String,
    pub first_name: String,
    pub second_id: String,
    pub second_name: String,
    pub similarity: f64,
    pub shared_days: usize,
    pub union_days: usize,
}

/// Every unordered pair of habits whose similarity is strictly above `threshold`, most
/// similar first.
pub fn correlated_pairs(
    habits: &[Habit],
    logs: &[HabitLog],
    threshold: f64,
) -> Vec<HabitCorrelation> {
    let dates: BTreeMap<&str, BTreeSet<NaiveDate>> = habits
        .iter()
        .map(|habit| (habit.id.as_str(), completed_dates(&habit.id, logs)))
        .collect();
    let mut pairs = Vec::new();
    for (i, first) in habits.iter().enumerate() {
        for second in &habits[i + 1..] {
            let (Some(a), Some(b)) = (dates.get(first.id.as_str()), dates.get(second.id.as_str()))
            else {
                continue;
            };
            let similarity = correlation(a, b);
            if similarity > threshold {
                pairs.push(HabitCorrelation {
                    first_id: first.id.clone(),
                    first_name: first.name.clone(),
                    second_id: second.id.clone(),
                    second_name: second.name.clone(),
                    similarity,
                    shared_days: a.intersection(b).count(),
                    union_days: a.union(b).count(),
                });
            }
        }
    }
    pairs.sort_by(|x, y| {
        y.similarity
            .total_cmp(&x.similarity)
            .then_with(|| x.first_name.cmp(&y.first_name))
            .then_with(|| x.second_name.cmp(&y.second_name))
    });
    pairs
}

/// `(completed, scheduled)` over the stretch between the habit's first and last log.
pub fn history_completion(habit: &Habit, logs: &[HabitLog]) -> (usize, usize) {
    let own: Vec<&HabitLog> = logs.iter().filter(|log| log.habit_id == habit.id).collect();
    let (Some(first), Some(last)) = (
        own.iter().map(|log| log.date).min(),
        own.iter().map(|log| log.date).max(),
    ) else {
        return (0, 0);
    };
    let done = completed_dates(&habit.id, own.iter().copied());
    let mut scheduled = 0;
    let mut completed = 0;
    for date in dates_between(first, last).filter(|date| is_due_on(habit, *date)) {
        scheduled += 1;
        if done.contains(&date) {
            completed += 1;
        }
    }
    (completed, scheduled)
}
