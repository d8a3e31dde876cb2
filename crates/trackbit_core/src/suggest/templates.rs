use std::collections::BTreeSet;

use serde::Serialize;

use super::patterns::HabitCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// Difficulty band a user tracking `habit_count` habits is ready for.
    pub fn for_habit_count(habit_count: usize) -> Self {
        match habit_count {
            0..=2 => Self::Beginner,
            3..=6 => Self::Intermediate,
            _ => Self::Advanced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutineTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub category: HabitCategory,
    pub difficulty: Difficulty,
    /// Share of users who keep the routine, `0..=1`.
    pub popularity: f64,
    pub habits: &'static [&'static str],
}

pub const TEMPLATES: &[RoutineTemplate] = &[
    RoutineTemplate {
        name: "Morning Energizer",
        description: "Wake up the body before the day starts.",
        category: HabitCategory::Health,
        difficulty: Difficulty::Beginner,
        popularity: 0.9,
        habits: &["Drink a glass of water", "Stretch for 5 minutes", "Plan the day"],
    },
    RoutineTemplate {
        name: "Evening Wind-down",
        description: "Slow down and prepare for sleep.",
        category: HabitCategory::Mindfulness,
        difficulty: Difficulty::Beginner,
        popularity: 0.85,
        habits: &["Journal", "Read for 20 minutes", "No screens after 22:00"],
    },
    RoutineTemplate {
        name: "Focus Sprint",
        description: "A protected block of deep work.",
        category: HabitCategory::Productivity,
        difficulty: Difficulty::Intermediate,
        popularity: 0.7,
        habits: &["Clear inbox", "Deep work block", "Review tomorrow's tasks"],
    },
    RoutineTemplate {
        name: "Fitness Starter",
        description: "Light movement every day.",
        category: HabitCategory::Fitness,
        difficulty: Difficulty::Beginner,
        popularity: 0.8,
        habits: &["Walk 8000 steps", "Bodyweight workout", "Cool-down stretch"],
    },
    RoutineTemplate {
        name: "Learning Hour",
        description: "One hour of deliberate study.",
        category: HabitCategory::Learning,
        difficulty: Difficulty::Intermediate,
        popularity: 0.65,
        habits: &["Read a chapter", "Practice flashcards", "Write a summary"],
    },
    RoutineTemplate {
        name: "Mindful Break",
        description: "Short resets spread through a busy day.",
        category: HabitCategory::Mindfulness,
        difficulty: Difficulty::Advanced,
        popularity: 0.6,
        habits: &["Meditate 10 minutes", "Breathing exercise", "Gratitude note"],
    },
];

pub const BASE_SCORE: f64 = 0.1;
pub const CATEGORY_BONUS: f64 = 0.25;
pub const DIFFICULTY_BONUS: f64 = 0.15;
pub const POPULARITY_WEIGHT: f64 = 0.25;
/// Upper bound (exclusive) of the random variety term.
pub const MAX_JITTER: f64 = 0.1;

/// Compatibility of a template with the user, in `[0, 1]`. `jitter` is clamped to
/// `[0, MAX_JITTER]`.
pub fn template_score(
    template: &RoutineTemplate,
    categories: &BTreeSet<HabitCategory>,
    habit_count: usize,
    jitter: f64,
) -> f64 {
    let mut score = BASE_SCORE;
    if categories.contains(&template.category) {
        score += CATEGORY_BONUS;
    }
    if Difficulty::for_habit_count(habit_count) == template.difficulty {
        score += DIFFICULTY_BONUS;
    }
    score += POPULARITY_WEIGHT * template.popularity.clamp(0.0, 1.0);
    score += jitter.clamp(0.0, MAX_JITTER);
    score.clamp(0.0, 1.0)
}

/// A one-habit starting point per category, used when the user has nothing there yet.
pub fn starter_habit(category: HabitCategory) -> (&'static str, &'static str) {
    match category {
        HabitCategory::Health => (
            "Drink 8 glasses of water",
            "Hydration is the cheapest energy boost.",
        ),
        HabitCategory::Mindfulness => (
            "Meditate 5 minutes",
            "A short daily sit builds calm over time.",
        ),
        HabitCategory::Productivity => (
            "Plan tomorrow",
            "Two minutes of planning saves the morning.",
        ),
        HabitCategory::Learning => (
            "Read 10 pages",
            "Small daily reading adds up to books.",
        ),
        HabitCategory::Fitness => (
            "Take a 20 minute walk",
            "Walking is the easiest movement to keep.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_adds_weighted_terms() {
        let template = &TEMPLATES[0];
        let categories: BTreeSet<HabitCategory> = [HabitCategory::Health].into();
        let score = template_score(template, &categories, 1, 0.0);
        assert!((score - (0.1 + 0.25 + 0.15 + 0.25 * 0.9)).abs() < 1e-9);
        let cold = template_score(template, &BTreeSet::new(), 10, 0.0);
        assert!((cold - (0.1 + 0.25 * 0.9)).abs() < 1e-9);
    }

    #[test]
    fn jitter_is_bounded() {
        let template = &TEMPLATES[0];
        let wild = template_score(template, &BTreeSet::new(), 10, 5.0);
        let tame = template_score(template, &BTreeSet::new(), 10, MAX_JITTER);
        assert_eq!(wild, tame);
        assert!(template_score(template, &BTreeSet::new(), 10, -1.0) >= 0.0);
    }

    #[test]
    fn difficulty_bands() {
        assert_eq!(Difficulty::for_habit_count(0), Difficulty::Beginner);
        assert_eq!(Difficulty::for_habit_count(4), Difficulty::Intermediate);
        assert_eq!(Difficulty::for_habit_count(7), Difficulty::Advanced);
    }
}
