//! Pattern-based habit suggestions.
//!
//! The engine is a pure function of the habits, logs and routines it is handed. Every
//! suggestion carries the statistics its confidence was computed from in `reasoning`.

mod patterns;
mod templates;

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::habit::{Habit, HabitLog};
use crate::profile::UserProfile;
use crate::routine::Routine;

pub use patterns::{
    categorize, correlated_pairs, correlation, history_completion, user_categories,
    weekly_pattern, HabitCategory, HabitCorrelation, WeeklyPattern,
};
pub use templates::{starter_habit, template_score, Difficulty, RoutineTemplate, TEMPLATES};

pub const DEFAULT_LIMIT: usize = 5;
/// Similarity above which two habits count as correlated.
pub const CANDIDATE_SIMILARITY: f64 = 0.3;
pub const PAIRING_SIMILARITY: f64 = 0.7;
const MAX_PAIRING_CONFIDENCE: f64 = 0.95;
const LOW_COMPLETION: f64 = 0.5;
const MIN_SCHEDULED_FOR_OPTIMIZATION: usize = 5;
const TIMING_GAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    CorrelationPairing,
    Optimization,
    Timing,
    RoutineTemplate,
    NewHabit,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CorrelationPairing => "correlation-pairing",
            Self::Optimization => "optimization",
            Self::Timing => "timing",
            Self::RoutineTemplate => "routine-template",
            Self::NewHabit => "new-habit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub title: String,
    pub reasoning: String,
    /// `[0, 1]`.
    pub confidence: f64,
    /// Existing habits the suggestion is about.
    pub habit_ids: Vec<String>,
    /// Names of habits the suggestion proposes to create.
    pub proposed_habits: Vec<String>,
}

/// Borrowed view of the user's data.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionInput<'a> {
    pub habits: &'a [Habit],
    pub logs: &'a [HabitLog],
    pub routines: &'a [Routine],
    pub profile: Option<&'a UserProfile>,
}

impl<'a> SuggestionInput<'a> {
    pub fn new(habits: &'a [Habit], logs: &'a [HabitLog], routines: &'a [Routine]) -> Self {
        Self {
            habits,
            logs,
            routines,
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: Option<&'a UserProfile>) -> Self {
        self.profile = profile;
        self
    }
}

pub struct SuggestionEngine<R: Rng> {
    rng: R,
    limit: usize,
}

impl SuggestionEngine<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_os_rng() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl<R: Rng> SuggestionEngine<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Ranked suggestions, best first, at most `limit`. Empty when there are no habits.
    pub fn generate(&mut self, input: SuggestionInput<'_>) -> Vec<Suggestion> {
        let habits: Vec<Habit> = input
            .habits
            .iter()
            .filter(|habit| !habit.is_archived())
            .cloned()
            .collect();
        if habits.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        out.extend(pairing_suggestions(&habits, input.logs, input.routines));
        for habit in &habits {
            out.extend(optimization_suggestion(habit, input.logs));
            out.extend(timing_suggestion(habit, input.logs));
        }
        out.extend(self.template_suggestions(&habits, input.routines));
        out.extend(new_habit_suggestions(&habits, input.profile));

        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.title.cmp(&b.title))
        });
        debug!(candidates = out.len(), limit = self.limit, "ranked suggestions");
        out.truncate(self.limit);
        out
    }

    fn template_suggestions(
        &mut self,
        habits: &[Habit],
        routines: &[Routine],
    ) -> Vec<Suggestion> {
        let categories = user_categories(habits);
        let names: BTreeSet<String> = habits.iter().map(|h| h.name.to_lowercase()).collect();
        let taken: BTreeSet<String> = routines.iter().map(|r| r.name.to_lowercase()).collect();
        let mut out = Vec::new();
        for template in TEMPLATES {
            // Draw for every template so one skipped entry does not shift the others.
            let jitter = self.rng.random_range(0.0..templates::MAX_JITTER);
            if taken.contains(&template.name.to_lowercase()) {
                continue;
            }
            let proposed: Vec<String> = template
                .habits
                .iter()
                .filter(|name| !names.contains(&name.to_lowercase()))
                .map(|name| name.to_string())
                .collect();
            if proposed.is_empty() {
                continue;
            }
            let score = template_score(template, &categories, habits.len(), jitter);
            let category_note = if categories.contains(&template.category) {
                format!("you already track {} habits", template.category)
            } else {
                format!("it adds {} to your mix", template.category)
            };
            out.push(Suggestion {
                kind: SuggestionKind::RoutineTemplate,
                title: format!("Try the {} routine", template.name),
                reasoning: format!(
                    "{}; {} fits someone tracking {} habits; {:.0}% of people keep it",
                    capitalize(&category_note),
                    template.difficulty.as_str(),
                    habits.len(),
                    template.popularity * 100.0
                ),
                confidence: score,
                habit_ids: Vec::new(),
                proposed_habits: proposed,
            });
        }
        out
    }
}

fn pairing_suggestions(
    habits: &[Habit],
    logs: &[HabitLog],
    routines: &[Routine],
) -> Vec<Suggestion> {
    correlated_pairs(habits, logs, PAIRING_SIMILARITY)
        .into_iter()
        .filter(|pair| {
            !routines.iter().any(|routine| {
                routine.habit_ids.contains(&pair.first_id)
                    && routine.habit_ids.contains(&pair.second_id)
            })
        })
        .map(|pair| Suggestion {
            kind: SuggestionKind::CorrelationPairing,
            title: format!("Pair {} with {}", pair.first_name, pair.second_name),
            reasoning: format!(
                "{} and {} were completed together on {} of {} active days ({:.0}% overlap)",
                pair.first_name,
                pair.second_name,
                pair.shared_days,
                pair.union_days,
                pair.similarity * 100.0
            ),
            confidence: pair.similarity.min(MAX_PAIRING_CONFIDENCE),
            habit_ids: vec![pair.first_id, pair.second_id],
            proposed_habits: Vec::new(),
        })
        .collect()
}

fn optimization_suggestion(habit: &Habit, logs: &[HabitLog]) -> Option<Suggestion> {
    let (completed, scheduled) = history_completion(habit, logs);
    if scheduled < MIN_SCHEDULED_FOR_OPTIMIZATION {
        return None;
    }
    let rate = completed as f64 / scheduled as f64;
    if rate >= LOW_COMPLETION {
        return None;
    }
    let pattern = weekly_pattern(&habit.id, logs);
    let best = pattern.best_day_names(3);
    let advice = if best.is_empty() {
        "start with a single fixed day".to_string()
    } else {
        format!("you do best on {}", best.join(", "))
    };
    Some(Suggestion {
        kind: SuggestionKind::Optimization,
        title: format!("Make {} easier to keep", habit.name),
        reasoning: format!(
            "Completed {completed} of {scheduled} scheduled days ({:.0}%); {advice}",
            rate * 100.0
        ),
        confidence: (0.5 + (LOW_COMPLETION - rate) * 0.8).min(0.9),
        habit_ids: vec![habit.id.clone()],
        proposed_habits: Vec::new(),
    })
}

fn timing_suggestion(habit: &Habit, logs: &[HabitLog]) -> Option<Suggestion> {
    let pattern = weekly_pattern(&habit.id, logs);
    let (best, worst) = pattern.spread(2)?;
    let best_rate = pattern.rates[usize::from(best)];
    let worst_rate = pattern.rates[usize::from(worst)];
    let gap = best_rate - worst_rate;
    if gap < TIMING_GAP {
        return None;
    }
    let best_name = crate::schedule::weekday_name(best);
    let worst_name = crate::schedule::weekday_name(worst);
    Some(Suggestion {
        kind: SuggestionKind::Timing,
        title: format!("Schedule {} around {}", habit.name, best_name),
        reasoning: format!(
            "{best_name}: {:.0}% completed vs {worst_name}: {:.0}%",
            best_rate * 100.0,
            worst_rate * 100.0
        ),
        confidence: (0.4 + gap * 0.5).min(0.9),
        habit_ids: vec![habit.id.clone()],
        proposed_habits: Vec::new(),
    })
}

fn new_habit_suggestions(habits: &[Habit], profile: Option<&UserProfile>) -> Vec<Suggestion> {
    let covered = user_categories(habits);
    let focus: BTreeSet<HabitCategory> = profile
        .map(|profile| profile.lifestyle_focus.clone())
        .unwrap_or_default();
    let base = (0.45 - 0.02 * habits.len() as f64).max(0.2);
    HabitCategory::ALL
        .into_iter()
        .filter(|category| !covered.contains(category))
        .map(|category| {
            let (name, why) = starter_habit(category);
            let focused = focus.contains(&category);
            let reasoning = if focused {
                format!(
                    "None of your {} habits cover {category}, which you listed as a focus. {why}",
                    habits.len()
                )
            } else {
                format!("None of your {} habits cover {category}. {why}", habits.len())
            };
            Suggestion {
                kind: SuggestionKind::NewHabit,
                title: format!("Add a {category} habit: {name}"),
                reasoning,
                confidence: if focused { base + 0.2 } else { base },
                habit_ids: Vec::new(),
                proposed_habits: vec![name.to_string()],
            }
        })
        .collect()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
