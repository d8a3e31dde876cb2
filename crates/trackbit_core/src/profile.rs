use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TrackbitError};
use crate::habit::{Habit, NewHabit};
use crate::service::HabitService;
use crate::store::{Record, RecordKind, Records};
use crate::suggest::HabitCategory;

/// Each user owns at most one profile.
pub const PROFILE_ID: &str = "profile";
pub const MAX_RECOMMENDATIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    NonBinary,
    PreferNotToSay,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "female" | "f" => Some(Self::Female),
            "male" | "m" => Some(Self::Male),
            "non_binary" | "nonbinary" => Some(Self::NonBinary),
            "prefer_not_to_say" | "none" => Some(Self::PreferNotToSay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupation {
    Student,
    Office,
    Remote,
    Healthcare,
    Manual,
    Retired,
    Other,
}

impl Occupation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "office" => Some(Self::Office),
            "remote" => Some(Self::Remote),
            "healthcare" => Some(Self::Healthcare),
            "manual" => Some(Self::Manual),
            "retired" => Some(Self::Retired),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub occupation: Option<Occupation>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub lifestyle_focus: BTreeSet<HabitCategory>,
    pub survey_completed: bool,
    pub survey_completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            age: None,
            gender: None,
            occupation: None,
            height_cm: None,
            weight_kg: None,
            lifestyle_focus: BTreeSet::new(),
            survey_completed: false,
            survey_completed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn bmi(&self) -> Option<f64> {
        let height_m = self.height_cm? / 100.0;
        let weight = self.weight_kg?;
        (height_m > 0.0).then(|| weight / (height_m * height_m))
    }

    fn validated(mut self) -> Result<Self> {
        let name = self.display_name.trim().to_string();
        if name.is_empty() {
            return Err(TrackbitError::validation("display name is required"));
        }
        self.display_name = name;
        if let Some(age) = self.age {
            if !(1..=120).contains(&age) {
                return Err(TrackbitError::validation(format!("age {age} is out of range")));
            }
        }
        for (label, value) in [("height", self.height_cm), ("weight", self.weight_kg)] {
            if let Some(value) = value {
                if !value.is_finite() || value <= 0.0 {
                    return Err(TrackbitError::validation(format!("{label} must be positive")));
                }
            }
        }
        Ok(self)
    }
}

impl Record for UserProfile {
    const KIND: RecordKind = RecordKind::Profiles;

    fn record_id(&self) -> String {
        PROFILE_ID.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Applied,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitRecommendation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: HabitCategory,
    pub confidence: f64,
    pub reasoning: String,
    pub status: RecommendationStatus,
    /// Set once applied.
    pub habit_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for HabitRecommendation {
    const KIND: RecordKind = RecordKind::HabitRecommendations;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

struct Candidate {
    title: &'static str,
    description: &'static str,
    category: HabitCategory,
    confidence: f64,
    reasoning: String,
}

fn candidate(
    title: &'static str,
    description: &'static str,
    category: HabitCategory,
    confidence: f64,
    reasoning: String,
) -> Candidate {
    Candidate {
        title,
        description,
        category,
        confidence,
        reasoning,
    }
}

fn focus_candidates(category: HabitCategory) -> [Candidate; 2] {
    let why = format!("You chose {category} as a focus");
    match category {
        HabitCategory::Health => [
            candidate(
                "Drink 8 glasses of water",
                "Spread them through the day.",
                category,
                0.85,
                why.clone(),
            ),
            candidate(
                "Eat a vegetable with every meal",
                "Start with lunch.",
                category,
                0.7,
                why,
            ),
        ],
        HabitCategory::Mindfulness => [
            candidate(
                "Meditate 10 minutes",
                "Same time, same place.",
                category,
                0.85,
                why.clone(),
            ),
            candidate(
                "Write three gratitudes",
                "Before bed works well.",
                category,
                0.7,
                why,
            ),
        ],
        HabitCategory::Productivity => [
            candidate(
                "Plan tomorrow tonight",
                "Pick the top three tasks.",
                category,
                0.85,
                why.clone(),
            ),
            candidate(
                "One hour of deep work",
                "Notifications off.",
                category,
                0.75,
                why,
            ),
        ],
        HabitCategory::Learning => [
            candidate(
                "Read 20 pages",
                "Any book counts.",
                category,
                0.85,
                why.clone(),
            ),
            candidate(
                "Practice a language for 15 minutes",
                "Little and often.",
                category,
                0.7,
                why,
            ),
        ],
        HabitCategory::Fitness => [
            candidate(
                "30 minute workout",
                "Any movement that raises your heart rate.",
                category,
                0.85,
                why.clone(),
            ),
            candidate(
                "Walk 8000 steps",
                "Take calls on foot.",
                category,
                0.75,
                why,
            ),
        ],
    }
}

fn rule_candidates(profile: &UserProfile) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    for category in &profile.lifestyle_focus {
        out.extend(focus_candidates(*category));
    }

    if let Some(age) = profile.age {
        let why = format!("Suggested for your age ({age})");
        match age {
            0..=24 => out.push(candidate(
                "Keep a consistent sleep schedule",
                "Same bedtime within 30 minutes.",
                HabitCategory::Health,
                0.65,
                why,
            )),
            25..=44 => out.push(candidate(
                "Take a movement break every hour",
                "Stand up and walk for two minutes.",
                HabitCategory::Fitness,
                0.6,
                why,
            )),
            _ => out.push(candidate(
                "Stretch for 10 minutes",
                "Focus on hips and back.",
                HabitCategory::Fitness,
                0.7,
                why,
            )),
        }
    }

    match profile.gender {
        Some(Gender::Female) => out.push(candidate(
            "Strength training twice a week",
            "Bodyweight is enough to start.",
            HabitCategory::Fitness,
            0.55,
            "Often recommended in your profile group".to_string(),
        )),
        Some(Gender::Male) => out.push(candidate(
            "Check in with a friend",
            "A message or a call.",
            HabitCategory::Mindfulness,
            0.55,
            "Often recommended in your profile group".to_string(),
        )),
        Some(Gender::NonBinary) | Some(Gender::PreferNotToSay) | None => {}
    }

    if let Some(occupation) = profile.occupation {
        let why = |label: &str| format!("Works well for {label} schedules");
        match occupation {
            Occupation::Student => out.push(candidate(
                "Review today's notes",
                "Ten minutes after class.",
                HabitCategory::Learning,
                0.75,
                why("student"),
            )),
            Occupation::Office => out.push(candidate(
                "Stand up every hour",
                "Set a recurring timer.",
                HabitCategory::Fitness,
                0.75,
                why("office"),
            )),
            Occupation::Remote => out.push(candidate(
                "Start the day with a walk outside",
                "Your commute replacement.",
                HabitCategory::Fitness,
                0.7,
                why("remote"),
            )),
            Occupation::Healthcare => out.push(candidate(
                "Wind-down routine after shifts",
                "Five quiet minutes before anything else.",
                HabitCategory::Mindfulness,
                0.7,
                why("healthcare"),
            )),
            Occupation::Manual => out.push(candidate(
                "Stretch after work",
                "Loosen what you used all day.",
                HabitCategory::Fitness,
                0.7,
                why("physical"),
            )),
            Occupation::Retired => out.push(candidate(
                "Learn something new every week",
                "A class, a recipe, a skill.",
                HabitCategory::Learning,
                0.65,
                why("retired"),
            )),
            Occupation::Other => {}
        }
    }

    if let Some(bmi) = profile.bmi() {
        if bmi >= 25.0 {
            out.push(candidate(
                "Take a 20 minute walk after dinner",
                "Gentle and easy to keep.",
                HabitCategory::Fitness,
                0.8,
                format!("Your BMI is {bmi:.1}"),
            ));
        } else if bmi < 18.5 {
            out.push(candidate(
                "Add a protein-rich snack",
                "Nuts, yogurt or eggs.",
                HabitCategory::Health,
                0.7,
                format!("Your BMI is {bmi:.1}"),
            ));
        }
    }

    if out.is_empty() {
        let why = "A simple start while we learn more about you".to_string();
        out.push(candidate(
            "Drink a glass of water after waking",
            "Keep a glass by the bed.",
            HabitCategory::Health,
            0.5,
            why.clone(),
        ));
        out.push(candidate(
            "Make your bed",
            "The first win of the day.",
            HabitCategory::Productivity,
            0.5,
            why,
        ));
    }
    out
}

/// Deterministic rule-table recommendations for a profile, minus habits the user already
/// has. De-duplicated by title, best first, at most [`MAX_RECOMMENDATIONS`].
pub fn generate_recommendations(
    profile: &UserProfile,
    existing: &[Habit],
    now: DateTime<Utc>,
) -> Vec<HabitRecommendation> {
    let taken: BTreeSet<String> = existing.iter().map(|h| h.name.to_lowercase()).collect();
    let mut best: BTreeMap<&'static str, Candidate> = BTreeMap::new();
    for found in rule_candidates(profile) {
        if taken.contains(&found.title.to_lowercase()) {
            continue;
        }
        let outranked = best
            .get(found.title)
            .is_some_and(|kept| kept.confidence >= found.confidence);
        if !outranked {
            best.insert(found.title, found);
        }
    }
    let mut ranked: Vec<Candidate> = best.into_values().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then(a.title.cmp(b.title)));
    ranked.truncate(MAX_RECOMMENDATIONS);
    ranked
        .into_iter()
        .map(|found| HabitRecommendation {
            id: uuid::Uuid::new_v4().to_string(),
            title: found.title.to_string(),
            description: found.description.to_string(),
            category: found.category,
            confidence: found.confidence,
            reasoning: found.reasoning,
            status: RecommendationStatus::Pending,
            habit_id: None,
            created_at: now,
        })
        .collect()
}

pub struct ProfileService {
    habits: Arc<HabitService>,
    profile: RwLock<Option<UserProfile>>,
}

impl ProfileService {
    pub fn new(habits: Arc<HabitService>) -> Result<Self> {
        let profile = Records::new(habits.store().as_ref(), habits.user_id())
            .load::<UserProfile>(PROFILE_ID)?;
        Ok(Self {
            habits,
            profile: RwLock::new(profile),
        })
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().clone()
    }

    #[instrument(skip(self, profile), fields(name = %profile.display_name))]
    pub fn save_profile(&self, profile: UserProfile) -> Result<UserProfile> {
        let mut profile = profile.validated()?;
        profile.updated_at = Utc::now();
        let store = self.habits.store();
        Records::new(store.as_ref(), self.habits.user_id()).save(&profile)?;
        *self.profile.write() = Some(profile.clone());
        Ok(profile)
    }

    /// Marks the onboarding survey as done. `None` when no profile exists yet.
    pub fn complete_survey(&self) -> Result<Option<UserProfile>> {
        let Some(mut profile) = self.profile() else {
            return Ok(None);
        };
        if !profile.survey_completed {
            profile.survey_completed = true;
            profile.survey_completed_at = Some(Utc::now());
        }
        self.save_profile(profile).map(Some)
    }
}

pub struct RecommendationService {
    habits: Arc<HabitService>,
    recommendations: RwLock<BTreeMap<String, HabitRecommendation>>,
}

impl RecommendationService {
    pub fn new(habits: Arc<HabitService>) -> Result<Self> {
        let loaded: Vec<HabitRecommendation> =
            Records::new(habits.store().as_ref(), habits.user_id()).load_all()?;
        debug!(recommendations = loaded.len(), "hydrated recommendations");
        Ok(Self {
            habits,
            recommendations: RwLock::new(
                loaded.into_iter().map(|rec| (rec.id.clone(), rec)).collect(),
            ),
        })
    }

    fn with_records<T>(&self, f: impl FnOnce(Records<'_>) -> Result<T>) -> Result<T> {
        let store = self.habits.store();
        f(Records::new(store.as_ref(), self.habits.user_id()))
    }

    /// Regenerates pending recommendations. Applied and dismissed ones stay as history and
    /// their titles are not offered again.
    #[instrument(skip(self, profile))]
    pub fn refresh(&self, profile: &UserProfile) -> Result<Vec<HabitRecommendation>> {
        let mut recommendations = self.recommendations.write();
        let settled: BTreeSet<String> = recommendations
            .values()
            .filter(|rec| rec.status != RecommendationStatus::Pending)
            .map(|rec| rec.title.to_lowercase())
            .collect();
        let fresh: Vec<HabitRecommendation> =
            generate_recommendations(profile, &self.habits.habits(), Utc::now())
                .into_iter()
                .filter(|rec| !settled.contains(&rec.title.to_lowercase()))
                .collect();
        let stale: Vec<String> = recommendations
            .values()
            .filter(|rec| rec.status == RecommendationStatus::Pending)
            .map(|rec| rec.id.clone())
            .collect();

        self.with_records(|records| {
            for rec in &fresh {
                records.save(rec)?;
            }
            for id in &stale {
                records.remove::<HabitRecommendation>(id)?;
            }
            Ok(())
        })?;

        for id in &stale {
            recommendations.remove(id);
        }
        for rec in &fresh {
            recommendations.insert(rec.id.clone(), rec.clone());
        }
        info!(fresh = fresh.len(), replaced = stale.len(), "recommendations refreshed");
        Ok(fresh)
    }

    pub fn all(&self) -> Vec<HabitRecommendation> {
        let mut all: Vec<HabitRecommendation> =
            self.recommendations.read().values().cloned().collect();
        all.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.title.cmp(&b.title))
        });
        all
    }

    pub fn pending(&self) -> Vec<HabitRecommendation> {
        self.all()
            .into_iter()
            .filter(|rec| rec.status == RecommendationStatus::Pending)
            .collect()
    }

    /// Turns a pending recommendation into a daily habit. `None` for unknown or settled ids.
    /// If the recommendation cannot be marked applied, the new habit is deleted again.
    #[instrument(skip(self))]
    pub fn apply(&self, recommendation_id: &str) -> Result<Option<Habit>> {
        let mut recommendations = self.recommendations.write();
        let Some(current) = recommendations
            .get(recommendation_id)
            .filter(|rec| rec.status == RecommendationStatus::Pending)
            .cloned()
        else {
            return Ok(None);
        };
        let habit = self.habits.add_habit(
            NewHabit::daily(current.title.clone()).with_description(current.description.clone()),
        )?;
        let applied = HabitRecommendation {
            status: RecommendationStatus::Applied,
            habit_id: Some(habit.id.clone()),
            ..current
        };
        if let Err(err) = self.with_records(|records| records.save(&applied)) {
            if let Err(rollback) = self.habits.delete_habit(&habit.id) {
                warn!(%rollback, habit_id = %habit.id, "could not remove habit after failed apply");
            }
            return Err(err);
        }
        recommendations.insert(applied.id.clone(), applied);
        Ok(Some(habit))
    }

    #[instrument(skip(self))]
    pub fn dismiss(&self, recommendation_id: &str) -> Result<bool> {
        let mut recommendations = self.recommendations.write();
        let Some(current) = recommendations
            .get(recommendation_id)
            .filter(|rec| rec.status == RecommendationStatus::Pending)
            .cloned()
        else {
            return Ok(false);
        };
        let dismissed = HabitRecommendation {
            status: RecommendationStatus::Dismissed,
            ..current
        };
        self.with_records(|records| records.save(&dismissed))?;
        recommendations.insert(dismissed.id.clone(), dismissed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStore};
    use serde_json::Value;

    /// Store that rejects recommendation writes once armed.
    #[derive(Default)]
    struct RecommendationOutage {
        inner: MemoryStore,
        failing: parking_lot::Mutex<bool>,
    }

    impl RecommendationOutage {
        fn set_failing(&self, failing: bool) {
            *self.failing.lock() = failing;
        }
    }

    impl RecordStore for RecommendationOutage {
        fn upsert(&self, user_id: &str, kind: RecordKind, id: &str, record: Value) -> Result<()> {
            if kind == RecordKind::HabitRecommendations && *self.failing.lock() {
                return Err(TrackbitError::storage("backend unreachable"));
            }
            self.inner.upsert(user_id, kind, id, record)
        }

        fn get(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<Option<Value>> {
            self.inner.get(user_id, kind, id)
        }

        fn delete(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<bool> {
            self.inner.delete(user_id, kind, id)
        }

        fn list(&self, user_id: &str, kind: RecordKind) -> Result<Vec<Value>> {
            self.inner.list(user_id, kind)
        }
    }

    fn profile() -> UserProfile {
        let mut profile = UserProfile::new("Sam");
        profile.age = Some(30);
        profile.occupation = Some(Occupation::Office);
        profile.height_cm = Some(180.0);
        profile.weight_kg = Some(90.0);
        profile.lifestyle_focus = [HabitCategory::Fitness, HabitCategory::Learning].into();
        profile
    }

    #[test]
    fn rule_table_is_deterministic_and_capped() {
        let profile = profile();
        let first = generate_recommendations(&profile, &[], Utc::now());
        let second = generate_recommendations(&profile, &[], Utc::now());
        let titles = |recs: &[HabitRecommendation]| {
            recs.iter().map(|r| r.title.clone()).collect::<Vec<_>>()
        };
        assert_eq!(titles(&first), titles(&second));
        assert!(first.len() <= MAX_RECOMMENDATIONS);
        assert!(first.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        let bmi = first
            .iter()
            .find(|r| r.title == "Take a 20 minute walk after dinner")
            .unwrap();
        assert_eq!(bmi.reasoning, "Your BMI is 27.8");
    }

    #[test]
    fn existing_habits_are_not_recommended() {
        let profile = profile();
        let existing = Habit::from_form(NewHabit::daily("read 20 pages").validated().unwrap());
        let recs = generate_recommendations(&profile, &[existing], Utc::now());
        assert!(recs.iter().all(|r| r.title != "Read 20 pages"));
    }

    #[test]
    fn bare_profile_gets_starter_recommendations() {
        let recs = generate_recommendations(&UserProfile::new("New"), &[], Utc::now());
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.status == RecommendationStatus::Pending));
    }

    #[test]
    fn profile_requires_display_name() {
        let habits = Arc::new(HabitService::builder().build().unwrap());
        let service = ProfileService::new(habits).unwrap();
        assert!(matches!(
            service.save_profile(UserProfile::new("   ")),
            Err(TrackbitError::Validation(_))
        ));
        assert!(service.profile().is_none());
        assert!(service.complete_survey().unwrap().is_none());
        service.save_profile(UserProfile::new(" Sam ")).unwrap();
        let done = service.complete_survey().unwrap().unwrap();
        assert_eq!(done.display_name, "Sam");
        assert!(done.survey_completed);
        assert!(done.survey_completed_at.is_some());
    }

    #[test]
    fn apply_creates_habit_and_refresh_keeps_history() {
        let habits = Arc::new(HabitService::builder().build().unwrap());
        let service = RecommendationService::new(habits.clone()).unwrap();
        let profile = profile();
        let fresh = service.refresh(&profile).unwrap();
        let first = fresh[0].clone();
        let second = fresh[1].clone();

        let habit = service.apply(&first.id).unwrap().unwrap();
        assert_eq!(habit.name, first.title);
        assert!(habits.habit(&habit.id).is_some());
        assert!(service.apply(&first.id).unwrap().is_none());
        assert!(service.dismiss(&second.id).unwrap());

        let again = service.refresh(&profile).unwrap();
        assert!(again.iter().all(|r| r.title != first.title && r.title != second.title));
        let kept: Vec<RecommendationStatus> = service
            .all()
            .iter()
            .filter(|r| r.id == first.id || r.id == second.id)
            .map(|r| r.status)
            .collect();
        assert_eq!(kept.len(), 2);
        assert_eq!(service.pending().len(), again.len());
    }

    #[test]
    fn failed_apply_leaves_no_orphan_habit() {
        let store = Arc::new(RecommendationOutage::default());
        let habits = Arc::new(
            HabitService::builder()
                .with_store(store.clone())
                .build()
                .unwrap(),
        );
        let service = RecommendationService::new(habits.clone()).unwrap();
        let first = service.refresh(&profile()).unwrap()[0].clone();

        store.set_failing(true);
        assert!(matches!(
            service.apply(&first.id),
            Err(TrackbitError::Storage(_))
        ));
        assert!(habits.habits().is_empty());
        assert!(store.inner.list(habits.user_id(), RecordKind::Habits).unwrap().is_empty());
        assert!(service.pending().iter().any(|rec| rec.id == first.id));

        store.set_failing(false);
        let habit = service.apply(&first.id).unwrap().unwrap();
        assert_eq!(habits.habits().len(), 1);
        assert_eq!(habits.habit(&habit.id).unwrap().name, first.title);
    }
}
