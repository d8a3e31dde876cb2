use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use trackbit_coach::{CoachClient, CoachConfig, CoachRequest, CoachUser, ReplySource, DEFAULT_TIMEOUT};
use trackbit_core::{
    analytics, calendar,
    goal::GoalThresholds,
    habit::{Habit, HabitFrequency, NewHabit},
    notifications::{ReminderRequest, ReminderSink},
    profile::{Gender, Occupation, UserProfile},
    routine::{NewRoutine, Routine},
    schedule::{parse_date, weekday_name},
    store::RecordStore,
    suggest::{correlated_pairs, HabitCategory, SuggestionInput, CANDIDATE_SIMILARITY},
    GoalService, HabitService, JsonFileStore, ProfileService, RecommendationService,
    RoutineService, SuggestionEngine,
};

const STORE_FILE: &str = "trackbit.json";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) user_id: String,
    pub(crate) coach_endpoint: Option<String>,
    pub(crate) coach_timeout: Duration,
    pub(crate) goal_thresholds: GoalThresholds,
    pub(crate) suggestion_seed: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("TRACKBIT_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(user) = std::env::var("TRACKBIT_USER") {
            if !user.trim().is_empty() {
                config.user_id = user.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("TRACKBIT_COACH_URL") {
            config.coach_endpoint = Some(url).filter(|url| !url.trim().is_empty());
        }
        if let Ok(secs) = std::env::var("TRACKBIT_COACH_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(value) if value > 0 => config.coach_timeout = Duration::from_secs(value),
                _ => warn!(value = %secs, "ignoring invalid TRACKBIT_COACH_TIMEOUT_SECS"),
            }
        }
        if let Ok(raw) = std::env::var("TRACKBIT_GOAL_EFFECTIVE") {
            if let Some(value) = parse_ratio(&raw) {
                config.goal_thresholds.effective = value;
            }
        }
        if let Ok(raw) = std::env::var("TRACKBIT_GOAL_MODERATE") {
            if let Some(value) = parse_ratio(&raw) {
                config.goal_thresholds.moderate = value;
            }
        }
        if config.goal_thresholds.moderate > config.goal_thresholds.effective {
            warn!(
                moderate = config.goal_thresholds.moderate,
                effective = config.goal_thresholds.effective,
                "moderate goal threshold exceeds effective, using defaults"
            );
            config.goal_thresholds = GoalThresholds::default();
        }
        if let Ok(seed) = std::env::var("TRACKBIT_SUGGESTION_SEED") {
            config.suggestion_seed = seed.trim().parse::<u64>().ok();
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_suggestion_seed(mut self, seed: u64) -> Self {
        self.suggestion_seed = Some(seed);
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }
}

fn parse_ratio(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if (0.0..=1.0).contains(&value) => Some(value),
        _ => {
            warn!(value = raw, "ignoring goal threshold outside 0..=1");
            None
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".trackbit"),
            user_id: trackbit_core::service::DEFAULT_USER.to_string(),
            coach_endpoint: None,
            coach_timeout: DEFAULT_TIMEOUT,
            goal_thresholds: GoalThresholds::default(),
            suggestion_seed: None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "trackbit")]
#[command(about = "Habit tracking with streaks, routines, goals and suggestions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Reference date (YYYY-MM-DD) used instead of today
    #[arg(long, global = true)]
    pub today: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Habit management
    Habit {
        #[command(subcommand)]
        command: HabitCommands,
    },
    /// Toggle a habit's completion for a date
    Toggle {
        habit: String,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Record a measured value for a date
    Value {
        habit: String,
        value: f64,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Attach a note to a day's log
    Note {
        habit: String,
        text: String,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show the last week, or one habit's report
    Stats { habit: Option<String> },
    /// Month calendar of daily completion (YYYY-MM)
    Calendar { month: Option<String> },
    /// Routine management
    Routine {
        #[command(subcommand)]
        command: RoutineCommands,
    },
    /// Goal tracking
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Pattern-based suggestions
    Suggest {
        #[arg(short, long, default_value_t = trackbit_core::suggest::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Profile and profile-based recommendations
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Ask the coach
    Coach {
        message: String,
        #[arg(long, default_value = "")]
        goal: String,
        #[arg(long, default_value = "")]
        time_per_day: String,
    },
    /// Write routines as an ICS calendar
    ExportIcs {
        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// First day of the recurring events
        #[arg(long)]
        start: Option<String>,
        /// Export the fixed morning and evening blocks instead of saved routines
        #[arg(long)]
        defaults: bool,
    },
}

#[derive(Args, Debug)]
pub struct HabitArgs {
    pub name: String,
    #[arg(long)]
    pub description: Option<String>,
    /// daily, weekly or custom
    #[arg(short, long, default_value = "daily")]
    pub frequency: String,
    /// Comma separated weekday numbers, Sunday = 0
    #[arg(long, value_delimiter = ',')]
    pub days: Vec<u8>,
    #[arg(long)]
    pub target: Option<f64>,
    #[arg(long)]
    pub unit: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum HabitCommands {
    /// Create a habit
    Add(HabitArgs),
    /// List habits
    List {
        /// Include archived habits
        #[arg(long)]
        all: bool,
        /// Print the habits as JSON
        #[arg(long)]
        json: bool,
    },
    Archive { habit: String },
    Restore { habit: String },
    Delete { habit: String },
}

#[derive(Subcommand, Debug)]
pub enum RoutineCommands {
    /// Create a routine from existing habits
    Add {
        name: String,
        /// Comma separated habit names or ids
        #[arg(long, value_delimiter = ',')]
        habits: Vec<String>,
        /// Daily reminder time, HH:MM
        #[arg(long)]
        reminder: Option<String>,
    },
    List,
    /// Live progress for a date
    Progress {
        routine: String,
        #[arg(short, long)]
        date: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GoalCommands {
    Add {
        habit: String,
        days: u32,
        #[arg(long)]
        notes: Option<String>,
    },
    List { habit: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Save the survey answers
    Set {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        occupation: Option<String>,
        #[arg(long)]
        height_cm: Option<f64>,
        #[arg(long)]
        weight_kg: Option<f64>,
        /// Comma separated categories
        #[arg(long, value_delimiter = ',')]
        focus: Vec<String>,
    },
    Show,
    /// Regenerate recommendations from the profile
    Recommend,
    Apply { id: String },
    Dismiss { id: String },
}

/// Logs reminders instead of raising OS notifications.
struct LogReminderSink;

impl ReminderSink for LogReminderSink {
    fn schedule_daily(&self, reminder: ReminderRequest) {
        info!(routine_id = %reminder.routine_id, at = %reminder.at, title = %reminder.title, "daily reminder scheduled");
    }

    fn clear_for_routine(&self, routine_id: &str) {
        debug!(routine_id, "reminder cleared");
    }
}

struct Trackbit {
    config: AppConfig,
    habits: Arc<HabitService>,
    routines: RoutineService,
    goals: GoalService,
    profiles: ProfileService,
    recommendations: RecommendationService,
}

impl Trackbit {
    fn open(config: AppConfig) -> Result<Self> {
        let path = config.store_path();
        let store: Arc<dyn RecordStore> = Arc::new(
            JsonFileStore::open(&path)
                .with_context(|| format!("opening store at {}", path.display()))?,
        );
        let habits = Arc::new(
            HabitService::builder()
                .with_store(store)
                .for_user(config.user_id.clone())
                .build()
                .context("loading habits")?,
        );
        let routines = RoutineService::builder(habits.clone())
            .with_reminder_sink(Box::new(LogReminderSink))
            .build()
            .context("loading routines")?;
        let goals = GoalService::new(habits.clone(), config.goal_thresholds)?;
        let profiles = ProfileService::new(habits.clone())?;
        let recommendations = RecommendationService::new(habits.clone())?;
        info!(path = %path.display(), user = %config.user_id, "trackbit opened");
        Ok(Self {
            config,
            habits,
            routines,
            goals,
            profiles,
            recommendations,
        })
    }

    fn habit(&self, query: &str) -> Result<Habit> {
        self.habits
            .find_habit(query)
            .with_context(|| format!("no habit matches `{query}`"))
    }

    fn routine(&self, query: &str) -> Result<Routine> {
        self.routines
            .find_routine(query)
            .with_context(|| format!("no routine matches `{query}`"))
    }
}

fn resolve_date(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match raw {
        Some(raw) => Ok(parse_date(raw)?),
        None => Ok(today),
    }
}

pub fn run(config: AppConfig, cli: Cli, out: &mut impl Write) -> Result<()> {
    let today = match cli.today.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => Local::now().date_naive(),
    };
    let app = Trackbit::open(config)?;
    match cli.command {
        Commands::Habit { command } => habit_command(&app, command, out),
        Commands::Toggle { habit, date } => {
            let habit = app.habit(&habit)?;
            let date = resolve_date(date.as_deref(), today)?;
            let log = app
                .habits
                .toggle_completion(&habit.id, date)?
                .context("habit disappeared")?;
            app.routines.refresh_for_habit(&habit.id, date)?;
            let mark = if log.completed { "done" } else { "not done" };
            writeln!(out, "{} on {date}: {mark}", habit.name)?;
            if let Some(streak) = app.habits.streak(&habit.id) {
                writeln!(out, "streak {} (best {})", streak.current, streak.longest)?;
            }
            Ok(())
        }
        Commands::Value { habit, value, date } => {
            let habit = app.habit(&habit)?;
            let date = resolve_date(date.as_deref(), today)?;
            let log = app
                .habits
                .update_value(&habit.id, date, value)?
                .context("habit disappeared")?;
            app.routines.refresh_for_habit(&habit.id, date)?;
            let unit = habit.unit.as_deref().unwrap_or("");
            match habit.target_value {
                Some(target) => writeln!(out, "{} on {date}: {value}/{target} {unit}", habit.name)?,
                None => writeln!(out, "{} on {date}: {value} {unit}", habit.name)?,
            }
            debug!(completed = log.completed, "value recorded");
            Ok(())
        }
        Commands::Note { habit, text, date } => {
            let habit = app.habit(&habit)?;
            let date = resolve_date(date.as_deref(), today)?;
            app.habits.set_notes(&habit.id, date, &text)?;
            writeln!(out, "note saved for {} on {date}", habit.name)?;
            Ok(())
        }
        Commands::Stats { habit } => stats_command(&app, habit.as_deref(), today, out),
        Commands::Calendar { month } => {
            let (year, month) = match month.as_deref() {
                Some(raw) => parse_month(raw)?,
                None => (today.year(), today.month()),
            };
            for day in analytics::month_calendar(&app.habits, year, month)? {
                writeln!(
                    out,
                    "{} {:>3.0}% ({}/{})",
                    day.date, day.percentage, day.completed, day.due
                )?;
            }
            Ok(())
        }
        Commands::Routine { command } => routine_command(&app, command, today, out),
        Commands::Goal { command } => goal_command(&app, command, today, out),
        Commands::Suggest { limit } => {
            let habits = app.habits.habits();
            let logs = app.habits.all_logs();
            let routines = app.routines.routines();
            let profile = app.profiles.profile();
            let input =
                SuggestionInput::new(&habits, &logs, &routines).with_profile(profile.as_ref());
            let suggestions = match app.config.suggestion_seed {
                Some(seed) => SuggestionEngine::seeded(seed).with_limit(limit).generate(input),
                None => SuggestionEngine::from_os_rng().with_limit(limit).generate(input),
            };
            if suggestions.is_empty() {
                writeln!(out, "no suggestions yet; add a few habits first")?;
            }
            for suggestion in suggestions {
                writeln!(
                    out,
                    "[{}] {} ({:.0}%)\n    {}",
                    suggestion.kind.as_str(),
                    suggestion.title,
                    suggestion.confidence * 100.0,
                    suggestion.reasoning
                )?;
            }
            Ok(())
        }
        Commands::Profile { command } => profile_command(&app, command, out),
        Commands::Coach {
            message,
            goal,
            time_per_day,
        } => {
            let request = CoachRequest {
                user: CoachUser {
                    goal,
                    current_habits: app
                        .habits
                        .active_habits()
                        .into_iter()
                        .map(|habit| habit.name)
                        .collect(),
                    struggles: message.clone(),
                    time_per_day,
                    follow_up_message: Some(message),
                    conversation_history: None,
                },
            };
            let client = CoachClient::new(CoachConfig {
                endpoint: app.config.coach_endpoint.clone(),
                timeout: app.config.coach_timeout,
            });
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            let reply = runtime.block_on(client.ask(&request));
            if reply.source == ReplySource::Fallback {
                debug!("coach answered offline");
            }
            writeln!(out, "{}", reply.text)?;
            Ok(())
        }
        Commands::ExportIcs {
            out: target,
            start,
            defaults,
        } => {
            let start = resolve_date(start.as_deref(), today)?;
            let ics = if defaults {
                calendar::export_default_routines_ics(start, Utc::now())
            } else {
                calendar::export_routines_ics(&app.routines.routines(), start, Utc::now())
            };
            match target {
                Some(path) => {
                    fs::write(&path, ics)
                        .with_context(|| format!("writing {}", path.display()))?;
                    writeln!(out, "wrote {}", path.display())?;
                }
                None => write!(out, "{ics}")?,
            }
            Ok(())
        }
    }
}

fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let (year, month) = raw
        .trim()
        .split_once('-')
        .with_context(|| format!("`{raw}` is not YYYY-MM"))?;
    let year: i32 = year.parse().with_context(|| format!("bad year in `{raw}`"))?;
    let month: u32 = month.parse().with_context(|| format!("bad month in `{raw}`"))?;
    Ok((year, month))
}

fn habit_command(app: &Trackbit, command: HabitCommands, out: &mut impl Write) -> Result<()> {
    match command {
        HabitCommands::Add(args) => {
            let frequency = HabitFrequency::parse(&args.frequency)
                .with_context(|| format!("unknown frequency `{}`", args.frequency))?;
            let mut form = NewHabit::daily(args.name);
            form.frequency = frequency;
            if frequency != HabitFrequency::Daily {
                form.target_days = args.days.into_iter().collect();
            }
            form.description = args.description;
            if let Some(target) = args.target {
                form = form.with_target(target, args.unit.unwrap_or_default());
            }
            let habit = app.habits.add_habit(form)?;
            writeln!(out, "added {} ({})", habit.name, short_id(&habit.id))?;
        }
        HabitCommands::List { all, json } => {
            let habits = if all {
                app.habits.habits()
            } else {
                app.habits.active_habits()
            };
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&habits)?)?;
                return Ok(());
            }
            for habit in habits {
                let days: Vec<&str> = habit.target_days.iter().map(|d| weekday_name(*d)).collect();
                let streak = app.habits.streak(&habit.id).map(|s| s.current).unwrap_or(0);
                let archived = if habit.is_archived() { " [archived]" } else { "" };
                writeln!(
                    out,
                    "{}  {}{}  {}  streak {}",
                    short_id(&habit.id),
                    habit.name,
                    archived,
                    if days.len() == 7 {
                        "every day".to_string()
                    } else {
                        days.join(", ")
                    },
                    streak
                )?;
            }
        }
        HabitCommands::Archive { habit } => {
            let habit = app.habit(&habit)?;
            app.habits.archive_habit(&habit.id)?;
            writeln!(out, "archived {}", habit.name)?;
        }
        HabitCommands::Restore { habit } => {
            let habit = app.habit(&habit)?;
            app.habits.restore_habit(&habit.id)?;
            writeln!(out, "restored {}", habit.name)?;
        }
        HabitCommands::Delete { habit } => {
            let habit = app.habit(&habit)?;
            app.habits.delete_habit(&habit.id)?;
            writeln!(out, "deleted {}", habit.name)?;
        }
    }
    Ok(())
}

fn stats_command(
    app: &Trackbit,
    habit: Option<&str>,
    today: NaiveDate,
    out: &mut impl Write,
) -> Result<()> {
    let Some(query) = habit else {
        for day in analytics::week_overview(&app.habits, today) {
            writeln!(
                out,
                "{} {:<9} {:>3.0}% ({}/{})",
                day.date,
                weekday_name(trackbit_core::schedule::weekday_index(day.date)),
                day.percentage,
                day.completed,
                day.due
            )?;
        }
        let habits = app.habits.active_habits();
        let logs = app.habits.all_logs();
        for pair in correlated_pairs(&habits, &logs, CANDIDATE_SIMILARITY) {
            writeln!(
                out,
                "{} + {}: {:.0}% together",
                pair.first_name,
                pair.second_name,
                pair.similarity * 100.0
            )?;
        }
        return Ok(());
    };
    let habit = app.habit(query)?;
    let report = analytics::habit_report(&app.habits, &habit.id, today)
        .with_context(|| format!("no report for `{query}`"))?;
    writeln!(out, "{}", report.name)?;
    writeln!(
        out,
        "streak {} (best {}), {} completions",
        report.current_streak, report.longest_streak, report.total_completions
    )?;
    writeln!(
        out,
        "last 7 days {:.0}%, last 30 days {:.0}%",
        report.last_7_days, report.last_30_days
    )?;
    if !report.best_days.is_empty() {
        writeln!(out, "best days: {}", report.best_days.join(", "))?;
    }
    if habit.is_quantified() {
        writeln!(
            out,
            "total {} {}",
            report.total_value,
            habit.unit.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

fn routine_command(
    app: &Trackbit,
    command: RoutineCommands,
    today: NaiveDate,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        RoutineCommands::Add {
            name,
            habits,
            reminder,
        } => {
            let ids = habits
                .iter()
                .map(|query| app.habit(query).map(|habit| habit.id))
                .collect::<Result<Vec<String>>>()?;
            let mut form = NewRoutine::new(name, ids);
            form.reminder_time = reminder;
            let routine = app.routines.create_routine(form)?;
            writeln!(
                out,
                "added routine {} with {} habits",
                routine.name,
                routine.habit_ids.len()
            )?;
        }
        RoutineCommands::List => {
            for routine in app.routines.active_routines() {
                let progress = app.routines.progress_of(&routine, today);
                let streak = app.routines.routine_streak(&routine.id);
                writeln!(
                    out,
                    "{}  {}  {}/{} today  streak {}{}",
                    short_id(&routine.id),
                    routine.name,
                    progress.completed,
                    progress.total,
                    streak.current,
                    routine
                        .reminder_time
                        .as_deref()
                        .map(|at| format!("  at {at}"))
                        .unwrap_or_default()
                )?;
            }
        }
        RoutineCommands::Progress { routine, date } => {
            let routine = app.routine(&routine)?;
            let date = resolve_date(date.as_deref(), today)?;
            let progress = app.routines.progress_of(&routine, date);
            writeln!(
                out,
                "{} on {date}: {}/{} ({:.0}%)",
                routine.name, progress.completed, progress.total, progress.percentage
            )?;
            writeln!(
                out,
                "30 day completion {:.0}%",
                app.routines.completion_rate(&routine.id, 30, today)
            )?;
        }
    }
    Ok(())
}

fn goal_command(
    app: &Trackbit,
    command: GoalCommands,
    today: NaiveDate,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        GoalCommands::Add { habit, days, notes } => {
            let habit = app.habit(&habit)?;
            let goal = app.goals.create_goal(&habit.id, days, notes, today)?;
            writeln!(
                out,
                "goal for {}: {} to {}",
                habit.name, goal.start_date, goal.end_date
            )?;
        }
        GoalCommands::List { habit } => {
            let goals = match habit.as_deref() {
                Some(query) => app.goals.goals_for(&app.habit(query)?.id),
                None => app.goals.goals(),
            };
            for goal in goals {
                let name = app
                    .habits
                    .habit(&goal.habit_id)
                    .map(|habit| habit.name)
                    .unwrap_or_else(|| "(deleted habit)".to_string());
                let assessment = app.goals.assess(&goal, today);
                writeln!(
                    out,
                    "{}  {}  {}/{} days ({:.0}%)  {}  {} days left",
                    short_id(&goal.id),
                    name,
                    assessment.completed_days,
                    assessment.total_days,
                    assessment.rate * 100.0,
                    assessment.effectiveness,
                    assessment.days_remaining
                )?;
            }
        }
    }
    Ok(())
}

fn profile_command(app: &Trackbit, command: ProfileCommands, out: &mut impl Write) -> Result<()> {
    match command {
        ProfileCommands::Set {
            name,
            age,
            gender,
            occupation,
            height_cm,
            weight_kg,
            focus,
        } => {
            let mut profile = app.profiles.profile().unwrap_or_else(|| UserProfile::new(""));
            profile.display_name = name;
            profile.age = age;
            profile.gender = match gender.as_deref() {
                Some(raw) => Some(Gender::parse(raw).with_context(|| format!("unknown gender `{raw}`"))?),
                None => None,
            };
            profile.occupation = match occupation.as_deref() {
                Some(raw) => Some(
                    Occupation::parse(raw)
                        .with_context(|| format!("unknown occupation `{raw}`"))?,
                ),
                None => None,
            };
            profile.height_cm = height_cm;
            profile.weight_kg = weight_kg;
            profile.lifestyle_focus = focus
                .iter()
                .map(|raw| {
                    HabitCategory::parse(raw).with_context(|| format!("unknown category `{raw}`"))
                })
                .collect::<Result<BTreeSet<HabitCategory>>>()?;
            app.profiles.save_profile(profile)?;
            let profile = app
                .profiles
                .complete_survey()?
                .context("profile vanished after save")?;
            writeln!(out, "profile saved for {}", profile.display_name)?;
        }
        ProfileCommands::Show => match app.profiles.profile() {
            Some(profile) => {
                writeln!(out, "{}", profile.display_name)?;
                if let Some(bmi) = profile.bmi() {
                    writeln!(out, "bmi {bmi:.1}")?;
                }
                let focus: Vec<&str> = profile.lifestyle_focus.iter().map(|c| c.as_str()).collect();
                writeln!(out, "focus: {}", focus.join(", "))?;
            }
            None => writeln!(out, "no profile yet; run `trackbit profile set`")?,
        },
        ProfileCommands::Recommend => {
            let profile = app
                .profiles
                .profile()
                .context("no profile yet; run `trackbit profile set` first")?;
            app.recommendations.refresh(&profile)?;
            for rec in app.recommendations.pending() {
                writeln!(
                    out,
                    "{}  {} ({:.0}%)  {}",
                    short_id(&rec.id),
                    rec.title,
                    rec.confidence * 100.0,
                    rec.reasoning
                )?;
            }
        }
        ProfileCommands::Apply { id } => {
            let rec = find_recommendation(app, &id)?;
            match app.recommendations.apply(&rec)? {
                Some(habit) => writeln!(out, "added {}", habit.name)?,
                None => bail!("recommendation `{id}` is not pending"),
            }
        }
        ProfileCommands::Dismiss { id } => {
            let rec = find_recommendation(app, &id)?;
            if !app.recommendations.dismiss(&rec)? {
                bail!("recommendation `{id}` is not pending");
            }
            writeln!(out, "dismissed")?;
        }
    }
    Ok(())
}

fn find_recommendation(app: &Trackbit, prefix: &str) -> Result<String> {
    let prefix = prefix.trim();
    let matches: Vec<String> = app
        .recommendations
        .all()
        .into_iter()
        .filter(|rec| rec.id.starts_with(prefix))
        .map(|rec| rec.id)
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => bail!("no recommendation matches `{prefix}`"),
        _ => bail!("`{prefix}` matches several recommendations"),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
