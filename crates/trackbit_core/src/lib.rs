pub mod analytics;
pub mod calendar;
pub mod error;
pub mod goal;
pub mod habit;
pub mod notifications;
pub mod profile;
pub mod routine;
pub mod schedule;
pub mod service;
pub mod store;
pub mod streak;
pub mod suggest;

pub use crate::error::{Result, TrackbitError};
pub use crate::goal::{GoalService, GoalThresholds};
pub use crate::profile::{ProfileService, RecommendationService};
pub use crate::routine::{RoutineService, RoutineServiceBuilder};
pub use crate::service::{HabitService, HabitServiceBuilder};
pub use crate::store::{JsonFileStore, MemoryStore, RecordStore};
pub use crate::suggest::SuggestionEngine;
