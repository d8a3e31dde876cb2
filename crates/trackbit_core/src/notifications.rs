use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub routine_id: String,
    pub title: String,
    pub body: String,
    /// Local wall-clock time; the reminder repeats daily.
    pub at: NaiveTime,
}

/// Receives daily routine reminders. Delivery is up to the host application.
pub trait ReminderSink: Send + Sync {
    fn schedule_daily(&self, reminder: ReminderRequest);
    fn clear_for_routine(&self, routine_id: &str);
}
