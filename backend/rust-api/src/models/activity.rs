use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed practice session as reported by the quiz-result source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub question_count: u32,
    pub correct_count: u32,
    pub time_spent_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

impl ActivityRecord {
    /// Whole minutes, rounded down per session.
    pub fn time_spent_minutes(&self) -> u64 {
        self.time_spent_seconds / 60
    }
}

/// Lifetime totals owned by the user profile store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeCounters {
    pub quizzes_completed: u64,
    pub questions_answered: u64,
    pub time_spent_minutes: u64,
}
