use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::calendar::{parse_day_key, WEEKDAY_NAMES};

/// Rolling detail window, in civil days (today included).
pub const PRACTICE_DAYS_RETAINED: i64 = 7;
/// Number of week summaries kept in `weekly_stats`.
pub const WEEKLY_STATS_CAP: usize = 52;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub user_id: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_practice_date: Option<NaiveDate>,
    #[serde(default)]
    pub practice_days: BTreeMap<String, DaySummary>,
    pub total_days_practiced: u32,
    pub total_quizzes_completed: u64,
    pub total_questions_answered: u64,
    pub total_time_spent_minutes: u64,
    #[serde(default)]
    pub weekly_stats: Vec<WeekSummary>,
    #[serde(default)]
    pub day_of_week_pattern: BTreeMap<String, WeekdayStat>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub quiz_count: u32,
    pub question_count: u32,
    #[serde(default)]
    pub correct_count: u32,
    pub accuracy: Option<f64>,
    pub time_spent_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSummary {
    pub week_end: NaiveDate,
    pub days_practiced: u32,
    pub total_quizzes: u32,
    pub total_questions: u32,
    pub total_correct: u32,
    pub avg_accuracy: Option<f64>,
    pub total_time_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekdayStat {
    pub practiced: bool,
    pub avg_accuracy: Option<f64>,
}

impl StreakRecord {
    /// Zero-value record for a user who has never practiced.
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            current_streak: 0,
            longest_streak: 0,
            last_practice_date: None,
            practice_days: BTreeMap::new(),
            total_days_practiced: 0,
            total_quizzes_completed: 0,
            total_questions_answered: 0,
            total_time_spent_minutes: 0,
            weekly_stats: Vec::new(),
            day_of_week_pattern: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Checks the structural invariants of a persisted record. Returns a
    /// description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.current_streak > self.longest_streak {
            return Err(format!(
                "current_streak {} exceeds longest_streak {}",
                self.current_streak, self.longest_streak
            ));
        }

        let mut newest: Option<NaiveDate> = None;
        let mut oldest: Option<NaiveDate> = None;
        for key in self.practice_days.keys() {
            let date = parse_day_key(key)
                .ok_or_else(|| format!("malformed practice day key '{}'", key))?;
            newest = Some(newest.map_or(date, |d| d.max(date)));
            oldest = Some(oldest.map_or(date, |d| d.min(date)));
        }
        if let (Some(newest), Some(oldest)) = (newest, oldest) {
            if (newest - oldest).num_days() >= PRACTICE_DAYS_RETAINED {
                return Err(format!(
                    "practice_days spans {} to {}, wider than the retention window",
                    oldest, newest
                ));
            }
        }

        if self.weekly_stats.len() > WEEKLY_STATS_CAP {
            return Err(format!(
                "weekly_stats holds {} entries, cap is {}",
                self.weekly_stats.len(),
                WEEKLY_STATS_CAP
            ));
        }
        if self
            .weekly_stats
            .windows(2)
            .any(|pair| pair[0].week_end >= pair[1].week_end)
        {
            return Err("weekly_stats is not strictly ordered by week_end".to_string());
        }

        if let Some(name) = self
            .day_of_week_pattern
            .keys()
            .find(|name| !WEEKDAY_NAMES.contains(&name.as_str()))
        {
            return Err(format!("unknown weekday '{}' in day_of_week_pattern", name));
        }

        Ok(())
    }
}
