use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StreakSettings;
use crate::error::{StoreError, StreakError};
use crate::metrics::{record_streak_outcome, STREAK_WRITE_CONFLICTS_TOTAL};
use crate::models::{ActivityRecord, LifetimeCounters, StreakRecord};
use crate::utils::calendar::CivilCalendar;
use crate::utils::retry::{retry_if, RetryConfig};

use super::activity_source::ActivitySource;
use super::profile_store::ProfileStore;
use super::streak_engine::{apply_activity, is_already_credited, DailyActivity};
use super::streak_store::{StreakStore, VersionedStreak};

/// Records practice days and serves the persisted streak state.
pub struct StreakService {
    store: Arc<dyn StreakStore>,
    activity: Arc<dyn ActivitySource>,
    profiles: Arc<dyn ProfileStore>,
    calendar: CivilCalendar,
    retry: RetryConfig,
    recent_activity_limit: u32,
    max_conflict_retries: u32,
}

/// Result of one optimistic attempt.
enum Attempt {
    Done(StreakRecord),
    Conflict,
}

impl StreakService {
    pub fn new(
        store: Arc<dyn StreakStore>,
        activity: Arc<dyn ActivitySource>,
        profiles: Arc<dyn ProfileStore>,
        calendar: CivilCalendar,
    ) -> Self {
        let defaults = StreakSettings::default();
        Self {
            store,
            activity,
            profiles,
            calendar,
            retry: RetryConfig::default(),
            recent_activity_limit: defaults.recent_activity_limit,
            max_conflict_retries: defaults.max_conflict_retries,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: &StreakSettings) -> Self {
        self.recent_activity_limit = settings.recent_activity_limit;
        self.max_conflict_retries = settings.max_conflict_retries;
        self
    }

    /// Connectivity check against the streak store.
    pub async fn ping_store(&self) -> Result<(), StreakError> {
        self.store
            .ping()
            .await
            .map_err(|e| StreakError::StorageUnavailable(e.to_string()))
    }

    /// Persisted streak for `user_id`, or the zero record if the user has
    /// never practiced. Never writes.
    pub async fn get_streak(&self, user_id: &str) -> Result<StreakRecord, StreakError> {
        Ok(match self.load_state(user_id).await? {
            Some(state) => state.record,
            None => StreakRecord::empty(user_id),
        })
    }

    /// Credits the current civil day for `user_id`.
    pub async fn record_activity(&self, user_id: &str) -> Result<StreakRecord, StreakError> {
        self.record_activity_at(user_id, Utc::now()).await
    }

    /// Credits the civil day containing `now`. Calls for the last credited day
    /// or an earlier one return the stored record without touching storage.
    pub async fn record_activity_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StreakRecord, StreakError> {
        let attempts = self.max_conflict_retries.max(1);

        for attempt in 1..=attempts {
            match self.try_record(user_id, now).await {
                Ok(Attempt::Done(record)) => return Ok(record),
                Ok(Attempt::Conflict) => {
                    STREAK_WRITE_CONFLICTS_TOTAL.inc();
                    tracing::warn!(
                        "Concurrent streak update for user={}, re-running (attempt {}/{})",
                        user_id,
                        attempt,
                        attempts
                    );
                }
                Err(e) => {
                    record_streak_outcome("error");
                    tracing::error!("Streak update failed for user={}: {}", user_id, e);
                    return Err(e);
                }
            }
        }

        record_streak_outcome("error");
        Err(StreakError::ConcurrentUpdate {
            user_id: user_id.to_string(),
            attempts,
        })
    }

    async fn try_record(&self, user_id: &str, now: DateTime<Utc>) -> Result<Attempt, StreakError> {
        let state = self.load_state(user_id).await?;
        let (previous, expected_version) = match state {
            Some(VersionedStreak { record, version }) => (record, Some(version)),
            None => (StreakRecord::empty(user_id), None),
        };

        let today = self.calendar.civil_date(now);
        if is_already_credited(previous.last_practice_date, today) {
            record_streak_outcome("noop");
            tracing::debug!(
                "Practice for user={} on {} is covered by last_practice_date={:?}, nothing to do",
                user_id,
                today,
                previous.last_practice_date
            );
            return Ok(Attempt::Done(previous));
        }

        let (start, end) = self.calendar.day_bounds(today);
        let todays_sessions = self.fetch_activity(user_id, start, end).await?;
        let recent_sessions = self.fetch_recent_activity(user_id).await?;
        let lifetime = self.fetch_lifetime_counters(user_id).await?;

        let mut next = apply_activity(
            &previous,
            &DailyActivity {
                today,
                todays_sessions: &todays_sessions,
                recent_sessions: &recent_sessions,
                lifetime,
            },
            &self.calendar,
        );
        next.last_updated = Some(Utc::now());

        match self.save_state(&next, expected_version).await {
            Ok(version) => {
                record_streak_outcome("credited");
                tracing::info!(
                    "Practice recorded: user={}, day={}, current_streak={}, longest_streak={}, sessions={}, version={}",
                    user_id,
                    today,
                    next.current_streak,
                    next.longest_streak,
                    todays_sessions.len(),
                    version
                );
                Ok(Attempt::Done(next))
            }
            Err(StoreError::Conflict) => Ok(Attempt::Conflict),
            Err(e) => Err(StreakError::StorageUnavailable(e.to_string())),
        }
    }

    async fn load_state(&self, user_id: &str) -> Result<Option<VersionedStreak>, StreakError> {
        let loaded = retry_if(self.retry.clone(), StoreError::is_transient, || async {
            self.store.load(user_id).await
        })
        .await;

        let state = match loaded {
            Ok(state) => state,
            Err(StoreError::Malformed(reason)) => {
                return Err(StreakError::CorruptState {
                    user_id: user_id.to_string(),
                    reason,
                })
            }
            Err(e) => return Err(StreakError::StorageUnavailable(e.to_string())),
        };

        if let Some(state) = &state {
            if state.record.user_id != user_id {
                return Err(StreakError::CorruptState {
                    user_id: user_id.to_string(),
                    reason: format!("record belongs to user {}", state.record.user_id),
                });
            }
            state
                .record
                .validate()
                .map_err(|reason| StreakError::CorruptState {
                    user_id: user_id.to_string(),
                    reason,
                })?;
        }

        Ok(state)
    }

    async fn save_state(
        &self,
        record: &StreakRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        retry_if(self.retry.clone(), StoreError::is_transient, || async {
            self.store.save(record, expected_version).await
        })
        .await
    }

    async fn fetch_activity(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StreakError> {
        retry_if(self.retry.clone(), StoreError::is_transient, || async {
            self.activity
                .list_completed_activity(user_id, start, end)
                .await
        })
        .await
        .map_err(|e| StreakError::SourceUnavailable(e.to_string()))
    }

    async fn fetch_recent_activity(&self, user_id: &str) -> Result<Vec<ActivityRecord>, StreakError> {
        retry_if(self.retry.clone(), StoreError::is_transient, || async {
            self.activity
                .list_recent_completed_activity(user_id, self.recent_activity_limit)
                .await
        })
        .await
        .map_err(|e| StreakError::SourceUnavailable(e.to_string()))
    }

    async fn fetch_lifetime_counters(&self, user_id: &str) -> Result<LifetimeCounters, StreakError> {
        retry_if(self.retry.clone(), StoreError::is_transient, || async {
            self.profiles.get_lifetime_counters(user_id).await
        })
        .await
        .map_err(|e| StreakError::ProfileUnavailable(e.to_string()))
    }
}
