#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use streak_api::{
    config::{Config, RetrySettings, StreakSettings},
    create_router,
    error::StoreError,
    models::{ActivityRecord, LifetimeCounters, StreakRecord},
    services::{
        activity_source::ActivitySource,
        profile_store::ProfileStore,
        streak_service::StreakService,
        streak_store::{StreakStore, VersionedStreak},
        AppState,
    },
    utils::{calendar::CivilCalendar, retry::RetryConfig},
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn session(
    completed_at: DateTime<Utc>,
    questions: u32,
    correct: u32,
    seconds: u64,
) -> ActivityRecord {
    ActivityRecord {
        question_count: questions,
        correct_count: correct,
        time_spent_seconds: seconds,
        completed_at,
    }
}

/// Streak store backed by a map, with knobs for injecting failures and races.
#[derive(Default)]
pub struct InMemoryStreakStore {
    records: Mutex<HashMap<String, (StreakRecord, u64)>>,
    malformed: Mutex<HashSet<String>>,
    racing_write: Mutex<Option<StreakRecord>>,
    transient_load_failures: AtomicUsize,
    fail_saves: AtomicBool,
    always_conflict: AtomicBool,
    unreachable: AtomicBool,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
}

impl InMemoryStreakStore {
    pub fn seed(&self, record: StreakRecord, version: u64) {
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), (record, version));
    }

    pub fn get(&self, user_id: &str) -> Option<(StreakRecord, u64)> {
        self.records.lock().unwrap().get(user_id).cloned()
    }

    pub fn mark_malformed(&self, user_id: &str) {
        self.malformed.lock().unwrap().insert(user_id.to_string());
    }

    /// Another writer stores `record` right before the next save lands.
    pub fn race_next_save_with(&self, record: StreakRecord) {
        *self.racing_write.lock().unwrap() = Some(record);
    }

    pub fn fail_next_loads(&self, count: usize) {
        self.transient_load_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn always_conflict(&self) {
        self.always_conflict.store(true, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreakStore for InMemoryStreakStore {
    async fn load(&self, user_id: &str) -> Result<Option<VersionedStreak>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let pending = self.transient_load_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_load_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        if self.malformed.lock().unwrap().contains(user_id) {
            return Err(StoreError::Malformed(
                "invalid type: integer `-2`, expected u32".to_string(),
            ));
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .get(user_id)
            .map(|(record, version)| VersionedStreak {
                record: record.clone(),
                version: *version,
            }))
    }

    async fn save(
        &self,
        record: &StreakRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);

        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("write refused".to_string()));
        }
        if self.always_conflict.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict);
        }

        let mut records = self.records.lock().unwrap();

        if let Some(racing) = self.racing_write.lock().unwrap().take() {
            let version = records
                .get(&racing.user_id)
                .map_or(1, |(_, version)| version + 1);
            records.insert(racing.user_id.clone(), (racing, version));
        }

        let current = records.get(&record.user_id).map(|(_, version)| *version);
        if current != expected_version {
            return Err(StoreError::Conflict);
        }

        let next_version = expected_version.map_or(1, |version| version + 1);
        records.insert(record.user_id.clone(), (record.clone(), next_version));
        Ok(next_version)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("no reachable servers".to_string()));
        }
        Ok(())
    }
}

/// Quiz results keyed by user.
#[derive(Default)]
pub struct FakeActivitySource {
    sessions: Mutex<Vec<(String, ActivityRecord)>>,
    unavailable: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeActivitySource {
    pub fn add(&self, user_id: &str, record: ActivityRecord) {
        self.sessions
            .lock()
            .unwrap()
            .push((user_id.to_string(), record));
    }

    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn for_user(&self, user_id: &str) -> Result<Vec<ActivityRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("quiz results timed out".to_string()));
        }
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[async_trait]
impl ActivitySource for FakeActivitySource {
    async fn list_completed_activity(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        Ok(self
            .for_user(user_id)?
            .into_iter()
            .filter(|r| r.completed_at >= start && r.completed_at <= end)
            .collect())
    }

    async fn list_recent_completed_activity(
        &self,
        user_id: &str,
        max_count: u32,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let mut records = self.for_user(user_id)?;
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        records.truncate(max_count as usize);
        Ok(records)
    }
}

#[derive(Default)]
pub struct FakeProfileStore {
    counters: Mutex<HashMap<String, LifetimeCounters>>,
    unavailable: AtomicBool,
}

impl FakeProfileStore {
    pub fn set(&self, user_id: &str, counters: LifetimeCounters) {
        self.counters
            .lock()
            .unwrap()
            .insert(user_id.to_string(), counters);
    }

    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn get_lifetime_counters(&self, user_id: &str) -> Result<LifetimeCounters, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("profile lookup timed out".to_string()));
        }
        Ok(self
            .counters
            .lock()
            .unwrap()
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStreakStore>,
    pub activity: Arc<FakeActivitySource>,
    pub profiles: Arc<FakeProfileStore>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: Arc::new(InMemoryStreakStore::default()),
            activity: Arc::new(FakeActivitySource::default()),
            profiles: Arc::new(FakeProfileStore::default()),
        }
    }

    pub fn service(&self) -> StreakService {
        self.service_with_calendar(CivilCalendar::utc())
    }

    pub fn service_with_offset_minutes(&self, minutes: i32) -> StreakService {
        self.service_with_calendar(CivilCalendar::new(
            FixedOffset::east_opt(minutes * 60).unwrap(),
        ))
    }

    fn service_with_calendar(&self, calendar: CivilCalendar) -> StreakService {
        StreakService::new(
            self.store.clone(),
            self.activity.clone(),
            self.profiles.clone(),
            calendar,
        )
        .with_retry(fast_retry())
        .with_settings(&StreakSettings {
            max_conflict_retries: 3,
            ..StreakSettings::default()
        })
    }

    pub fn router(&self) -> Router {
        let state = AppState::with_service(test_config(), self.service());
        create_router(Arc::new(state))
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        jitter_max: None,
    }
}

pub fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "streaks_test".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        streak: StreakSettings::default(),
        retry: RetrySettings::default(),
    }
}
