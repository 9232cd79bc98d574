use std::sync::Arc;

use anyhow::Context;
use mongodb::{bson::doc, Client as MongoClient};

use crate::config::Config;
use crate::utils::calendar::CivilCalendar;

pub mod activity_source;
pub mod profile_store;
pub mod streak_engine;
pub mod streak_service;
pub mod streak_store;

use activity_source::MongoActivitySource;
use profile_store::MongoProfileStore;
use streak_service::StreakService;
use streak_store::MongoStreakStore;

pub struct AppState {
    pub config: Config,
    pub streaks: StreakService,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let calendar = CivilCalendar::new(config.streak.offset()?);

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            mongo.run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| anyhow::anyhow!("MongoDB ping timeout after 5s"))?
        .context("MongoDB ping failed")?;

        tracing::info!(
            "Streak calendar pinned to UTC offset {} (database {})",
            calendar.offset(),
            config.mongo_database
        );

        let streaks = StreakService::new(
            Arc::new(MongoStreakStore::new(mongo.clone())),
            Arc::new(MongoActivitySource::new(&mongo)),
            Arc::new(MongoProfileStore::new(&mongo)),
            calendar,
        )
        .with_retry(config.retry.to_retry_config())
        .with_settings(&config.streak);

        Ok(Self::with_service(config, streaks))
    }

    pub fn with_service(config: Config, streaks: StreakService) -> Self {
        Self { config, streaks }
    }
}
