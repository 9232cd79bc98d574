use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    Collection, Database,
};
use serde::Deserialize;

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::ActivityRecord;
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

pub const QUIZ_RESULTS_COLLECTION: &str = "quiz_results";
const COMPLETED_STATUS: &str = "completed";

/// Read-only view of a user's completed practice sessions.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Sessions completed within `[start, end]`, both ends inclusive.
    async fn list_completed_activity(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError>;

    /// Up to `max_count` most recent sessions, newest first.
    async fn list_recent_completed_activity(
        &self,
        user_id: &str,
        max_count: u32,
    ) -> Result<Vec<ActivityRecord>, StoreError>;
}

/// Quiz result document as written by the quiz service.
#[derive(Debug, Deserialize)]
struct QuizResultDocument {
    #[serde(default)]
    question_count: i64,
    #[serde(default)]
    correct_count: i64,
    #[serde(default)]
    time_spent_seconds: i64,
    completed_at: BsonDateTime,
}

impl QuizResultDocument {
    fn into_activity(self) -> Result<ActivityRecord, StoreError> {
        let completed_at = bson_to_chrono(self.completed_at).ok_or_else(|| {
            StoreError::Malformed(format!("completed_at out of range: {}", self.completed_at))
        })?;

        // Negative counters from the quiz service are treated as zero
        Ok(ActivityRecord {
            question_count: u32::try_from(self.question_count.max(0)).unwrap_or(u32::MAX),
            correct_count: u32::try_from(self.correct_count.max(0)).unwrap_or(u32::MAX),
            time_spent_seconds: self.time_spent_seconds.max(0) as u64,
            completed_at,
        })
    }
}

pub struct MongoActivitySource {
    collection: Collection<QuizResultDocument>,
}

impl MongoActivitySource {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(QUIZ_RESULTS_COLLECTION),
        }
    }
}

#[async_trait]
impl ActivitySource for MongoActivitySource {
    async fn list_completed_activity(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let filter = doc! {
            "user_id": user_id,
            "status": COMPLETED_STATUS,
            "completed_at": { "$gte": chrono_to_bson(start), "$lte": chrono_to_bson(end) }
        };

        let documents: Vec<QuizResultDocument> =
            track_db_operation("find", QUIZ_RESULTS_COLLECTION, async {
                self.collection.find(filter).await?.try_collect().await
            })
            .await?;

        documents
            .into_iter()
            .map(QuizResultDocument::into_activity)
            .collect()
    }

    async fn list_recent_completed_activity(
        &self,
        user_id: &str,
        max_count: u32,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let filter = doc! { "user_id": user_id, "status": COMPLETED_STATUS };

        let documents: Vec<QuizResultDocument> =
            track_db_operation("find", QUIZ_RESULTS_COLLECTION, async {
                self.collection
                    .find(filter)
                    .sort(doc! { "completed_at": -1 })
                    .limit(i64::from(max_count))
                    .await?
                    .try_collect()
                    .await
            })
            .await?;

        documents
            .into_iter()
            .map(QuizResultDocument::into_activity)
            .collect()
    }
}
