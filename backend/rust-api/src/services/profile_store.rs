use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection, Database,
};
use serde::Deserialize;

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::LifetimeCounters;

pub const USERS_COLLECTION: &str = "users";

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Lifetime totals for `user_id`; all zero when the user has no profile.
    async fn get_lifetime_counters(&self, user_id: &str) -> Result<LifetimeCounters, StoreError>;
}

#[derive(Debug, Default, Deserialize)]
struct UserCountersDocument {
    #[serde(default)]
    total_quizzes_completed: i64,
    #[serde(default)]
    total_questions_answered: i64,
    #[serde(default)]
    total_time_spent_minutes: i64,
}

impl From<UserCountersDocument> for LifetimeCounters {
    fn from(document: UserCountersDocument) -> Self {
        LifetimeCounters {
            quizzes_completed: document.total_quizzes_completed.max(0) as u64,
            questions_answered: document.total_questions_answered.max(0) as u64,
            time_spent_minutes: document.total_time_spent_minutes.max(0) as u64,
        }
    }
}

pub struct MongoProfileStore {
    collection: Collection<UserCountersDocument>,
}

impl MongoProfileStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(USERS_COLLECTION),
        }
    }
}

#[async_trait]
impl ProfileStore for MongoProfileStore {
    async fn get_lifetime_counters(&self, user_id: &str) -> Result<LifetimeCounters, StoreError> {
        let document = track_db_operation("find_one", USERS_COLLECTION, async {
            self.collection
                .find_one(user_filter(user_id))
                .projection(doc! {
                    "total_quizzes_completed": 1,
                    "total_questions_answered": 1,
                    "total_time_spent_minutes": 1,
                })
                .await
        })
        .await?;

        Ok(document.unwrap_or_default().into())
    }
}

/// Profiles may be keyed by ObjectId or by the raw id string.
fn user_filter(user_id: &str) -> Document {
    match ObjectId::parse_str(user_id) {
        Ok(oid) => doc! { "_id": { "$in": [Bson::ObjectId(oid), user_id] } },
        Err(_) => doc! { "_id": user_id },
    }
}
