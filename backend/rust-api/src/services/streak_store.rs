use async_trait::async_trait;
use mongodb::{
    bson::{doc, from_document, to_document, Bson, Document},
    Collection, Database,
};

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::StreakRecord;

pub const STREAKS_COLLECTION: &str = "practice_streaks";

/// A persisted record together with the version its next conditional write
/// must match.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedStreak {
    pub record: StreakRecord,
    pub version: u64,
}

/// Durable per-user streak state.
#[async_trait]
pub trait StreakStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<VersionedStreak>, StoreError>;

    /// Writes `record` only if the stored version still equals
    /// `expected_version` (`None`: no record may exist yet). Returns the new
    /// version, or `StoreError::Conflict` when another writer got there first.
    async fn save(
        &self,
        record: &StreakRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub struct MongoStreakStore {
    mongo: Database,
    collection: Collection<Document>,
}

impl MongoStreakStore {
    pub fn new(mongo: Database) -> Self {
        let collection = mongo.collection::<Document>(STREAKS_COLLECTION);
        Self { mongo, collection }
    }

    fn to_stored_document(record: &StreakRecord, version: u64) -> Result<Document, StoreError> {
        let mut document = to_document(record)?;
        document.insert("_id", record.user_id.as_str());
        document.insert("version", version as i64);
        Ok(document)
    }

    /// Matches the stored record only while it still carries `version`.
    /// Documents written before versioning have no field and load as 0.
    fn version_filter(user_id: &str, version: u64) -> Document {
        if version == 0 {
            doc! { "_id": user_id, "version": { "$in": [0_i64, Bson::Null] } }
        } else {
            doc! { "_id": user_id, "version": version as i64 }
        }
    }

    fn from_stored_document(mut document: Document) -> Result<VersionedStreak, StoreError> {
        let version = match document.remove("version") {
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_i32().map(i64::from))
                .filter(|v| *v >= 0)
                .ok_or_else(|| StoreError::Malformed(format!("invalid version {}", value)))?,
            None => 0,
        };
        document.remove("_id");
        let record: StreakRecord = from_document(document)?;
        Ok(VersionedStreak {
            record,
            version: version as u64,
        })
    }
}

#[async_trait]
impl StreakStore for MongoStreakStore {
    async fn load(&self, user_id: &str) -> Result<Option<VersionedStreak>, StoreError> {
        let found = track_db_operation("find_one", STREAKS_COLLECTION, async {
            self.collection.find_one(doc! { "_id": user_id }).await
        })
        .await?;

        found.map(Self::from_stored_document).transpose()
    }

    async fn save(
        &self,
        record: &StreakRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        match expected_version {
            None => {
                let document = Self::to_stored_document(record, 1)?;
                let inserted = track_db_operation("insert_one", STREAKS_COLLECTION, async {
                    self.collection.insert_one(document).await
                })
                .await;

                match inserted {
                    Ok(_) => Ok(1),
                    Err(e) if StoreError::is_duplicate_key(&e) => Err(StoreError::Conflict),
                    Err(e) => Err(e.into()),
                }
            }
            Some(version) => {
                let next_version = version + 1;
                let document = Self::to_stored_document(record, next_version)?;
                let result = track_db_operation("replace_one", STREAKS_COLLECTION, async {
                    self.collection
                        .replace_one(Self::version_filter(&record.user_id, version), document)
                        .await
                })
                .await?;

                if result.matched_count == 0 {
                    return Err(StoreError::Conflict);
                }
                Ok(next_version)
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn stored_document_carries_id_and_version() {
        let mut record = StreakRecord::empty("user-42");
        record.current_streak = 2;
        record.longest_streak = 4;
        record.last_practice_date = NaiveDate::from_ymd_opt(2024, 3, 6);

        let document = MongoStreakStore::to_stored_document(&record, 3).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), "user-42");
        assert_eq!(document.get_i64("version").unwrap(), 3);

        let restored = MongoStreakStore::from_stored_document(document).unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.record, record);
    }

    #[test]
    fn unversioned_document_loads_as_version_zero() {
        let mut document = MongoStreakStore::to_stored_document(&StreakRecord::empty("user-3"), 1)
            .unwrap();
        document.remove("version");

        let restored = MongoStreakStore::from_stored_document(document).unwrap();
        assert_eq!(restored.version, 0);
    }

    #[test]
    fn version_zero_filter_also_matches_missing_field() {
        let filter = MongoStreakStore::version_filter("user-3", 0);
        assert_eq!(filter.get_str("_id").unwrap(), "user-3");

        let accepted = filter
            .get_document("version")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(accepted, &vec![Bson::Int64(0), Bson::Null]);

        let versioned = MongoStreakStore::version_filter("user-3", 4);
        assert_eq!(versioned.get_i64("version").unwrap(), 4);
    }

    #[test]
    fn negative_streak_document_is_malformed() {
        let document = doc! {
            "_id": "user-1",
            "version": 1_i64,
            "user_id": "user-1",
            "current_streak": -2,
            "longest_streak": 1,
            "last_practice_date": null,
            "total_days_practiced": 0,
            "total_quizzes_completed": 0,
            "total_questions_answered": 0,
            "total_time_spent_minutes": 0,
            "last_updated": null,
        };

        let err = MongoStreakStore::from_stored_document(document).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn missing_field_is_malformed() {
        let document = doc! { "_id": "user-1", "version": 1_i64, "user_id": "user-1" };

        let err = MongoStreakStore::from_stored_document(document).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
