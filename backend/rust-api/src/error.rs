use mongodb::error::{ErrorKind, WriteFailure, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR};
use thiserror::Error;

/// MongoDB duplicate key error code.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures surfaced by the streak operations.
#[derive(Debug, Error)]
pub enum StreakError {
    #[error("Streak storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Activity source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Profile store unavailable: {0}")]
    ProfileUnavailable(String),

    #[error("Corrupt streak state for user {user_id}: {reason}")]
    CorruptState { user_id: String, reason: String },

    #[error("Streak update for user {user_id} lost {attempts} concurrent write races")]
    ConcurrentUpdate { user_id: String, attempts: u32 },
}

/// Failures reported by a storage collaborator (streak store, quiz results,
/// user profiles).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient failure: {0}")]
    Transient(String),

    /// The conditional write found a different version than expected.
    #[error("version conflict")]
    Conflict,

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
        matches!(
            *err.kind,
            ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY_CODE
        )
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let transient = err.contains_label(RETRYABLE_WRITE_ERROR)
            || err.contains_label(TRANSIENT_TRANSACTION_ERROR)
            || matches!(
                *err.kind,
                ErrorKind::Io(_)
                    | ErrorKind::ServerSelection { .. }
                    | ErrorKind::ConnectionPoolCleared { .. }
            );

        if transient {
            return StoreError::Transient(err.to_string());
        }

        match *err.kind {
            ErrorKind::BsonDeserialization(_) => StoreError::Malformed(err.to_string()),
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Permanent(err.to_string())
    }
}
