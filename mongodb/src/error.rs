//! Driver error classification.

use mongodb::error::{Error, ErrorKind, WriteFailure};
use service_common_core::repository::RepositoryError;
use uuid::Uuid;

/// Server error code for a unique index violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Map a driver error onto the repository taxonomy.
///
/// `id` is the identifier the failing write targeted, used to report duplicates.
pub(crate) fn map_driver_error(error: Error, id: Option<Uuid>) -> RepositoryError {
    match (error.kind.as_ref(), id) {
        (ErrorKind::Write(WriteFailure::WriteError(write_error)), Some(id))
            if write_error.code == DUPLICATE_KEY_CODE =>
        {
            RepositoryError::DuplicateKey(id)
        },
        (ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_), _) => {
            RepositoryError::Serialization(error.to_string())
        },
        _ => {
            tracing::warn!(error = %error, "Document store call failed");
            RepositoryError::StoreUnavailable(error.to_string())
        },
    }
}
