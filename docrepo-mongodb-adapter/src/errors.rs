use docrepo::errors::{ErrorKind, RepoError};
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind, WriteFailure};
use thiserror::Error;

// Server codes reported for unique index violations.
const DUPLICATE_KEY_CODES: [i32; 4] = [11000, 11001, 11002, 12582];

/// Errors raised by the adapter itself before the driver is involved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MongoAdapterError {
    /// No connection string was configured
    #[error("connection uri is required")]
    MissingUri,
    /// No database name was configured
    #[error("database name is required")]
    MissingDatabase,
    /// A setting is out of range
    #[error("invalid setting {0}: {1}")]
    InvalidSetting(&'static str, String),
}

impl From<MongoAdapterError> for RepoError {
    /// Converts a `MongoAdapterError` to a `RepoError` with ConfigurationError kind.
    fn from(err: MongoAdapterError) -> Self {
        RepoError::new(&err.to_string(), ErrorKind::ConfigurationError)
    }
}

/// The server error code of `err`, if it carries one.
pub(crate) fn error_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        MongoErrorKind::Command(command) => Some(command.code),
        MongoErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        MongoErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        MongoErrorKind::BulkWrite(bulk) => bulk
            .write_errors
            .iter()
            .min_by_key(|(index, _)| **index)
            .map(|(_, write)| write.code),
        _ => None,
    }
}

pub(crate) fn is_duplicate_key(err: &MongoError) -> bool {
    error_code(err).is_some_and(|code| DUPLICATE_KEY_CODES.contains(&code))
}

/// Converts a driver error into a raw store error.
///
/// The driver error stays reachable as the cause and its labels are copied,
/// so transaction retry decisions see them.
pub(crate) fn store_error(err: MongoError) -> RepoError {
    let kind = if is_duplicate_key(&err) {
        ErrorKind::DuplicateKey
    } else {
        match err.kind.as_ref() {
            MongoErrorKind::BsonDeserialization(_) => ErrorKind::DecodeError,
            MongoErrorKind::BsonSerialization(_) => ErrorKind::EncodingError,
            _ => ErrorKind::BackendError,
        }
    };
    let labels: Vec<String> = err.labels().iter().cloned().collect();
    let message = err.to_string();
    let mut repo_error = RepoError::from_source(&message, kind, err);
    for label in labels {
        repo_error = repo_error.with_label(&label);
    }
    repo_error
}
