use backtrace::Backtrace;
use serde::{de, ser};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

use crate::common::{atomic, Atomic};

/// Label attached by a store to errors after which the whole transaction may be retried.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Label attached by a store to commit errors whose outcome is unknown.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// Error kinds for repository operations.
///
/// Every failure surfaced by this crate carries exactly one kind. Store
/// failures are wrapped with the kind of the operation that failed, while
/// argument problems are reported as [`ErrorKind::ValidationError`] before any
/// store round-trip takes place.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::errors::{RepoError, ErrorKind, RepoResult};
///
/// fn example() -> RepoResult<()> {
///     Err(RepoError::new("invalid page: must be >= 1", ErrorKind::ValidationError))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum ErrorKind {
    // Connection Errors
    /// The client could not be created from the connection string
    ConnectionError,
    /// The client was created but the server did not answer the liveness check
    ServerUnreachable,

    // Operation Errors
    /// Inserting or re-reading an inserted document failed
    InsertError,
    /// A read could not be executed
    QueryError,
    /// A single-document read or delete matched nothing
    NotFound,
    /// An update could not be executed
    UpdateError,
    /// A delete could not be executed
    DeleteError,
    /// An aggregation pipeline could not be executed
    AggregateError,
    /// A batched write could not be executed
    BulkWriteError,
    /// A change stream could not be opened or advanced
    ChangeStreamError,
    /// An index could not be created or listed
    IndexError,
    /// A session or transaction could not be started, committed or aborted
    TransactionError,

    // Argument Errors
    /// An argument was rejected before any store call
    ValidationError,
    /// A required capability or setting is missing
    ConfigurationError,

    // Data Errors
    /// A stored document could not be decoded into the target type
    DecodeError,
    /// A value could not be encoded into a document
    EncodingError,
    /// A unique index rejected a write
    DuplicateKey,

    // Control Errors
    /// The caller cancelled the operation or its deadline expired
    Cancelled,

    // Generic Errors
    /// Error reported by the underlying store
    BackendError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConnectionError => write!(f, "Connection error"),
            ErrorKind::ServerUnreachable => write!(f, "Server unreachable"),
            ErrorKind::InsertError => write!(f, "Insert error"),
            ErrorKind::QueryError => write!(f, "Query error"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::UpdateError => write!(f, "Update error"),
            ErrorKind::DeleteError => write!(f, "Delete error"),
            ErrorKind::AggregateError => write!(f, "Aggregate error"),
            ErrorKind::BulkWriteError => write!(f, "Bulk write error"),
            ErrorKind::ChangeStreamError => write!(f, "Change stream error"),
            ErrorKind::IndexError => write!(f, "Index error"),
            ErrorKind::TransactionError => write!(f, "Transaction error"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::ConfigurationError => write!(f, "Configuration error"),
            ErrorKind::DecodeError => write!(f, "Decode error"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type of the repository layer.
///
/// `RepoError` carries a message, a kind, an optional cause and the set of
/// labels a store attached to the failure. Wrapping an error keeps the cause
/// reachable through [`Error::source`] and carries its labels forward, so a
/// transient transaction conflict stays recognisable after the repository
/// has prefixed it with the failed operation.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::errors::{RepoError, ErrorKind};
///
/// let cause = RepoError::new("socket closed", ErrorKind::BackendError);
/// let err = RepoError::new_with_cause("failed to insert document", ErrorKind::InsertError, cause);
/// assert_eq!(err.to_string(), "failed to insert document: socket closed");
/// ```
#[derive(Clone)]
pub struct RepoError {
    message: String,
    error_kind: ErrorKind,
    labels: Vec<String>,
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
    backtrace: Atomic<Backtrace>,
}

impl RepoError {
    /// Creates a new `RepoError` with the specified message and error kind.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        RepoError {
            message: message.to_string(),
            error_kind,
            labels: Vec::new(),
            cause: None,
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `RepoError` wrapping a cause.
    ///
    /// Labels of the cause are copied onto the new error.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    /// * `cause` - The underlying error that caused this error
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: RepoError) -> Self {
        let labels = cause.labels.clone();
        RepoError {
            message: message.to_string(),
            error_kind,
            labels,
            cause: Some(Arc::new(cause)),
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `RepoError` wrapping a foreign error, typically one raised by a driver.
    pub fn from_source<E>(message: &str, error_kind: ErrorKind, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        RepoError {
            message: message.to_string(),
            error_kind,
            labels: Vec::new(),
            cause: Some(Arc::new(source)),
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Wraps `self` with an operation prefix unless it must pass through unchanged.
    ///
    /// Cancellation and validation failures keep their identity so callers can
    /// tell them apart from store failures.
    pub fn wrap(self, message: &str, error_kind: ErrorKind) -> Self {
        match self.error_kind {
            ErrorKind::Cancelled | ErrorKind::ValidationError => self,
            _ => RepoError::new_with_cause(message, error_kind, self),
        }
    }

    /// Attaches a store label to this error.
    pub fn with_label(mut self, label: &str) -> Self {
        if !self.has_label(label) {
            self.labels.push(label.to_string());
        }
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Returns the cause if it is itself a `RepoError`.
    pub fn repo_cause(&self) -> Option<&RepoError> {
        self.cause.as_deref().and_then(|c| {
            let c: &(dyn Error + 'static) = c;
            c.downcast_ref::<RepoError>()
        })
    }

    /// Walks the cause chain and reports whether any `RepoError` in it has `kind`.
    pub fn is_caused_by(&self, kind: &ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(err) = current {
            if &err.error_kind == kind {
                return true;
            }
            current = err.repo_cause();
        }
        false
    }
}

/// Returns a closure that wraps an error with an operation prefix.
///
/// Meant for `map_err` chains:
///
/// ```rust,ignore
/// collection.insert_one(ctx, doc, None)
///     .map_err(wrap_err("failed to insert document", ErrorKind::InsertError))?;
/// ```
pub fn wrap_err(message: &'static str, kind: ErrorKind) -> impl FnOnce(RepoError) -> RepoError {
    move |err| {
        let wrapped = err.wrap(message, kind);
        log::error!("{}", wrapped);
        wrapped
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Debug for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{} [{}]\nCaused by: {:?}", self.message, self.error_kind, cause),
            None => {
                let mut backtrace = self.backtrace.write();
                backtrace.resolve();
                write!(f, "{} [{}]\n{:?}", self.message, self.error_kind, *backtrace)
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref() as &(dyn Error + 'static)),
            None => None,
        }
    }
}

/// A result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

impl de::Error for RepoError {
    fn custom<T: Display>(msg: T) -> Self {
        RepoError::new(&msg.to_string(), ErrorKind::DecodeError)
    }
}

impl ser::Error for RepoError {
    fn custom<T: Display>(msg: T) -> Self {
        RepoError::new(&msg.to_string(), ErrorKind::EncodingError)
    }
}

impl From<bson::ser::Error> for RepoError {
    fn from(err: bson::ser::Error) -> Self {
        RepoError::from_source("failed to encode document", ErrorKind::EncodingError, err)
    }
}

impl From<bson::de::Error> for RepoError {
    fn from(err: bson::de::Error) -> Self {
        RepoError::from_source("failed to decode document", ErrorKind::DecodeError, err)
    }
}

impl From<bson::oid::Error> for RepoError {
    fn from(err: bson::oid::Error) -> Self {
        RepoError::from_source("invalid object id", ErrorKind::ValidationError, err)
    }
}

impl From<regex::Error> for RepoError {
    fn from(err: regex::Error) -> Self {
        RepoError::from_source("invalid regular expression", ErrorKind::ValidationError, err)
    }
}

impl From<String> for RepoError {
    fn from(msg: String) -> Self {
        RepoError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for RepoError {
    fn from(msg: &str) -> Self {
        RepoError::new(msg, ErrorKind::InternalError)
    }
}
