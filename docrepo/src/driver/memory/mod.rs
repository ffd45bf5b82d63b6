//! In-process document store.
//!
//! Implements the driver providers over plain in-memory collections. It
//! evaluates query filters, update operators, projections and a subset of
//! the aggregation pipeline, enforces unique indexes, runs snapshot
//! transactions and feeds change streams. Expiry of TTL indexes is not
//! performed; their options are only recorded.

mod aggregate;
mod change_feed;
mod collection;
mod compare;
mod config;
mod database;
mod expression;
mod filter;
mod path;
mod projection;
mod session;
mod store;
mod update;

pub use config::*;
pub use database::InMemoryDatabase;
pub use session::InMemorySession;

use crate::errors::{ErrorKind, RepoError};

/// Error raised by the store itself, as opposed to the repository.
pub(crate) fn store_error(message: &str) -> RepoError {
    RepoError::new(message, ErrorKind::BackendError)
}
