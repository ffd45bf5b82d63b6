//! Typed repositories.
//!
//! A [`Repository`] is the typed face of a collection. It works with any
//! driver through the [`Collection`](crate::driver::Collection) facade and
//! adds what a raw collection does not have:
//!
//! - lifecycle hooks of the [`Model`](crate::model::Model) before writes
//! - classification of update arguments ([`classify_update`])
//! - 1-based pagination with totals
//! - index creation from the model's declared indexes
//! - closure-based transactions ([`TransactionRunner`])
//!
//! ```rust,ignore
//! use docrepo::repository::{Repository, Update};
//!
//! let users: Repository<User> = Repository::new(&db, "users");
//! let (page, total) = users.find_paginated_with_total(&ctx, None, 1, 20)?;
//! users.update_by_id(&ctx, id, Update::Model(user), None)?;
//! ```

mod classifier;
#[allow(clippy::module_inception)]
mod repository;
mod transaction;

pub use classifier::*;
pub use repository::*;
pub use transaction::*;
