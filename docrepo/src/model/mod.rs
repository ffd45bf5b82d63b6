//! Document lifecycle protocol.
//!
//! A document type stored through a [`Repository`](crate::repository::Repository)
//! implements [`Model`]. All hooks have no-op defaults, so a plain serde type
//! only needs an empty `impl Model for X {}`; types embedding [`BaseFields`]
//! usually derive the implementation with `#[derive(Model)]` from the
//! `docrepo_derive` crate.

mod base_fields;
mod index_model;

pub use base_fields::*;
pub use index_model::*;

use bson::oid::ObjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::RepoResult;

/// Capabilities a document type offers to the repository.
///
/// The repository calls the hooks synchronously before issuing a write:
///
/// * [`Model::before_insert`] before `insert_one`, `insert_many` and typed
///   bulk inserts,
/// * [`Model::before_update`] exactly once when a typed value is used as an
///   update and wrapped in a `$set` envelope,
/// * [`Model::validate`] right after the respective hook, failing the call
///   with a validation error before any store round-trip.
///
/// [`Model::indexes`] declares the indexes the type needs; returning `None`
/// means the type does not declare any and
/// `Repository::ensure_indexes_from_model` reports a configuration error.
///
/// # Examples
///
/// ```rust,ignore
/// use serde::{Deserialize, Serialize};
/// use docrepo::model::{BaseFields, Model};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     #[serde(flatten)]
///     base: BaseFields,
///     email: String,
/// }
///
/// impl Model for User {
///     fn set_id(&mut self, id: bson::oid::ObjectId) { self.base.set_id(id) }
///     fn before_insert(&mut self) { self.base.before_insert() }
///     fn before_update(&mut self) { self.base.before_update() }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Assigns a generated identifier.
    fn set_id(&mut self, _id: ObjectId) {}

    /// Called before the value is inserted.
    fn before_insert(&mut self) {}

    /// Called before the value is used as a `$set` update.
    fn before_update(&mut self) {}

    /// Checks the value after its hook ran and before it is written.
    fn validate(&self) -> RepoResult<()> {
        Ok(())
    }

    /// Indexes the collection holding this type requires.
    fn indexes() -> Option<Vec<IndexModel>>
    where
        Self: Sized,
    {
        None
    }
}

impl Model for bson::Document {}
