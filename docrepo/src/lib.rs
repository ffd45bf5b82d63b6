//! # docrepo - Typed Document Repositories
//!
//! docrepo is a thin, typed data-access layer over document databases. A
//! [`Repository`](repository::Repository) binds one serde type to one
//! collection and exposes CRUD, pagination, aggregation, bulk writes, change
//! streams, index management and transactions on top of it.
//!
//! ## Key Features
//!
//! - **Typed**: documents are plain serde structs implementing [`Model`](model::Model)
//! - **Lifecycle Hooks**: `before_insert` / `before_update` with no-op defaults
//! - **Update Classification**: operator documents pass through, typed values become `$set`
//! - **Stable Errors**: every failure carries an [`ErrorKind`](errors::ErrorKind) and an operation prefix
//! - **Cancellation**: every call takes a [`Context`](context::Context) with cancellation and deadline
//! - **Transactions**: closure-based runner with transient-error retries
//! - **Pluggable Drivers**: an in-memory driver ships with the crate, MongoDB lives in
//!   `docrepo-mongodb-adapter`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docrepo::context::Context;
//! use docrepo::driver::memory::InMemoryDatabase;
//! use docrepo::model::{BaseFields, Model};
//! use docrepo::repository::Repository;
//! use docrepo_derive::Model;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Model)]
//! #[model(index(keys = "email:1", unique))]
//! struct User {
//!     #[serde(flatten)]
//!     #[model(base)]
//!     base: BaseFields,
//!     email: String,
//! }
//!
//! # fn main() -> docrepo::errors::RepoResult<()> {
//! let ctx = Context::background();
//! let db = InMemoryDatabase::open("app");
//! let users: Repository<User> = Repository::new(&db, "users");
//! users.ensure_indexes_from_model(&ctx, None)?;
//!
//! let stored = users.insert_one(&ctx, User { base: BaseFields::new(), email: "a@b.c".into() }, None)?;
//! let page = users.find_paginated(&ctx, None, 1, 20)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Pattern
//!
//! Drivers implement provider traits (`DatabaseProvider`, `CollectionProvider`,
//! `SessionProvider`, ...) and are used through cheap-to-clone facades
//! (`Database`, `Collection`, `Session`) holding an `Arc<dyn Provider>`. The
//! repository only ever talks to the facades.
//!
//! ## Module Organization
//!
//! - [`common`] - Shared constants and helpers
//! - [`context`] - Cancellation, deadlines and session binding
//! - [`driver`] - Provider traits, facades and the in-memory driver
//! - [`errors`] - Error types and result definitions
//! - [`model`] - Document lifecycle protocol and index descriptors
//! - [`options`] - Per-operation option structures
//! - [`repository`] - Typed repository, update classifier and transaction runner

pub mod common;
pub mod context;
pub mod driver;
pub mod errors;
pub mod model;
pub mod options;
pub mod repository;

pub use bson;

// Logging for unit tests, set up once for the whole crate.
#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
