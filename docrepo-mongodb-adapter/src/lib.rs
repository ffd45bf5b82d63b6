//! # docrepo MongoDB adapter
//!
//! Implements the `docrepo` driver providers on top of the official
//! `mongodb` crate, using its synchronous API.
//!
//! ```rust,ignore
//! use docrepo::context::Context;
//! use docrepo::repository::Repository;
//! use docrepo_mongodb_adapter::MongoConnector;
//!
//! let ctx = Context::background();
//! let db = MongoConnector::with_config()
//!     .uri("mongodb://localhost:27017")
//!     .database("shop")
//!     .build()?
//!     .connect(&ctx)?;
//! let users: Repository<User> = Repository::new(&db, "users");
//! ```
//!
//! Errors reported by the server keep their labels, so transient transaction
//! failures are retried by `Database::with_transaction`. A violated unique
//! index surfaces as `ErrorKind::DuplicateKey`.

mod collection;
mod config;
mod connector;
mod convert;
mod cursor;
mod database;
mod errors;
mod session;

pub use config::*;
pub use connector::*;
pub use database::MongoDatabase;
pub use errors::MongoAdapterError;
pub use session::MongoSession;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
