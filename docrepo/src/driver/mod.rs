//! Driver abstraction.
//!
//! A driver is the client of a concrete document store. It plugs into this
//! crate by implementing the provider traits of this module; the repository
//! only talks to the cheap-to-clone facades wrapping them:
//!
//! | Provider                 | Facade          |
//! |--------------------------|-----------------|
//! | [`DatabaseProvider`]     | [`Database`]    |
//! | [`CollectionProvider`]   | [`Collection`]  |
//! | [`SessionProvider`]      | [`Session`]     |
//! | [`CursorProvider`]       | [`Cursor`]      |
//! | [`ChangeStreamProvider`] | [`ChangeStream`]|
//!
//! Provider errors are raw store errors; the repository prefixes them with
//! the operation that failed. The [`memory`] module contains an in-process
//! driver.

mod change_stream;
mod collection;
mod cursor;
mod database;
mod results;
mod session;
mod write_model;

pub mod memory;

pub use change_stream::*;
pub use collection::*;
pub use cursor::*;
pub use database::*;
pub use results::*;
pub use session::*;
pub use write_model::*;
