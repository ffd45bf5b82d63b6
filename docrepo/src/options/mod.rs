//! Per-operation option structures.
//!
//! Each operation of a repository or collection accepts its own option type
//! (or `None`). Every recognised option is a field with a documented effect;
//! drivers forward them to the store unchanged unless noted on the field.

mod change_stream_options;
mod find_options;
mod session_options;
mod write_options;

pub use change_stream_options::*;
pub use find_options::*;
pub use session_options::*;
pub use write_options::*;
