#![recursion_limit = "128"]
//! # docrepo Derive Macros
//!
//! This crate provides the `Model` derive for the `docrepo` crate.
//!
//! ## `Model`
//!
//! Implements `docrepo::model::Model` for a struct with named fields.
//!
//! - **Field attribute** `#[model(base)]`: marks the embedded
//!   `docrepo::model::BaseFields`. The lifecycle hooks (`set_id`,
//!   `before_insert`, `before_update`) are delegated to it. Without it the
//!   hooks keep their no-op defaults.
//! - **Container attribute** `#[model(index(...))]`: declares an index,
//!   repeatable. Recognised keys:
//!   - `keys = "email:1,name:-1"` (required)
//!   - `unique`, `sparse`
//!   - `name = "..."`
//!   - `expire_after_secs = 3600`
//!
//! # Examples
//!
//! ```rust,ignore
//! use docrepo::model::BaseFields;
//! use docrepo_derive::Model;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Model)]
//! #[model(index(keys = "email:1", unique))]
//! #[model(index(keys = "lastLogin:-1", name = "recent_logins"))]
//! pub struct User {
//!     #[serde(flatten)]
//!     #[model(base)]
//!     pub base: BaseFields,
//!     pub email: String,
//! }
//! ```

extern crate proc_macro;
mod model;

use crate::model::generate_model_for_struct;
use proc_macro::TokenStream;
use syn::{Data, DeriveInput};

/// Derives `docrepo::model::Model` for a struct with named fields.
///
/// # Attributes
///
/// - `#[model(base)]` on the `BaseFields` field - delegates the lifecycle hooks
/// - `#[model(index(keys = "...", unique, sparse, name = "...", expire_after_secs = N))]`
///   on the struct - declares an index returned by `Model::indexes`
///
/// # Errors
///
/// Tuple structs, unit structs, enums and unions are rejected at compile time.
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as DeriveInput);

    match ast.data {
        Data::Struct(ref data) => match generate_model_for_struct(&ast, data) {
            Ok(token_stream) => token_stream,
            Err(e) => e.to_compile_error().into(),
        },
        Data::Enum(_) => {
            let error = syn::Error::new_spanned(
                &ast,
                format!(
                    "Cannot derive Model for enum '{}'. Only structs with named fields are supported.\n\
                     Example: #[derive(Model)] pub struct User {{ email: String }}",
                    ast.ident
                ),
            );
            error.to_compile_error().into()
        }
        Data::Union(_) => {
            let error = syn::Error::new_spanned(
                &ast,
                "Cannot derive Model for unions. Only structs with named fields are supported.",
            );
            error.to_compile_error().into()
        }
    }
}
