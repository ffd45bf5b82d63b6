use proc_macro::TokenStream;
use quote::quote;
use syn::{DataStruct, DeriveInput, Fields, Ident, LitInt, LitStr, Result};

struct IndexSpec {
    keys: String,
    unique: bool,
    sparse: bool,
    name: Option<String>,
    expire_after_secs: Option<u64>,
}

// Rejects key lists `IndexModel::from_key_spec` would silently misread.
fn check_key_spec(keys: &str) -> std::result::Result<(), String> {
    let parts: Vec<&str> = keys.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err("index keys must name at least one field".to_string());
    }
    for part in parts {
        let (field, direction) = match part.split_once(':') {
            Some((field, direction)) => (field.trim(), direction.trim()),
            None => (part, "1"),
        };
        if field.is_empty() {
            return Err(format!("missing field name in index key '{}'", part));
        }
        if direction.is_empty() {
            return Err(format!("missing direction in index key '{}'", part));
        }
        if let Ok(d) = direction.parse::<i32>() {
            if d != 1 && d != -1 {
                return Err(format!("index direction of '{}' must be 1 or -1", field));
            }
        }
    }
    Ok(())
}

fn parse_index(meta: syn::meta::ParseNestedMeta) -> Result<IndexSpec> {
    let mut keys: Option<String> = None;
    let mut unique = false;
    let mut sparse = false;
    let mut name: Option<String> = None;
    let mut expire_after_secs: Option<u64> = None;

    meta.parse_nested_meta(|meta| {
        if meta.path.is_ident("keys") {
            let s: LitStr = meta.value()?.parse()?;
            if let Err(msg) = check_key_spec(&s.value()) {
                return Err(syn::Error::new_spanned(&s, msg));
            }
            keys = Some(s.value());
            Ok(())
        } else if meta.path.is_ident("unique") {
            unique = true;
            Ok(())
        } else if meta.path.is_ident("sparse") {
            sparse = true;
            Ok(())
        } else if meta.path.is_ident("name") {
            let s: LitStr = meta.value()?.parse()?;
            name = Some(s.value());
            Ok(())
        } else if meta.path.is_ident("expire_after_secs") {
            let n: LitInt = meta.value()?.parse()?;
            expire_after_secs = Some(n.base10_parse()?);
            Ok(())
        } else {
            Err(meta.error("Unknown index attribute, expected keys, unique, sparse, name or expire_after_secs"))
        }
    })?;

    match keys {
        Some(keys) => Ok(IndexSpec {
            keys,
            unique,
            sparse,
            name,
            expire_after_secs,
        }),
        None => Err(meta.error("Index keys are required, e.g. index(keys = \"email:1\")")),
    }
}

pub(crate) fn generate_model_for_struct(ast: &DeriveInput, data: &DataStruct) -> Result<TokenStream> {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let fields = match &data.fields {
        Fields::Named(named) => &named.named,
        _ => {
            return Err(syn::Error::new_spanned(
                ast,
                format!(
                    "Failed to derive Model for struct '{}': only structs with named fields are supported.\n\
                     Example: #[derive(Model)] pub struct User {{ email: String }}",
                    name
                ),
            ))
        }
    };

    let mut indexes = Vec::new();
    for attr in &ast.attrs {
        if attr.path().is_ident("model") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("index") {
                    indexes.push(parse_index(meta)?);
                    Ok(())
                } else {
                    Err(meta.error("Unknown model attribute, expected index(...)"))
                }
            })?;
        }
    }

    let mut base: Option<&Ident> = None;
    for field in fields {
        for attr in &field.attrs {
            if attr.path().is_ident("model") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("base") {
                        if base.is_some() {
                            return Err(meta.error("Only one field can be marked #[model(base)]"));
                        }
                        base = field.ident.as_ref();
                        Ok(())
                    } else {
                        Err(meta.error("Unknown model field attribute, expected base"))
                    }
                })?;
            }
        }
    }

    let hooks_code = match base {
        Some(base) => quote! {
            fn set_id(&mut self, id: docrepo::bson::oid::ObjectId) {
                self.#base.set_id(id)
            }

            fn before_insert(&mut self) {
                self.#base.before_insert()
            }

            fn before_update(&mut self) {
                self.#base.before_update()
            }
        },
        None => quote! {},
    };

    let indexes_code = if indexes.is_empty() {
        quote! {}
    } else {
        let models = indexes.iter().map(|index| {
            let keys = &index.keys;
            let unique = index.unique;
            let sparse = index.sparse;
            let name_code: Option<proc_macro2::TokenStream> = index.name.as_ref().map(|n| quote! { .name(#n) });
            let ttl_code: Option<proc_macro2::TokenStream> = index
                .expire_after_secs
                .map(|secs| quote! { .expire_after(std::time::Duration::from_secs(#secs)) });
            quote! {
                docrepo::model::IndexModel::from_key_spec(#keys).with_options(
                    docrepo::model::IndexOptions::new()
                        .unique(#unique)
                        .sparse(#sparse)
                        #name_code
                        #ttl_code
                )
            }
        });
        quote! {
            fn indexes() -> Option<Vec<docrepo::model::IndexModel>> {
                Some(vec![#(#models),*])
            }
        }
    };

    let gen = quote! {
        impl #impl_generics docrepo::model::Model for #name #ty_generics #where_clause {
            #hooks_code
            #indexes_code
        }
    };

    Ok(TokenStream::from(gen))
}
