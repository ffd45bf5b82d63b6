use bson::{doc, Bson, Document};

use crate::common::{is_operator_document, SET_OPERATOR};
use crate::errors::{ErrorKind, RepoError, RepoResult};
use crate::model::Model;

/// Update argument accepted by the repository's update operations.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::repository::Update;
///
/// // operator document, sent as is
/// repo.update_one(&ctx, filter.clone(), Update::from(doc! { "$inc": { "visits": 1 } }), None)?;
/// // typed value, hooked and wrapped in $set
/// repo.update_one(&ctx, filter, Update::Model(user), None)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    /// An untyped operator document, passed through unchanged. A document
    /// without any `$` key is rejected.
    Document(Document),
    /// A typed value. Its `before_update` hook runs before it is wrapped in `$set`.
    Model(T),
    /// Any other value. Only an operator document value is usable.
    Value(Bson),
}

impl<T> From<Document> for Update<T> {
    fn from(document: Document) -> Self {
        Update::Document(document)
    }
}

impl<T> From<Bson> for Update<T> {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Document(document) => Update::Document(document),
            other => Update::Value(other),
        }
    }
}

/// A classified update, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateShape {
    /// Operator document, forwarded unmodified.
    Operator(Document),
    /// Serialized typed value, already wrapped as `{ $set: fields }`.
    Plain(Document),
}

impl UpdateShape {
    pub fn document(&self) -> &Document {
        match self {
            UpdateShape::Operator(document) | UpdateShape::Plain(document) => document,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            UpdateShape::Operator(document) | UpdateShape::Plain(document) => document,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, UpdateShape::Operator(_))
    }
}

/// Decides how an update argument is sent to the store.
///
/// * a document with at least one `$`-prefixed key is an operator update and
///   is returned untouched
/// * a typed value gets its `before_update` hook exactly once, is validated,
///   serialized and wrapped as `{ $set: value }`; a value that serializes to
///   an operator document is forwarded as an operator update instead
///
/// Everything else fails with [`ErrorKind::ValidationError`]. Nothing here
/// talks to the store.
pub fn classify_update<T: Model>(update: Update<T>) -> RepoResult<UpdateShape> {
    match update {
        Update::Document(document) => classify_document(document),
        Update::Model(mut value) => {
            value.before_update();
            value.validate()?;
            match bson::to_bson(&value) {
                Ok(Bson::Document(document)) if is_operator_document(&document) => {
                    Ok(UpdateShape::Operator(document))
                }
                Ok(Bson::Document(document)) if !document.is_empty() => {
                    Ok(UpdateShape::Plain(doc! { SET_OPERATOR: document }))
                }
                Ok(_) => Err(unsupported(std::any::type_name::<T>())),
                Err(err) => Err(RepoError::from_source(
                    &format!("unsupported update type: {}", std::any::type_name::<T>()),
                    ErrorKind::ValidationError,
                    err,
                )),
            }
        }
        Update::Value(Bson::Document(document)) => classify_document(document),
        Update::Value(other) => Err(unsupported(&format!("{:?}", other.element_type()))),
    }
}

fn classify_document(document: Document) -> RepoResult<UpdateShape> {
    if document.is_empty() {
        return Err(unsupported("empty document"));
    }
    if !is_operator_document(&document) {
        return Err(unsupported("document without update operators"));
    }
    Ok(UpdateShape::Operator(document))
}

fn unsupported(what: &str) -> RepoError {
    RepoError::new(&format!("unsupported update type: {}", what), ErrorKind::ValidationError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BaseFields;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Article {
        #[serde(flatten)]
        base: BaseFields,
        title: String,
    }

    impl Model for Article {
        fn before_update(&mut self) {
            HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
            self.base.before_update();
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Scalar(i32);

    impl Model for Scalar {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Checked {
        title: String,
    }

    impl Model for Checked {
        fn validate(&self) -> RepoResult<()> {
            if self.title.is_empty() {
                return Err(RepoError::new("title is required", ErrorKind::ValidationError));
            }
            Ok(())
        }
    }

    #[test]
    fn test_operator_document_passes_through() {
        let update = doc! { "$set": { "a": 1 }, "$inc": { "n": 2 } };
        let shape = classify_update::<Document>(Update::Document(update.clone())).unwrap();
        assert!(shape.is_operator());
        assert_eq!(shape.into_document(), update);
    }

    #[test]
    fn test_document_without_operators_is_unsupported() {
        let err = classify_update::<Document>(doc! { "age": 99 }.into()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert_eq!(err.message(), "unsupported update type: document without update operators");

        let err = classify_update::<Document>(Update::Value(Bson::Document(doc! { "age": 99 }))).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_document_model_with_operators_is_not_wrapped() {
        let update = doc! { "$inc": { "n": 1 } };
        let shape = classify_update(Update::Model(update.clone())).unwrap();
        assert!(shape.is_operator());
        assert_eq!(shape.into_document(), update);
    }

    #[test]
    fn test_document_model_without_operators_is_wrapped() {
        let shape = classify_update(Update::Model(doc! { "a": 1 })).unwrap();
        assert_eq!(shape.document(), &doc! { "$set": { "a": 1 } });
    }

    #[test]
    fn test_model_runs_hook_once_and_is_wrapped() {
        let before = HOOK_CALLS.load(Ordering::SeqCst);
        let article = Article {
            base: BaseFields::new(),
            title: "hello".to_string(),
        };
        let shape = classify_update(Update::Model(article)).unwrap();
        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst) - before, 1);
        let set = shape.document().get_document("$set").unwrap();
        assert_eq!(set.get_str("title").unwrap(), "hello");
        assert!(set.get_datetime("updatedAt").is_ok());
        assert!(!set.contains_key("_id"));
    }

    #[test]
    fn test_model_not_serializing_to_document_is_unsupported() {
        let err = classify_update(Update::Model(Scalar(3))).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(err.message().starts_with("unsupported update type: "));
    }

    #[test]
    fn test_scalar_value_is_unsupported() {
        let err = classify_update::<Document>(Bson::String("x".to_string()).into()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(err.message().contains("String"));
    }

    #[test]
    fn test_document_value_is_classified_like_a_document() {
        let shape = classify_update::<Document>(Update::Value(Bson::Document(doc! { "$unset": { "a": "" } }))).unwrap();
        assert!(shape.is_operator());
    }

    #[test]
    fn test_empty_document_is_unsupported() {
        let err = classify_update::<Document>(Update::Document(doc! {})).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert_eq!(err.message(), "unsupported update type: empty document");
    }

    #[test]
    fn test_validate_rejects_model() {
        let err = classify_update(Update::Model(Checked { title: String::new() })).unwrap_err();
        assert_eq!(err.message(), "title is required");
    }
}
