use bson::Document;

use crate::errors::RepoResult;
use crate::model::Model;

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: Option<bool>,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: Option<bool>,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: Option<bool>,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

impl WriteModel {
    pub fn insert_one(document: Document) -> WriteModel {
        WriteModel::InsertOne { document }
    }

    /// Builds an insert from a typed value, running its insert hook first.
    pub fn insert_model<T: Model>(mut value: T) -> RepoResult<WriteModel> {
        value.before_insert();
        value.validate()?;
        Ok(WriteModel::InsertOne {
            document: bson::to_document(&value)?,
        })
    }

    pub fn update_one(filter: Document, update: Document) -> WriteModel {
        WriteModel::UpdateOne {
            filter,
            update,
            upsert: None,
        }
    }

    pub fn update_many(filter: Document, update: Document) -> WriteModel {
        WriteModel::UpdateMany {
            filter,
            update,
            upsert: None,
        }
    }

    pub fn replace_one(filter: Document, replacement: Document) -> WriteModel {
        WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert: None,
        }
    }

    pub fn delete_one(filter: Document) -> WriteModel {
        WriteModel::DeleteOne { filter }
    }

    pub fn delete_many(filter: Document) -> WriteModel {
        WriteModel::DeleteMany { filter }
    }

    /// Sets the upsert flag of update and replace operations; no-op otherwise.
    pub fn with_upsert(mut self, value: bool) -> Self {
        match &mut self {
            WriteModel::UpdateOne { upsert, .. }
            | WriteModel::UpdateMany { upsert, .. }
            | WriteModel::ReplaceOne { upsert, .. } => *upsert = Some(value),
            _ => {}
        }
        self
    }

    pub fn operation_name(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insertOne",
            WriteModel::UpdateOne { .. } => "updateOne",
            WriteModel::UpdateMany { .. } => "updateMany",
            WriteModel::ReplaceOne { .. } => "replaceOne",
            WriteModel::DeleteOne { .. } => "deleteOne",
            WriteModel::DeleteMany { .. } => "deleteMany",
        }
    }
}
