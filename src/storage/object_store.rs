//! Generic per-collection document store the engine writes through.
//!
//! No operation spans more than one document, and there is no batch or
//! transactional endpoint: every call succeeds or fails on its own.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// The three collections the engine keeps consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Accounts,
    Transactions,
    Transfers,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Transactions => "transactions",
            Collection::Transfers => "transfers",
        }
    }

    pub fn all() -> [Collection; 3] {
        [
            Collection::Accounts,
            Collection::Transactions,
            Collection::Transfers,
        ]
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Write/read operations a store exposes. Used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Replace,
    Patch,
    Delete,
    List,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Create => "create",
            StoreOp::Replace => "replace",
            StoreOp::Patch => "patch",
            StoreOp::Delete => "delete",
            StoreOp::List => "list",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Document {id} not found in {collection}")]
    NotFound { collection: Collection, id: String },

    #[error("Document {id} already exists in {collection}")]
    Conflict { collection: Collection, id: String },

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Document store addressed by collection and opaque string id.
///
/// Documents are JSON objects carrying their id in the `id` field. `create`
/// assigns one when it is missing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Insert a new document and return it as stored.
    async fn create(&self, collection: Collection, document: Value) -> Result<Value, StoreError>;

    /// Replace an existing document wholesale.
    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        document: Value,
    ) -> Result<Value, StoreError>;

    /// Merge `fields` into an existing document and return the result.
    async fn patch(&self, collection: Collection, id: &str, fields: Value)
    -> Result<Value, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// All documents of a collection, in insertion order.
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;
}

/// Serialize a record into a store document.
pub fn to_document<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(record)?)
}

/// Deserialize a store document into a record.
pub fn from_document<T: DeserializeOwned>(document: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(document)?)
}

/// Read the `id` field of a document, if it has a string one.
pub fn document_id(document: &Value) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}

/// Shallow-merge the fields of `patch` into `target`. Both must be objects.
pub fn merge_fields(target: &mut Value, patch: Value) -> Result<(), StoreError> {
    let patch: Map<String, Value> = match patch {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "patch must be a JSON object, got {}",
                other
            )));
        }
    };
    let target = target
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("stored document is not a JSON object"))?;
    for (key, value) in patch {
        if key != "id" {
            target.insert(key, value);
        }
    }
    Ok(())
}

/// Make sure `document` is an object with a string id, assigning a fresh one if absent.
pub fn ensure_id(document: &mut Value) -> Result<String, StoreError> {
    let object = document
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("document must be a JSON object"))?;
    match object.get("id").and_then(Value::as_str) {
        Some(id) => Ok(id.to_string()),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            object.insert("id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}
