use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Collection, ObjectStore, StoreError, StoreOp, document_id, ensure_id, merge_fields};

/// A one-shot failure armed on a [`MemoryStore`].
///
/// The fault matches calls by operation and collection (and optionally by
/// document id), lets `skip` matching calls through, then fails the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub op: StoreOp,
    pub collection: Collection,
    pub id: Option<String>,
    pub skip: usize,
}

impl Fault {
    pub fn on(op: StoreOp, collection: Collection) -> Self {
        Self {
            op,
            collection,
            id: None,
            skip: 0,
        }
    }

    pub fn for_id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Let `calls` matching calls succeed before failing.
    pub fn after(mut self, calls: usize) -> Self {
        self.skip = calls;
        self
    }

    fn matches(&self, op: StoreOp, collection: Collection, id: Option<&str>) -> bool {
        self.op == op
            && self.collection == collection
            && match (&self.id, id) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

#[derive(Debug, Default)]
struct MemoryData {
    collections: HashMap<Collection, Vec<Value>>,
    faults: Vec<Fault>,
    offline: bool,
    calls: Vec<(StoreOp, Collection)>,
}

impl MemoryData {
    /// Consume a matching fault, if one is due. Returns the error to surface.
    fn check(
        &mut self,
        op: StoreOp,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.calls.push((op, collection));
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }

        let Some(index) = self
            .faults
            .iter()
            .position(|fault| fault.matches(op, collection, id))
        else {
            return Ok(());
        };

        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return Ok(());
        }

        self.faults.remove(index);
        Err(StoreError::Unavailable(format!(
            "injected failure on {} {}",
            op.as_str(),
            collection
        )))
    }

    fn documents(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.collections.entry(collection).or_default()
    }

    fn position(&mut self, collection: Collection, id: &str) -> Result<usize, StoreError> {
        self.documents(collection)
            .iter()
            .position(|doc| document_id(doc) == Some(id))
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
    }
}

/// In-process object store. Keeps insertion order and supports fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure.
    pub fn inject(&self, fault: Fault) {
        self.inner.lock().faults.push(fault);
    }

    /// Drop every armed fault that has not fired yet.
    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Raw view of a collection, bypassing faults.
    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.inner
            .lock()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls made against `collection` with `op`, failed ones included.
    pub fn call_count(&self, op: StoreOp, collection: Collection) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(o, c)| *o == op && *c == collection)
            .count()
    }

    /// Number of write calls (create, replace, patch, delete) made so far.
    pub fn write_count(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op != StoreOp::List)
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(
        &self,
        collection: Collection,
        mut document: Value,
    ) -> Result<Value, StoreError> {
        let mut data = self.inner.lock();
        data.check(StoreOp::Create, collection, document_id(&document))?;

        let id = ensure_id(&mut document)?;
        if data.position(collection, &id).is_ok() {
            return Err(StoreError::Conflict { collection, id });
        }
        data.documents(collection).push(document.clone());
        Ok(document)
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        mut document: Value,
    ) -> Result<Value, StoreError> {
        let mut data = self.inner.lock();
        data.check(StoreOp::Replace, collection, Some(id))?;

        let index = data.position(collection, id)?;
        if let Some(object) = document.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.to_string()));
        }
        data.documents(collection)[index] = document.clone();
        Ok(document)
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Value,
    ) -> Result<Value, StoreError> {
        let mut data = self.inner.lock();
        data.check(StoreOp::Patch, collection, Some(id))?;

        let index = data.position(collection, id)?;
        let mut updated = data.documents(collection)[index].clone();
        merge_fields(&mut updated, fields)?;
        data.documents(collection)[index] = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut data = self.inner.lock();
        data.check(StoreOp::Delete, collection, Some(id))?;

        let index = data.position(collection, id)?;
        data.documents(collection).remove(index);
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let mut data = self.inner.lock();
        data.check(StoreOp::List, collection, None)?;
        Ok(data.documents(collection).clone())
    }
}
