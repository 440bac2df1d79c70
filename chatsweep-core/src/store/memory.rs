use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ChatStore, StoreError};
use crate::models::ChatRecord;

/// In-process store. Fetch order is insertion order.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    records: Mutex<Vec<ChatRecord>>,
    failing_deletes: Mutex<HashSet<String>>,
    fetch_failure: Mutex<Option<String>>,
    delete_attempts: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryChatStore {
    pub fn new(records: Vec<ChatRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Append a record, assigning a fresh id if it has none. Returns the id.
    pub fn insert(&self, mut record: ChatRecord) -> String {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        let id = record.id.clone();
        lock(&self.records).push(record);
        id
    }

    /// Make every subsequent `fetch_all` fail with `message`.
    pub fn fail_fetch(&self, message: impl Into<String>) {
        *lock(&self.fetch_failure) = Some(message.into());
    }

    /// Make deletes of `id` fail until cleared.
    pub fn fail_delete(&self, id: impl Into<String>) {
        lock(&self.failing_deletes).insert(id.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_deletes).clear();
        *lock(&self.fetch_failure) = None;
    }

    pub fn records(&self) -> Vec<ChatRecord> {
        lock(&self.records).clone()
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.records).iter().map(|r| r.id.clone()).collect()
    }

    /// Every id passed to `delete`, successful or not, in call order.
    pub fn delete_attempts(&self) -> Vec<String> {
        lock(&self.delete_attempts).clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn fetch_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        if let Some(message) = lock(&self.fetch_failure).clone() {
            return Err(StoreError::Unavailable(message));
        }
        Ok(self.records())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        lock(&self.delete_attempts).push(id.to_string());

        if lock(&self.failing_deletes).contains(id) {
            return Err(StoreError::Unavailable(format!("delete of {id} rejected")));
        }

        lock(&self.records).retain(|r| r.id != id);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
