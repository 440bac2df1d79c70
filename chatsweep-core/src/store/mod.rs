//! Chat record stores.
//!
//! The resolver only needs two operations from a store: read every chat
//! record, and delete one record by id. Implementations:
//! - **Firestore** — the Firestore REST API (or its emulator)
//! - **Postgres** — a `chats` table with a `TEXT[]` participants column
//! - **Memory** — an in-process store with injectable failures, for tests

pub mod firestore;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StoreBackend, SweepConfig};
use crate::models::ChatRecord;

pub use firestore::FirestoreChatStore;
pub use memory::MemoryChatStore;
pub use postgres::PostgresChatStore;

/// Read-all / delete-one access to a chat collection.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Every record in the collection. Paging, if any, is handled internally.
    async fn fetch_all(&self) -> Result<Vec<ChatRecord>, StoreError>;

    /// Delete a single record. Deleting an id that no longer exists succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("Invalid store config: {0}")]
    InvalidConfig(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors worth another attempt: transport failures, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(_) => true,
            StoreError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Build the store named by `store.backend`.
pub async fn create_store(config: &SweepConfig) -> Result<Arc<dyn ChatStore>, StoreError> {
    match config.store.backend {
        StoreBackend::Firestore => Ok(Arc::new(FirestoreChatStore::new(
            config.firestore.clone(),
        )?)),
        StoreBackend::Postgres => Ok(Arc::new(
            PostgresChatStore::connect(&config.postgres).await?,
        )),
    }
}
