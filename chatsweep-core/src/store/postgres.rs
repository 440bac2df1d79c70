//! Postgres backend over a chats table:
//!
//! ```sql
//! CREATE TABLE chats (
//!     id           TEXT PRIMARY KEY,
//!     participants TEXT[],
//!     created_at   TIMESTAMPTZ
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{ChatStore, StoreError};
use crate::config::PostgresConfig;
use crate::models::ChatRecord;

pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

#[derive(Debug, Clone)]
pub struct PostgresChatStore {
    pool: PgPool,
    table: String,
}

impl PostgresChatStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        if config.url.is_empty() {
            return Err(StoreError::InvalidConfig(
                "postgres.url is required".to_string(),
            ));
        }
        validate_table_name(&config.table)?;

        let pool = create_pool(config).await?;
        Self::new(pool, &config.table)
    }

    pub fn new(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn fetch_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let sql = format!("SELECT id, participants, created_at FROM {}", self.table);
        let rows = sqlx::query_as::<
            _,
            (String, Option<Vec<Option<String>>>, Option<DateTime<Utc>>),
        >(&sql)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, participants, created_at)| {
                let participants = participants_from_column(participants);
                if participants.is_empty() {
                    tracing::debug!(id = %id, "Chat row has NULL or empty participants");
                }
                ChatRecord {
                    id,
                    participants,
                    created_at,
                }
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            tracing::debug!(id = id, table = %self.table, "Chat already absent");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// A NULL array, or an array with any NULL element, becomes an empty
/// participant list so the row is skipped rather than failing the scan.
fn participants_from_column(column: Option<Vec<Option<String>>>) -> Vec<String> {
    column
        .and_then(|values| values.into_iter().collect::<Option<Vec<String>>>())
        .unwrap_or_default()
}

/// Table names are interpolated into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let valid = !table.is_empty()
        && table.split('.').count() <= 2
        && table.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!(
            "postgres.table {table:?} is not a plain identifier"
        )))
    }
}
