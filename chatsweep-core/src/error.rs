use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Failed to fetch chat records: {0}")]
    Fetch(#[source] StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
