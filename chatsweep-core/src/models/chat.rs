use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat document as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatRecord {
    pub fn new(
        id: impl Into<String>,
        participants: Vec<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            participants,
            created_at,
        }
    }

    pub fn is_two_party(&self) -> bool {
        self.participants.len() == 2
    }
}
