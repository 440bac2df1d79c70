//! Order-independent key for a two-party conversation.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::models::ChatRecord;

/// Separator used when a key is rendered as a single string (`"alice_bob"`).
pub const PAIR_SEPARATOR: &str = "_";

/// The two participants of a chat, sorted lexicographically.
///
/// Grouping compares the two halves separately, so ids that contain the
/// separator never collide with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantPairKey {
    first: String,
    second: String,
}

impl ParticipantPairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    /// Key for a record, or `None` unless it has exactly two participants.
    pub fn for_record(record: &ChatRecord) -> Option<Self> {
        match record.participants.as_slice() {
            [a, b] => Some(Self::new(a, b)),
            _ => None,
        }
    }
}

impl fmt::Display for ParticipantPairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.first, PAIR_SEPARATOR, self.second)
    }
}

impl Serialize for ParticipantPairKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
