use serde::{Deserialize, Serialize};

use super::message::MessageRef;

/// A reverse reference: some message (`source`) referenced `subject_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklinkEntry {
    /// Id of the referencing message; identity of the entry.
    pub id: String,
    /// The message being referenced (the "dest" of the underlying query).
    pub subject_id: String,
    /// Reduced reference to the referencing message.
    pub source: MessageRef,
    /// Author-asserted timestamp; orders the collection, tie-broken by
    /// reply adjacency and insertion stability.
    pub asserted_timestamp: u64,
}

impl BacklinkEntry {
    /// Whether this entry is a direct reply to `other` (its branch list
    /// names the other entry's message).
    pub fn is_reply_to(&self, other: &BacklinkEntry) -> bool {
        self.source.branches_include(&other.id)
    }
}
