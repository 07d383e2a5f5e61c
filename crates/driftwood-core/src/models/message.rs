use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Reduced reference to a log message. Immutable once constructed; identity
/// is `id`. Only the structural fields (author, root, branches, timestamps)
/// are retained long-term so cached references stay small — full content is
/// never held by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub author_id: String,
    /// Thread root this message replies under; `None` for a thread root.
    #[serde(default)]
    pub root_id: Option<String>,
    /// Direct parents within the thread (most recent last).
    #[serde(default)]
    pub branch_ids: Vec<String>,
    /// Timestamp asserted by the author. Subject to clock skew.
    pub timestamp_claimed: u64,
    /// Timestamp at which the local log received the message.
    pub timestamp_received: u64,
}

impl MessageRef {
    pub fn is_root(&self) -> bool {
        self.root_id.is_none()
    }

    pub fn branches_include(&self, id: &str) -> bool {
        self.branch_ids.iter().any(|b| b == id)
    }

    /// Parse a raw log-database value of the shape
    /// `{ "key", "timestamp", "value": { "author", "timestamp", "content": { "root", "branch" } } }`.
    ///
    /// Tolerant the way real feeds require: `branch` may be a single string
    /// or an array, `root`/`branch` may be absent, and a missing received
    /// timestamp falls back to the claimed one. Returns `None` when the
    /// structural fields are unusable.
    pub fn from_json(raw: &Json) -> Option<Self> {
        let id = raw.get("key")?.as_str()?.to_string();
        let value = raw.get("value")?;
        let author_id = value.get("author")?.as_str()?.to_string();
        let timestamp_claimed = value.get("timestamp").and_then(Json::as_u64).unwrap_or(0);
        let timestamp_received = raw
            .get("timestamp")
            .and_then(Json::as_u64)
            .unwrap_or(timestamp_claimed);

        let content = value.get("content");
        let root_id = content
            .and_then(|c| c.get("root"))
            .and_then(Json::as_str)
            .map(str::to_string);
        let branch_ids = match content.and_then(|c| c.get("branch")) {
            Some(Json::String(s)) => vec![s.clone()],
            Some(Json::Array(items)) => items
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            id,
            author_id,
            root_id,
            branch_ids,
            timestamp_claimed,
            timestamp_received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_full_shape() {
        let raw = json!({
            "key": "%msg1",
            "timestamp": 2000,
            "value": {
                "author": "@alice",
                "timestamp": 1500,
                "content": {
                    "root": "%root",
                    "branch": ["%a", "%b"]
                }
            }
        });
        let msg = MessageRef::from_json(&raw).unwrap();
        assert_eq!(msg.id, "%msg1");
        assert_eq!(msg.author_id, "@alice");
        assert_eq!(msg.root_id.as_deref(), Some("%root"));
        assert_eq!(msg.branch_ids, vec!["%a", "%b"]);
        assert_eq!(msg.timestamp_claimed, 1500);
        assert_eq!(msg.timestamp_received, 2000);
        assert!(!msg.is_root());
    }

    #[test]
    fn test_from_json_branch_as_single_string() {
        let raw = json!({
            "key": "%msg2",
            "value": {
                "author": "@bob",
                "timestamp": 99,
                "content": { "root": "%root", "branch": "%a" }
            }
        });
        let msg = MessageRef::from_json(&raw).unwrap();
        assert_eq!(msg.branch_ids, vec!["%a"]);
        // missing received timestamp falls back to claimed
        assert_eq!(msg.timestamp_received, 99);
    }

    #[test]
    fn test_from_json_root_message() {
        let raw = json!({
            "key": "%msg3",
            "value": { "author": "@carol", "timestamp": 5, "content": { "type": "post" } }
        });
        let msg = MessageRef::from_json(&raw).unwrap();
        assert!(msg.is_root());
        assert!(msg.branch_ids.is_empty());
    }

    #[test]
    fn test_from_json_rejects_missing_structure() {
        assert!(MessageRef::from_json(&json!({ "value": {} })).is_none());
        assert!(MessageRef::from_json(&json!({ "key": "%x" })).is_none());
        assert!(MessageRef::from_json(&json!({ "key": "%x", "value": { "timestamp": 1 } })).is_none());
    }
}
