use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::bump::{Bump, BumpType};
use super::message::MessageRef;

/// A thread root as delivered by the feed query: the root message plus a
/// summary of its reply activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRoot {
    pub message: MessageRef,
    /// The newest replies, oldest first, capped by the query.
    #[serde(default)]
    pub latest_replies: Vec<MessageRef>,
    #[serde(default)]
    pub total_replies: usize,
    /// Bumps newest first.
    #[serde(default)]
    pub bumps: Vec<Bump>,
    /// Bump attached to the root itself (mention, channel match, ...).
    #[serde(default)]
    pub root_bump: Option<Bump>,
}

impl ThreadRoot {
    pub fn key(&self) -> &str {
        &self.message.id
    }

    /// The bump type that decides how the item is presented: the newest bump
    /// wins; otherwise a recognized root-level bump; otherwise a plain reply.
    pub fn most_recent_bump_type(&self) -> BumpType {
        if let Some(bump) = self.bumps.first() {
            return bump.bump_type;
        }
        match &self.root_bump {
            Some(root) if root.bump_type.is_root_bump() => root.bump_type,
            _ => BumpType::Reply,
        }
    }

    /// Whether the item is a low-signal event (follow, subscribe, about).
    /// The newest bump decides; an item with no bumps at all falls back to
    /// its root bump, so a bare follow notification still counts.
    pub fn is_low_salience(&self) -> bool {
        if let Some(bump) = self.bumps.first() {
            return bump.bump_type.is_low_salience();
        }
        self.root_bump
            .as_ref()
            .map_or(false, |b| b.bump_type.is_low_salience())
    }

    /// All bumps of the given type, root bump included under its own type.
    pub fn bumps_of(&self, bump_type: BumpType) -> Vec<&Bump> {
        let mut out = Vec::new();
        if let Some(root) = &self.root_bump {
            if root.bump_type == bump_type {
                out.push(root);
            }
        }
        out.extend(self.bumps.iter().filter(|b| b.bump_type == bump_type));
        out
    }
}

/// One element of the rollup sequence: a single thread root, or a synthetic
/// group of consecutive low-salience roots produced by the grouping stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Root(ThreadRoot),
    Group(Vec<ThreadRoot>),
}

impl FeedItem {
    /// Message ids covered by this item — the root plus its visible replies,
    /// or every member of a group. Drives unread clearing on visibility.
    pub fn msg_ids(&self) -> Vec<String> {
        match self {
            FeedItem::Root(root) => {
                let mut ids = vec![root.message.id.clone()];
                ids.extend(root.latest_replies.iter().map(|m| m.id.clone()));
                ids
            }
            FeedItem::Group(members) => members.iter().map(|m| m.message.id.clone()).collect(),
        }
    }
}

/// Structured "why is this in your feed" annotation. The renderer owns the
/// wording; the core only aggregates who and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedReason {
    /// The root post is in a channel the viewer subscribes to.
    RootMatchesChannel { channels: BTreeSet<String> },
    /// Replies to this post match subscribed channels.
    RepliesMatchChannel {
        author_count: usize,
        channels: BTreeSet<String>,
    },
    /// People acted on the thread; `bump_type` says how.
    Activity {
        bump_type: BumpType,
        authors: Vec<String>,
    },
}

/// Per-item rendering instructions handed to the external render capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderOptions {
    pub compact: bool,
    /// 2 newly highlighted, 1 unread, 0 read.
    pub priority: u8,
    /// Root id when the rendered message forked off another thread.
    pub forked_from: Option<String>,
    pub reason: Option<FeedReason>,
    /// Ids of highlighted replies, for in-thread unread markers.
    pub unread_bumps: Vec<String>,
    /// Reply id to scroll to when unread replies are not among the visible
    /// latest replies.
    pub anchor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> MessageRef {
        MessageRef {
            id: id.to_string(),
            author_id: "@a".to_string(),
            root_id: None,
            branch_ids: Vec::new(),
            timestamp_claimed: 0,
            timestamp_received: 0,
        }
    }

    fn root_with(bumps: Vec<Bump>, root_bump: Option<Bump>) -> ThreadRoot {
        ThreadRoot {
            message: msg("%root"),
            latest_replies: Vec::new(),
            total_replies: 0,
            bumps,
            root_bump,
        }
    }

    #[test]
    fn test_most_recent_bump_type_prefers_newest_bump() {
        let root = root_with(
            vec![
                Bump::new(BumpType::Reaction, "%b1", "@x"),
                Bump::new(BumpType::Reply, "%b2", "@y"),
            ],
            Some(Bump::new(BumpType::Mention, "%root", "@z")),
        );
        assert_eq!(root.most_recent_bump_type(), BumpType::Reaction);
    }

    #[test]
    fn test_most_recent_bump_type_root_fallback() {
        let root = root_with(Vec::new(), Some(Bump::new(BumpType::Mention, "%root", "@z")));
        assert_eq!(root.most_recent_bump_type(), BumpType::Mention);

        // unrecognized root bump types fall through to reply
        let root = root_with(Vec::new(), Some(Bump::new(BumpType::Reaction, "%root", "@z")));
        assert_eq!(root.most_recent_bump_type(), BumpType::Reply);

        let root = root_with(Vec::new(), None);
        assert_eq!(root.most_recent_bump_type(), BumpType::Reply);
    }

    #[test]
    fn test_is_low_salience_sees_bare_root_bumps() {
        let follow = root_with(Vec::new(), Some(Bump::new(BumpType::Follow, "%root", "@z")));
        assert!(follow.is_low_salience());

        let mention = root_with(Vec::new(), Some(Bump::new(BumpType::Mention, "%root", "@z")));
        assert!(!mention.is_low_salience());

        // conversation activity outranks a low-salience root
        let active = root_with(
            vec![Bump::new(BumpType::Reply, "%b1", "@x")],
            Some(Bump::new(BumpType::Follow, "%root", "@z")),
        );
        assert!(!active.is_low_salience());

        let about = root_with(vec![Bump::new(BumpType::About, "%b1", "@x")], None);
        assert!(about.is_low_salience());
    }

    #[test]
    fn test_bumps_of_includes_root_bump() {
        let root = root_with(
            vec![Bump::new(BumpType::Mention, "%b1", "@x")],
            Some(Bump::new(BumpType::Mention, "%root", "@z")),
        );
        let mentions = root.bumps_of(BumpType::Mention);
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].id, "%root");
        assert_eq!(mentions[1].id, "%b1");
    }

    #[test]
    fn test_msg_ids_cover_replies_and_groups() {
        let mut root = root_with(Vec::new(), None);
        root.latest_replies = vec![msg("%r1"), msg("%r2")];
        assert_eq!(
            FeedItem::Root(root.clone()).msg_ids(),
            vec!["%root", "%r1", "%r2"]
        );

        let group = FeedItem::Group(vec![root_with(Vec::new(), None)]);
        assert_eq!(group.msg_ids(), vec!["%root"]);
    }
}
