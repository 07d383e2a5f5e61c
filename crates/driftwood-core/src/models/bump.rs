use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An event that resurfaces a thread in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BumpType {
    Reaction,
    Invite,
    Reply,
    Updated,
    Mention,
    ChannelMention,
    Attending,
    MatchesChannel,
    /// Synthetic root bump attached to freshly self-published roots.
    Post,
    // low-salience kinds the grouping stage folds into summaries
    Follow,
    Subscribe,
    About,
}

impl BumpType {
    /// Bump kinds honored when falling back to the root-level bump while
    /// picking the most recent bump type for an item.
    pub fn is_root_bump(self) -> bool {
        matches!(self, BumpType::Mention | BumpType::ChannelMention | BumpType::Invite)
    }

    /// Low-signal kinds that are candidates for group summaries.
    pub fn is_low_salience(self) -> bool {
        matches!(self, BumpType::Follow | BumpType::Subscribe | BumpType::About)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bump {
    #[serde(rename = "type")]
    pub bump_type: BumpType,
    /// Id of the message that caused the bump.
    pub id: String,
    pub author: String,
    /// Channels involved, for channel-mention / matches-channel bumps.
    #[serde(default)]
    pub channels: BTreeSet<String>,
}

impl Bump {
    pub fn new(bump_type: BumpType, id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            bump_type,
            id: id.into(),
            author: author.into(),
            channels: BTreeSet::new(),
        }
    }
}
