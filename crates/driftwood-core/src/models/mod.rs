pub mod backlink;
pub mod bump;
pub mod feed;
pub mod message;
pub mod progress;

pub use backlink::BacklinkEntry;
pub use bump::{Bump, BumpType};
pub use feed::{FeedItem, FeedReason, RenderOptions, ThreadRoot};
pub use message::MessageRef;
pub use progress::{ProgressSample, ReplicationSample};
