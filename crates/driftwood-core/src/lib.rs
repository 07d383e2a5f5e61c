pub mod backlinks;
pub mod capabilities;
pub mod clock;
pub mod collection;
pub mod error;
pub mod models;
pub mod observable;
pub mod progress;
pub mod rollup;
pub mod signal;
pub mod stream;

// Re-export the engine surface at the crate root for convenience
pub use backlinks::{BacklinkCache, CacheOptions};
pub use capabilities::{
    BacklinkSource, FeedRenderer, FeedSource, ResumeOptions, SharedBacklinkSource,
    SharedFeedSource,
};
pub use clock::{Scheduler, TimerHandle};
pub use collection::{CollectionState, PullCollection};
pub use error::StreamError;
pub use observable::{once_true, Subscription, Value};
pub use progress::{ProgressNotifier, ProgressOptions};
pub use rollup::{ContentPatch, FeedEntry, FeedRollup, RollupOptions, RollupState};
pub use stream::{AbortHandle, GatedSink, ItemSink, SharedSink};
