//! External capabilities the core consumes.
//!
//! Everything outside the engine — the log database, live subscriptions, and
//! markup rendering — is reached through these traits. The core only
//! sequences calls against them; it never inspects message content or builds
//! markup itself. Implementations push into the provided sink over time and
//! honor the abort flag cooperatively.

use std::rc::Rc;

use crate::models::{BacklinkEntry, MessageRef, RenderOptions, ThreadRoot};
use crate::stream::{AbortHandle, SharedSink};

/// Resume/pagination parameters for historical queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    /// Maximum items to deliver before `done`; `None` for unbounded.
    pub limit: Option<usize>,
    /// Deliver only items after this timestamp — the resume cursor of a
    /// previously torn-down stream.
    pub since: Option<u64>,
}

/// Source of feed items and live message updates.
pub trait FeedSource {
    /// Open the primary reverse-chronological stream of thread roots.
    fn open_item_stream(
        &self,
        resume: ResumeOptions,
        sink: SharedSink<ThreadRoot>,
        abort: AbortHandle,
    );

    /// Open the long-lived tail of newly-arrived messages. Independent of
    /// pagination and of `refresh()` generations.
    fn open_live_update_stream(&self, sink: SharedSink<MessageRef>, abort: AbortHandle);
}

/// Source of backlink queries and the connection-gated live subscription
/// channel.
pub trait BacklinkSource {
    /// One-shot historical query for entries referencing `subject_id`,
    /// ordered by asserted timestamp.
    fn open_backlink_query(
        &self,
        subject_id: &str,
        sink: SharedSink<BacklinkEntry>,
        abort: AbortHandle,
    );

    /// Global fan-in of live backlink updates across all subscribed subjects.
    fn open_live_backlink_stream(&self, sink: SharedSink<BacklinkEntry>, abort: AbortHandle);

    /// Historical + live stream of plain references to `subject_id`.
    fn open_reference_stream(
        &self,
        subject_id: &str,
        resume: ResumeOptions,
        sink: SharedSink<BacklinkEntry>,
        abort: AbortHandle,
    );

    /// Historical + live stream of forks of `subject_id`.
    fn open_fork_stream(
        &self,
        subject_id: &str,
        resume: ResumeOptions,
        sink: SharedSink<BacklinkEntry>,
        abort: AbortHandle,
    );

    /// Register interest in live updates for a subject. Callers gate this on
    /// an established connection.
    fn subscribe(&self, subject_id: &str);

    fn unsubscribe(&self, subject_id: &str);
}

/// Opaque markup rendering. `Node` is whatever the host UI builds — the core
/// stores and sequences nodes without looking inside.
pub trait FeedRenderer {
    type Node;

    /// Whether the message has a renderable content type.
    fn can_render(&self, message: &MessageRef) -> bool;

    /// Whether the thread root of a non-root message is renderable. Hosts
    /// resolve the root themselves; the default assumes it is.
    fn can_render_root(&self, _message: &MessageRef) -> bool {
        true
    }

    /// Whether the item is low-salience enough to fold into a group summary.
    /// Most renderers delegate to [`ThreadRoot::is_low_salience`], which also
    /// recognizes bare follow/subscribe/about root bumps.
    fn is_groupable(&self, item: &ThreadRoot) -> bool;

    /// Render a thread-root item. `None` drops the item silently.
    fn render_item(&self, item: &ThreadRoot, opts: &RenderOptions) -> Option<Self::Node>;

    /// Render one reply within an item's reply container.
    fn render_reply(&self, message: &MessageRef, opts: &RenderOptions) -> Option<Self::Node>;

    /// Render a group summary at the given priority.
    fn render_group(&self, members: &[ThreadRoot], priority: u8) -> Option<Self::Node>;

    /// Placeholder for a reply whose parent cannot be resolved. `None` when
    /// the parent is present.
    fn render_missing(&self, missing_id: &str, reply: &MessageRef) -> Option<Self::Node>;
}

/// Shared handles the way the engine consumes them.
pub type SharedFeedSource = Rc<dyn FeedSource>;
pub type SharedBacklinkSource = Rc<dyn BacklinkSource>;
