//! Feed rollup and live-update reconciliation engine.
//!
//! Streams a paginated, abortable sequence of thread roots through dedup,
//! renderability filtering and group summarization into an incrementally
//! patched content list, while a separate long-lived live stream drives the
//! unread/highlight bookkeeping and two low-latency fast paths for the
//! viewer's own posts. At most one primary stream is active per session;
//! `refresh` supersedes the previous generation by aborting it before the
//! new stream is opened.

mod grouping;
mod scroller;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::capabilities::{FeedRenderer, FeedSource, ResumeOptions};
use crate::clock::Scheduler;
use crate::error::StreamError;
use crate::models::{
    Bump, BumpType, FeedItem, FeedReason, MessageRef, RenderOptions, ThreadRoot,
};
use crate::observable::{Subscription, Value};
use crate::signal::throttle;
use crate::stream::{AbortHandle, GatedSink, ItemSink, SharedSink};

use grouping::Grouper;
use scroller::Scroller;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupState {
    Idle,
    /// Stream opened, nothing delivered yet.
    Loading,
    Streaming,
    /// Upstream exhausted and every buffered item rendered.
    Done,
    Aborted,
    /// Terminal for this generation; `refresh` starts a new one.
    Failed(StreamError),
}

pub struct RollupOptions {
    /// Visibility flag; a hidden feed keeps no content and no open stream.
    pub hidden: Value<bool>,
    /// Fold runs of low-salience items into group summaries.
    pub group_summaries: bool,
    /// Maximum members in one group summary.
    pub window_size: usize,
    pub live_updates: bool,
    /// Sampling window for the pending-updates counter.
    pub update_throttle_ms: u64,
    /// Items rendered eagerly before the host requests more.
    pub initial_demand: usize,
    /// The viewer's own feed id; enables the self-post fast paths.
    pub self_id: Option<String>,
    /// Per-item override that exempts an otherwise groupable item.
    pub ungroup: Option<Rc<dyn Fn(&ThreadRoot) -> bool>>,
    /// Per-item compact-rendering hint passed through to the renderer.
    pub compact: Option<Rc<dyn Fn(&ThreadRoot) -> bool>>,
}

impl Default for RollupOptions {
    fn default() -> Self {
        Self {
            hidden: Value::new(false),
            group_summaries: true,
            window_size: 15,
            live_updates: true,
            update_throttle_ms: 200,
            initial_demand: 20,
            self_id: None,
            ungroup: None,
            compact: None,
        }
    }
}

/// One rendered element of the content list.
pub struct FeedEntry<N> {
    pub root_id: String,
    /// Root, visible replies and fast-path splices; the self-reply fast path
    /// matches threads through this set.
    pub msg_ids: HashSet<String>,
    pub node: N,
    /// Rendered reply window (missing-parent placeholders included), plus
    /// nodes spliced in by the self-reply fast path.
    pub replies: Vec<N>,
}

/// Incremental change to the content list. Observers apply these instead of
/// re-rendering the whole list on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPatch {
    Cleared,
    Appended { index: usize },
    Prepended,
    ReplyAppended { index: usize, reply_index: usize },
}

struct Inner<R: FeedRenderer> {
    source: Rc<dyn FeedSource>,
    renderer: R,
    options: RollupOptions,

    entries: Vec<FeedEntry<R::Node>>,
    seen: HashSet<String>,
    unread_ids: HashSet<String>,
    highlight_items: HashSet<String>,
    new_since_refresh: HashSet<String>,

    current_abort: Option<AbortHandle>,
    live_abort: Option<AbortHandle>,
    grouper: Grouper,
    scroller: Scroller<FeedItem>,

    state: Value<RollupState>,
    loading: Value<bool>,
    updates: Value<u64>,
    first_item_visible: Value<bool>,
    /// Entry indexes the host currently reports as in view.
    visible_indexes: HashSet<usize>,

    patch_observers: Vec<(u64, Box<dyn FnMut(&ContentPatch)>)>,
    dead_observers: Vec<u64>,
    next_observer_id: u64,
    detached: bool,
}

/// Deferred signal writes collected while the engine state is borrowed.
/// Applied only after the borrow is released, so host observers may call
/// back into the rollup.
#[derive(Default)]
struct Effects {
    patches: Vec<ContentPatch>,
    state: Option<RollupState>,
    loading: Option<bool>,
    updates: Option<u64>,
    first_visible: Option<bool>,
}

impl Effects {
    fn apply<R: FeedRenderer>(self, inner_rc: &Rc<RefCell<Inner<R>>>) {
        notify_patches(inner_rc, &self.patches);
        let (state, loading, updates, first_visible) = {
            let inner = inner_rc.borrow();
            (
                inner.state.clone(),
                inner.loading.clone(),
                inner.updates.clone(),
                inner.first_item_visible.clone(),
            )
        };
        if let Some(s) = self.state {
            state.set_if_changed(s);
        }
        if let Some(l) = self.loading {
            loading.set_if_changed(l);
        }
        if let Some(u) = self.updates {
            updates.set_if_changed(u);
        }
        if let Some(v) = self.first_visible {
            first_visible.set_if_changed(v);
        }
    }
}

fn notify_patches<R: FeedRenderer>(inner_rc: &Rc<RefCell<Inner<R>>>, patches: &[ContentPatch]) {
    if patches.is_empty() {
        return;
    }
    let mut observers = std::mem::take(&mut inner_rc.borrow_mut().patch_observers);
    for patch in patches {
        for (_, cb) in observers.iter_mut() {
            cb(patch);
        }
    }
    let mut inner = inner_rc.borrow_mut();
    let dead = std::mem::take(&mut inner.dead_observers);
    if !dead.is_empty() {
        observers.retain(|(id, _)| !dead.contains(id));
    }
    let mut added = std::mem::take(&mut inner.patch_observers);
    observers.append(&mut added);
    inner.patch_observers = observers;
}

pub struct FeedRollup<R: FeedRenderer> {
    inner: Rc<RefCell<Inner<R>>>,
    state: Value<RollupState>,
    loading: Value<bool>,
    pending_updates: Value<u64>,
    first_item_visible: Value<bool>,
    _subs: Vec<Subscription>,
}

impl<R: FeedRenderer + 'static> FeedRollup<R> {
    pub fn new(
        scheduler: Scheduler,
        source: Rc<dyn FeedSource>,
        renderer: R,
        options: RollupOptions,
    ) -> Self {
        let state = Value::new(RollupState::Idle);
        let loading = Value::new(false);
        let updates = Value::new(0u64);
        let first_item_visible = Value::new(true);

        let hidden = options.hidden.clone();
        let live_updates = options.live_updates;
        let window_size = options.window_size;
        let initial_demand = options.initial_demand;
        let update_throttle_ms = options.update_throttle_ms;

        let inner = Rc::new(RefCell::new(Inner {
            source: source.clone(),
            renderer,
            options,
            entries: Vec::new(),
            seen: HashSet::new(),
            unread_ids: HashSet::new(),
            highlight_items: HashSet::new(),
            new_since_refresh: HashSet::new(),
            current_abort: None,
            live_abort: None,
            grouper: Grouper::new(window_size),
            scroller: Scroller::new(initial_demand),
            state: state.clone(),
            loading: loading.clone(),
            updates: updates.clone(),
            first_item_visible: first_item_visible.clone(),
            visible_indexes: HashSet::new(),
            patch_observers: Vec::new(),
            dead_observers: Vec::new(),
            next_observer_id: 0,
            detached: false,
        }));

        let (pending_updates, throttle_sub) = throttle(&scheduler, &updates, update_throttle_ms);

        let mut subs = vec![throttle_sub];
        subs.push(hidden.observe({
            let weak = Rc::downgrade(&inner);
            move |_| {
                if let Some(rc) = weak.upgrade() {
                    Self::do_refresh(&rc);
                }
            }
        }));

        if live_updates {
            let abort = AbortHandle::new();
            inner.borrow_mut().live_abort = Some(abort.clone());
            let sink: SharedSink<MessageRef> = Rc::new(RefCell::new(GatedSink::new(
                LiveSink {
                    inner: Rc::downgrade(&inner),
                },
                abort.clone(),
            )));
            source.open_live_update_stream(sink, abort);
        }

        Self {
            inner,
            state,
            loading,
            pending_updates,
            first_item_visible,
            _subs: subs,
        }
    }

    /// Start a new session: aborts the in-flight stream, clears content,
    /// promotes items that arrived live since the previous refresh into the
    /// highlight set, and opens a fresh primary stream (unless hidden).
    pub fn refresh(&self) {
        Self::do_refresh(&self.inner);
    }

    fn do_refresh(inner_rc: &Rc<RefCell<Inner<R>>>) {
        let mut fx = Effects::default();
        let open = {
            let mut inner = inner_rc.borrow_mut();
            if inner.detached {
                return;
            }
            if let Some(abort) = inner.current_abort.take() {
                abort.abort();
            }
            inner.entries.clear();
            inner.seen.clear();
            inner.grouper = Grouper::new(inner.options.window_size);
            inner.scroller = Scroller::new(inner.options.initial_demand);
            inner.visible_indexes.clear();
            fx.patches.push(ContentPatch::Cleared);
            fx.updates = Some(0);
            // a fresh session starts at the top of the feed
            fx.first_visible = Some(true);

            if inner.options.hidden.get() {
                fx.state = Some(RollupState::Idle);
                fx.loading = Some(false);
                None
            } else {
                // this session visually flags everything that arrived live
                // during the previous one
                inner.highlight_items = std::mem::take(&mut inner.new_since_refresh);
                fx.state = Some(RollupState::Loading);
                fx.loading = Some(true);
                let abort = AbortHandle::new();
                inner.current_abort = Some(abort.clone());
                Some((inner.source.clone(), abort))
            }
        };
        fx.apply(inner_rc);

        if let Some((source, abort)) = open {
            let sink: SharedSink<ThreadRoot> = Rc::new(RefCell::new(GatedSink::new(
                SessionSink {
                    inner: Rc::downgrade(inner_rc),
                },
                abort.clone(),
            )));
            source.open_item_stream(ResumeOptions::default(), sink, abort);
        }
    }

    /// Register for incremental content changes.
    pub fn observe_content(&self, cb: impl FnMut(&ContentPatch) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_observer_id;
            inner.next_observer_id += 1;
            inner.patch_observers.push((id, Box::new(cb)));
            id
        };
        let weak = Rc::downgrade(&self.inner);
        Subscription::from_fn(move || {
            if let Some(rc) = weak.upgrade() {
                let mut inner = rc.borrow_mut();
                let before = inner.patch_observers.len();
                inner.patch_observers.retain(|(i, _)| *i != id);
                if inner.patch_observers.len() == before {
                    // swapped out by a running notification pass
                    inner.dead_observers.push(id);
                }
            }
        })
    }
}

impl<R: FeedRenderer> FeedRollup<R> {
    /// Raise render demand by `n` items, e.g. when the viewport nears the
    /// end of the rendered list.
    pub fn request_more(&self, n: usize) {
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.detached {
                return;
            }
            let deliver = inner.scroller.request(n);
            for item in deliver {
                inner.render_feed_item(item, &mut fx);
            }
            inner.flow_signals(&mut fx);
        }
        fx.apply(&self.inner);
    }

    /// Read access to the rendered entries.
    pub fn with_entries<T>(&self, f: impl FnOnce(&[FeedEntry<R::Node>]) -> T) -> T {
        f(&self.inner.borrow().entries)
    }

    pub fn entry_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn state(&self) -> Value<RollupState> {
        self.state.clone()
    }

    /// True while render demand outstrips what the stream has produced.
    pub fn loading(&self) -> Value<bool> {
        self.loading.clone()
    }

    /// Throttled count of live items awaiting the next refresh.
    pub fn pending_updates(&self) -> Value<u64> {
        self.pending_updates.clone()
    }

    /// Viewport report from the host: entry `index` entered or left view.
    /// Drives [`FeedRollup::first_item_visible`].
    pub fn item_visible(&self, index: usize, visible: bool) {
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.detached {
                return;
            }
            if visible {
                inner.visible_indexes.insert(index);
            } else {
                inner.visible_indexes.remove(&index);
            }
            fx.first_visible = Some(inner.visible_indexes.contains(&0));
        }
        fx.apply(&self.inner);
    }

    /// Whether the top of the feed is in view, per the host's
    /// [`FeedRollup::item_visible`] reports. Starts true; each refresh resets
    /// it, since a new session renders from the top.
    pub fn first_item_visible(&self) -> Value<bool> {
        self.first_item_visible.clone()
    }

    /// Tear down both streams. Idempotent; also runs on drop.
    pub fn detach(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.detached {
                return;
            }
            inner.detached = true;
            if let Some(abort) = inner.current_abort.take() {
                abort.abort();
            }
            if let Some(abort) = inner.live_abort.take() {
                abort.abort();
            }
        }
        if !matches!(
            self.state.get(),
            RollupState::Done | RollupState::Failed(_)
        ) {
            self.state.set_if_changed(RollupState::Aborted);
        }
        self.loading.set_if_changed(false);
    }
}

impl<R: FeedRenderer> Drop for FeedRollup<R> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<R: FeedRenderer> Inner<R> {
    fn render_feed_item(&mut self, item: FeedItem, fx: &mut Effects) {
        match item {
            FeedItem::Root(root) => {
                let priority = self.priority_of(&root);
                let opts = self.render_options(&root, priority);
                if let Some(node) = self.renderer.render_item(&root, &opts) {
                    let replies = self.render_latest_replies(&root);
                    self.clear_unread(&root);
                    let mut msg_ids: HashSet<String> = HashSet::new();
                    msg_ids.insert(root.message.id.clone());
                    msg_ids.extend(root.latest_replies.iter().map(|m| m.id.clone()));
                    self.entries.push(FeedEntry {
                        root_id: root.message.id.clone(),
                        msg_ids,
                        node,
                        replies,
                    });
                    fx.patches.push(ContentPatch::Appended {
                        index: self.entries.len() - 1,
                    });
                }
            }
            FeedItem::Group(members) => {
                let priority = members
                    .iter()
                    .map(|m| self.priority_of(m))
                    .max()
                    .unwrap_or(0);
                if let Some(node) = self.renderer.render_group(&members, priority) {
                    for member in &members {
                        self.clear_unread(member);
                    }
                    let msg_ids: HashSet<String> =
                        members.iter().map(|m| m.message.id.clone()).collect();
                    let root_id = members
                        .first()
                        .map(|m| m.message.id.clone())
                        .unwrap_or_default();
                    self.entries.push(FeedEntry {
                        root_id,
                        msg_ids,
                        node,
                        replies: Vec::new(),
                    });
                    fx.patches.push(ContentPatch::Appended {
                        index: self.entries.len() - 1,
                    });
                }
            }
        }
    }

    /// 2 newly highlighted, 1 unread, 0 read — keyed off the root and every
    /// bump id, so a thread bumped by an unread reply surfaces as unread.
    fn priority_of(&self, root: &ThreadRoot) -> u8 {
        if item_ids(root).any(|id| self.highlight_items.contains(id)) {
            2
        } else if item_ids(root).any(|id| self.unread_ids.contains(id)) {
            1
        } else {
            0
        }
    }

    fn priority_of_id(&self, id: &str) -> u8 {
        if self.highlight_items.contains(id) {
            2
        } else if self.unread_ids.contains(id) {
            1
        } else {
            0
        }
    }

    /// Render the visible reply window for a thread. Each reply goes through
    /// the renderer with its own priority; a reply whose branch parent is not
    /// part of the thread view gets a missing-message placeholder first.
    /// Parents outside a truncated reply window are off screen, not missing,
    /// so placeholders only appear when the window covers the whole thread.
    fn render_latest_replies(&self, root: &ThreadRoot) -> Vec<R::Node> {
        let mut known: HashSet<&str> = HashSet::new();
        known.insert(root.key());
        known.extend(root.latest_replies.iter().map(|m| m.id.as_str()));
        let window_complete = root.total_replies <= root.latest_replies.len();

        let mut nodes = Vec::new();
        for reply in &root.latest_replies {
            if window_complete {
                if let Some(missing_id) = reply
                    .branch_ids
                    .iter()
                    .find(|b| !known.contains(b.as_str()))
                {
                    if let Some(marker) = self.renderer.render_missing(missing_id, reply) {
                        nodes.push(marker);
                    }
                }
            }
            let opts = RenderOptions {
                priority: self.priority_of_id(&reply.id),
                ..RenderOptions::default()
            };
            if let Some(node) = self.renderer.render_reply(reply, &opts) {
                nodes.push(node);
            }
        }
        nodes
    }

    fn render_options(&self, root: &ThreadRoot, priority: u8) -> RenderOptions {
        // a root that is itself newly highlighted gets the whole-item
        // treatment; otherwise mark the individual replies that arrived live
        let unread_bumps: Vec<String> = if self.highlight_items.contains(root.key()) {
            Vec::new()
        } else {
            root.bumps
                .iter()
                .filter(|b| self.highlight_items.contains(&b.id))
                .map(|b| b.id.clone())
                .collect()
        };
        // link target for "view full thread", set only when some marked reply
        // is not already visible among the latest replies
        let visible: HashSet<&str> = root.latest_replies.iter().map(|m| m.id.as_str()).collect();
        let anchor = if unread_bumps.iter().any(|id| !visible.contains(id.as_str())) {
            unread_bumps.last().cloned()
        } else {
            None
        };
        RenderOptions {
            compact: self
                .options
                .compact
                .as_ref()
                .map_or(false, |f| f(root)),
            priority,
            forked_from: root.message.root_id.clone(),
            reason: Some(build_reason(root)),
            unread_bumps,
            anchor,
        }
    }

    fn clear_unread(&mut self, root: &ThreadRoot) {
        self.unread_ids.remove(root.key());
        if let Some(bump) = &root.root_bump {
            self.unread_ids.remove(&bump.id);
        }
        for bump in &root.bumps {
            self.unread_ids.remove(&bump.id);
        }
    }

    fn flow_signals(&self, fx: &mut Effects) {
        fx.loading = Some(self.scroller.is_waiting());
        if self.scroller.is_done() {
            fx.state = Some(RollupState::Done);
            fx.loading = Some(false);
        }
    }
}

fn item_ids(root: &ThreadRoot) -> impl Iterator<Item = &str> {
    std::iter::once(root.key())
        .chain(root.root_bump.iter().map(|b| b.id.as_str()))
        .chain(root.bumps.iter().map(|b| b.id.as_str()))
}

/// The "why is this in your feed" annotation, from the deciding bump type.
fn build_reason(root: &ThreadRoot) -> FeedReason {
    let bump_type = root.most_recent_bump_type();
    if bump_type == BumpType::MatchesChannel {
        let matching = root.bumps_of(BumpType::MatchesChannel);
        let channels = matching
            .iter()
            .flat_map(|b| b.channels.iter().cloned())
            .collect();
        let root_matched = root
            .root_bump
            .as_ref()
            .map_or(false, |b| b.bump_type == BumpType::MatchesChannel);
        let reply_matches = root
            .bumps
            .iter()
            .filter(|b| b.bump_type == BumpType::MatchesChannel)
            .count();
        if root_matched && reply_matches == 0 {
            FeedReason::RootMatchesChannel { channels }
        } else {
            let authors: HashSet<&str> = root
                .bumps
                .iter()
                .filter(|b| b.bump_type == BumpType::MatchesChannel)
                .map(|b| b.author.as_str())
                .collect();
            FeedReason::RepliesMatchChannel {
                author_count: authors.len(),
                channels,
            }
        }
    } else {
        let mut authors: Vec<String> = Vec::new();
        for bump in root.bumps_of(bump_type) {
            if !authors.contains(&bump.author) {
                authors.push(bump.author.clone());
            }
        }
        FeedReason::Activity { bump_type, authors }
    }
}

/// Per-generation primary stream consumer. Wrapped in a [`GatedSink`] tied
/// to the generation's abort handle, so a superseded session delivers
/// nothing.
struct SessionSink<R: FeedRenderer> {
    inner: Weak<RefCell<Inner<R>>>,
}

impl<R: FeedRenderer> ItemSink<ThreadRoot> for SessionSink<R> {
    fn item(&mut self, root: ThreadRoot) {
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };
        let mut fx = Effects::default();
        {
            let mut inner = inner_rc.borrow_mut();
            if inner.detached {
                return;
            }
            let key = root.key().to_string();
            // resumed streams may overlap with what this session already saw
            if !inner.seen.insert(key) {
                return;
            }
            if !inner.renderer.can_render(&root.message) {
                return;
            }
            if inner.state.get() == RollupState::Loading {
                fx.state = Some(RollupState::Streaming);
            }
            let groupable = inner.options.group_summaries
                && inner.renderer.is_groupable(&root)
                && !inner.options.ungroup.as_ref().map_or(false, |f| f(&root));

            let mut staged = Vec::new();
            inner.grouper.push(root, groupable, &mut staged);
            let mut deliver = Vec::new();
            for item in staged {
                deliver.extend(inner.scroller.push(item));
            }
            for item in deliver {
                inner.render_feed_item(item, &mut fx);
            }
            inner.flow_signals(&mut fx);
        }
        fx.apply(&inner_rc);
    }

    fn done(&mut self) {
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };
        let mut fx = Effects::default();
        {
            let mut inner = inner_rc.borrow_mut();
            if inner.detached {
                return;
            }
            let mut staged = Vec::new();
            inner.grouper.flush(&mut staged);
            let mut deliver = Vec::new();
            for item in staged {
                deliver.extend(inner.scroller.push(item));
            }
            inner.scroller.finish();
            for item in deliver {
                inner.render_feed_item(item, &mut fx);
            }
            inner.flow_signals(&mut fx);
        }
        fx.apply(&inner_rc);
    }

    fn error(&mut self, err: StreamError) {
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };
        tracing::debug!("rollup: primary stream failed: {err}");
        let mut fx = Effects::default();
        fx.state = Some(RollupState::Failed(err));
        fx.loading = Some(false);
        fx.apply(&inner_rc);
    }
}

/// Long-lived live-update consumer; survives refreshes, torn down only on
/// detach.
struct LiveSink<R: FeedRenderer> {
    inner: Weak<RefCell<Inner<R>>>,
}

impl<R: FeedRenderer> ItemSink<MessageRef> for LiveSink<R> {
    fn item(&mut self, msg: MessageRef) {
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };
        let mut fx = Effects::default();
        {
            let mut inner = inner_rc.borrow_mut();
            if inner.detached {
                return;
            }
            if !inner.renderer.can_render(&msg) {
                return;
            }
            let is_self = inner.options.self_id.as_deref() == Some(msg.author_id.as_str());
            if is_self {
                if msg.is_root() {
                    inner.prepend_own_root(msg, &mut fx);
                } else {
                    inner.splice_own_reply(msg, &mut fx);
                }
            } else {
                if !msg.is_root() && !inner.renderer.can_render_root(&msg) {
                    return;
                }
                inner.new_since_refresh.insert(msg.id.clone());
                inner.unread_ids.insert(msg.id);
                fx.updates = Some(inner.new_since_refresh.len() as u64);
            }
        }
        fx.apply(&inner_rc);
    }

    fn done(&mut self) {}

    fn error(&mut self, err: StreamError) {
        tracing::debug!("rollup: live update stream failed: {err}");
    }
}

impl<R: FeedRenderer> Inner<R> {
    /// Fast path: the viewer's fresh root post lands at the top immediately,
    /// with synthetic zero-reply metadata, bypassing full reconciliation.
    fn prepend_own_root(&mut self, msg: MessageRef, fx: &mut Effects) {
        if !self.seen.insert(msg.id.clone()) {
            return;
        }
        self.highlight_items.insert(msg.id.clone());
        let root = ThreadRoot {
            message: msg.clone(),
            latest_replies: Vec::new(),
            total_replies: 0,
            bumps: Vec::new(),
            root_bump: Some(Bump::new(BumpType::Post, msg.id.clone(), msg.author_id)),
        };
        let opts = self.render_options(&root, 2);
        if let Some(node) = self.renderer.render_item(&root, &opts) {
            let mut msg_ids = HashSet::new();
            msg_ids.insert(root.message.id.clone());
            self.entries.insert(
                0,
                FeedEntry {
                    root_id: root.message.id.clone(),
                    msg_ids,
                    node,
                    replies: Vec::new(),
                },
            );
            fx.patches.push(ContentPatch::Prepended);
        }
    }

    /// Fast path: a reply the viewer just published into a thread that is
    /// already on screen is spliced into that entry's reply container. Unread
    /// bookkeeping is untouched; the viewer has obviously read their own post.
    fn splice_own_reply(&mut self, msg: MessageRef, fx: &mut Effects) {
        let target = self.entries.iter().position(|e| {
            msg.branch_ids.iter().any(|b| e.msg_ids.contains(b))
                || msg
                    .root_id
                    .as_ref()
                    .map_or(false, |r| e.msg_ids.contains(r))
        });
        let Some(index) = target else {
            return;
        };
        let opts = RenderOptions {
            priority: 2,
            ..RenderOptions::default()
        };
        if let Some(node) = self.renderer.render_reply(&msg, &opts) {
            let entry = &mut self.entries[index];
            entry.msg_ids.insert(msg.id);
            entry.replies.push(node);
            fx.patches.push(ContentPatch::ReplyAppended {
                index,
                reply_index: entry.replies.len() - 1,
            });
        }
    }
}
