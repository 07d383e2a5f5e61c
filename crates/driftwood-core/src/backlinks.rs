//! Backlink aggregation cache.
//!
//! Keeps one ordered collection of reverse references per subject id,
//! populated by a one-shot historical query and kept current by a single
//! shared live-update stream that fans in across all subjects. Collections
//! are created lazily, reference-counted through the observable's lifecycle
//! hooks, and evicted through a two-generation removal-set rotation: an id
//! released by its last observer is purged between one and two sweep
//! intervals later, and a re-request inside that window rescues it with its
//! data intact. The lag is deliberate — it keeps backlinks warm across a
//! page change.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::capabilities::{BacklinkSource, ResumeOptions};
use crate::clock::{Scheduler, TimerHandle};
use crate::collection::PullCollection;
use crate::error::StreamError;
use crate::models::{BacklinkEntry, MessageRef};
use crate::observable::{once_true, Value};
use crate::stream::{AbortHandle, ItemSink, SharedSink};

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Interval between eviction sweeps.
    pub sweep_interval_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 5_000,
        }
    }
}

struct CacheEntry {
    collection: Value<Vec<BacklinkEntry>>,
    /// True once the historical drain completed.
    sync: Value<bool>,
    /// Abort for the historical query, fired on purge.
    abort: AbortHandle,
}

struct Inner {
    scheduler: Scheduler,
    source: Rc<dyn BacklinkSource>,
    /// Connection gate for subscribe/unsubscribe requests.
    connection: Value<bool>,
    cache: HashMap<String, CacheEntry>,
    live_started: bool,
    live_abort: Option<AbortHandle>,
    /// Ids released since the last sweep.
    new_remove: HashSet<String>,
    /// Ids released one sweep ago; purged on the next sweep.
    old_remove: HashSet<String>,
}

/// Per-subject cache of reverse-reference collections.
pub struct BacklinkCache {
    inner: Rc<RefCell<Inner>>,
    sweep_timer: TimerHandle,
}

impl BacklinkCache {
    pub fn new(
        scheduler: Scheduler,
        source: Rc<dyn BacklinkSource>,
        connection: Value<bool>,
        options: CacheOptions,
    ) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            scheduler: scheduler.clone(),
            source,
            connection,
            cache: HashMap::new(),
            live_started: false,
            live_abort: None,
            new_remove: HashSet::new(),
            old_remove: HashSet::new(),
        }));

        let sweep_timer = scheduler.every(options.sweep_interval_ms, {
            let weak = Rc::downgrade(&inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    Self::sweep(&inner);
                }
            }
        });

        Self { inner, sweep_timer }
    }

    /// The live ordered backlink collection for `subject_id`. Idempotent
    /// while the id is cached: repeated calls return the same collection
    /// (and rescue it if it was pending eviction). The historical query is
    /// deferred a tick so the collection is returned before any data lands.
    pub fn get(&self, subject_id: &str) -> Value<Vec<BacklinkEntry>> {
        self.ensure_live_stream();

        if let Some(entry) = self.inner.borrow().cache.get(subject_id) {
            return entry.collection.clone();
        }

        let (collection, connection, source) = {
            let mut inner = self.inner.borrow_mut();

            let sync = Value::new(false);
            let collection = Value::with_lifecycle(
                Vec::new(),
                {
                    let weak = Rc::downgrade(&self.inner);
                    let id = subject_id.to_string();
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            Self::rescue(&inner, &id);
                        }
                    }
                },
                {
                    let weak = Rc::downgrade(&self.inner);
                    let id = subject_id.to_string();
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            Self::release(&inner, &id);
                        }
                    }
                },
            );

            let abort = AbortHandle::new();
            let sink: SharedSink<BacklinkEntry> = Rc::new(RefCell::new(HistorySink {
                collection: collection.clone(),
                sync: sync.clone(),
                abort: abort.clone(),
            }));

            // deferred so the caller holds the collection before the drain
            inner.scheduler.defer({
                let source = inner.source.clone();
                let id = subject_id.to_string();
                let abort = abort.clone();
                move || source.open_backlink_query(&id, sink, abort)
            });

            inner.cache.insert(
                subject_id.to_string(),
                CacheEntry {
                    collection: collection.clone(),
                    sync,
                    abort,
                },
            );
            (collection, inner.connection.clone(), inner.source.clone())
        };

        // gate outside the borrow: the callback may fire synchronously
        once_true(&connection, {
            let id = subject_id.to_string();
            move || source.subscribe(&id)
        });

        collection
    }

    /// Sync flag of a cached subject: true once its historical load is done.
    pub fn sync(&self, subject_id: &str) -> Option<Value<bool>> {
        self.inner
            .borrow()
            .cache
            .get(subject_id)
            .map(|e| e.sync.clone())
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.inner.borrow().cache.contains_key(subject_id)
    }

    /// Resumable stream of messages referencing `msg`.
    pub fn references(&self, msg: &MessageRef) -> PullCollection<BacklinkEntry> {
        let source = self.inner.borrow().source.clone();
        let id = msg.id.clone();
        PullCollection::new(move |last: Option<&BacklinkEntry>, sink, abort| {
            let resume = ResumeOptions {
                limit: None,
                since: last.map(|e| e.asserted_timestamp),
            };
            source.open_reference_stream(&id, resume, sink, abort);
        })
    }

    /// Resumable stream of forks of `msg`. Forks only exist for thread
    /// roots; for any other message this is an empty static collection.
    pub fn forks(&self, msg: &MessageRef) -> PullCollection<BacklinkEntry> {
        if !msg.is_root() {
            return PullCollection::empty();
        }
        let source = self.inner.borrow().source.clone();
        let id = msg.id.clone();
        PullCollection::new(move |last: Option<&BacklinkEntry>, sink, abort| {
            let resume = ResumeOptions {
                limit: None,
                since: last.map(|e| e.asserted_timestamp),
            };
            source.open_fork_stream(&id, resume, sink, abort);
        })
    }

    fn ensure_live_stream(&self) {
        let start = {
            let mut inner = self.inner.borrow_mut();
            if inner.live_started {
                None
            } else {
                inner.live_started = true;
                let abort = AbortHandle::new();
                inner.live_abort = Some(abort.clone());
                Some((inner.source.clone(), abort))
            }
        };
        if let Some((source, abort)) = start {
            let sink: SharedSink<BacklinkEntry> = Rc::new(RefCell::new(LiveSink {
                inner: Rc::downgrade(&self.inner),
            }));
            source.open_live_backlink_stream(sink, abort);
        }
    }

    fn rescue(inner_rc: &Rc<RefCell<Inner>>, id: &str) {
        let mut inner = inner_rc.borrow_mut();
        inner.new_remove.remove(id);
        inner.old_remove.remove(id);
    }

    fn release(inner_rc: &Rc<RefCell<Inner>>, id: &str) {
        let mut inner = inner_rc.borrow_mut();
        inner.new_remove.insert(id.to_string());
    }

    /// Eviction pass: purge everything released two generations ago, then
    /// rotate the generation sets.
    fn sweep(inner_rc: &Rc<RefCell<Inner>>) {
        // collect first: unsubscribe goes through the connection gate and
        // must run without the cache borrowed
        let (purge, source, connection) = {
            let inner = inner_rc.borrow();
            let purge: Vec<String> = inner
                .old_remove
                .iter()
                .filter(|id| inner.cache.contains_key(*id))
                .cloned()
                .collect();
            (purge, inner.source.clone(), inner.connection.clone())
        };

        if !purge.is_empty() {
            tracing::debug!("backlinks: purging {} subjects", purge.len());
        }

        for id in &purge {
            // unsubscribe before deleting, so live updates for a cached id
            // always have a collection to land in
            once_true(&connection, {
                let source = source.clone();
                let id = id.clone();
                move || source.unsubscribe(&id)
            });
        }

        let mut inner = inner_rc.borrow_mut();
        for id in &purge {
            if let Some(entry) = inner.cache.remove(id) {
                entry.abort.abort();
            }
        }
        inner.old_remove.clear();
        // rotate: this sweep's releases get one more interval of grace
        inner.old_remove = std::mem::take(&mut inner.new_remove);
    }
}

impl Drop for BacklinkCache {
    fn drop(&mut self) {
        self.sweep_timer.cancel();
        if let Some(abort) = self.inner.borrow_mut().live_abort.take() {
            abort.abort();
        }
    }
}

/// Insert preserving the collection's total order: a reply nests immediately
/// after the entry it replies to (and after earlier replies to the same
/// entry), everything else orders by ascending asserted timestamp with
/// insertion-stable ties.
pub(crate) fn insert_sorted(list: &mut Vec<BacklinkEntry>, entry: BacklinkEntry) {
    if let Some(i) = list.iter().position(|e| entry.is_reply_to(e)) {
        let target_id = list[i].id.clone();
        let mut at = i + 1;
        while at < list.len() && list[at].source.branches_include(&target_id) {
            at += 1;
        }
        list.insert(at, entry);
        return;
    }
    if let Some(i) = list.iter().position(|e| e.is_reply_to(&entry)) {
        // the reply arrived first; its target slots in just before it
        list.insert(i, entry);
        return;
    }
    let at = list
        .iter()
        .position(|e| e.asserted_timestamp > entry.asserted_timestamp)
        .unwrap_or(list.len());
    list.insert(at, entry);
}

/// Sink for one subject's historical drain.
struct HistorySink {
    collection: Value<Vec<BacklinkEntry>>,
    sync: Value<bool>,
    abort: AbortHandle,
}

impl ItemSink<BacklinkEntry> for HistorySink {
    fn item(&mut self, entry: BacklinkEntry) {
        if self.abort.is_aborted() {
            return;
        }
        self.collection.modify(|v| insert_sorted(v, entry));
    }

    fn done(&mut self) {
        if self.abort.is_aborted() {
            return;
        }
        self.sync.set(true);
    }

    fn error(&mut self, err: StreamError) {
        if self.abort.is_aborted() {
            return;
        }
        // backfill failures are recovered here: the collection stays usable
        // with whatever loaded, and live updates still apply
        tracing::debug!("backlinks: historical query failed: {err}");
        self.sync.set(true);
    }
}

/// Sink for the shared live stream; routes entries by subject id.
struct LiveSink {
    inner: Weak<RefCell<Inner>>,
}

impl ItemSink<BacklinkEntry> for LiveSink {
    fn item(&mut self, entry: BacklinkEntry) {
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };
        let collection = inner_rc
            .borrow()
            .cache
            .get(&entry.subject_id)
            .map(|e| e.collection.clone());
        match collection {
            // borrow released before notifying observers
            Some(collection) => collection.modify(|v| insert_sorted(v, entry)),
            None => {
                tracing::trace!(
                    "backlinks: dropping live update for unsubscribed subject {}",
                    entry.subject_id
                );
            }
        }
    }

    fn done(&mut self) {}

    fn error(&mut self, err: StreamError) {
        tracing::debug!("backlinks: live stream failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn entry(id: &str, ts: u64, branches: &[&str]) -> BacklinkEntry {
        BacklinkEntry {
            id: id.to_string(),
            subject_id: "%subject".to_string(),
            source: MessageRef {
                id: id.to_string(),
                author_id: "@a".to_string(),
                root_id: Some("%subject".to_string()),
                branch_ids: branches.iter().map(|s| s.to_string()).collect(),
                timestamp_claimed: ts,
                timestamp_received: ts,
            },
            asserted_timestamp: ts,
        }
    }

    fn order(list: &[BacklinkEntry]) -> Vec<&str> {
        list.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_comparator_orders_by_timestamp_with_stable_ties() {
        let mut list = Vec::new();
        insert_sorted(&mut list, entry("%b", 200, &[]));
        insert_sorted(&mut list, entry("%a", 100, &[]));
        insert_sorted(&mut list, entry("%c", 200, &[]));
        assert_eq!(order(&list), vec!["%a", "%b", "%c"]);
    }

    #[test]
    fn test_reply_sorts_after_target_despite_earlier_timestamp() {
        let mut list = Vec::new();
        // a replies to b but asserts an earlier timestamp (clock skew)
        insert_sorted(&mut list, entry("%b", 200, &[]));
        insert_sorted(&mut list, entry("%x", 300, &[]));
        insert_sorted(&mut list, entry("%a", 100, &["%b"]));
        assert_eq!(order(&list), vec!["%b", "%a", "%x"]);
    }

    #[test]
    fn test_replies_to_same_target_keep_insertion_order() {
        let mut list = Vec::new();
        insert_sorted(&mut list, entry("%b", 200, &[]));
        insert_sorted(&mut list, entry("%r1", 100, &["%b"]));
        insert_sorted(&mut list, entry("%r2", 50, &["%b"]));
        assert_eq!(order(&list), vec!["%b", "%r1", "%r2"]);
    }

    #[test]
    fn test_target_arriving_after_reply_slots_before_it() {
        let mut list = Vec::new();
        insert_sorted(&mut list, entry("%a", 100, &["%b"]));
        insert_sorted(&mut list, entry("%b", 200, &[]));
        assert_eq!(order(&list), vec!["%b", "%a"]);
    }

    // ---- cache lifecycle ----

    struct TestSource {
        query_sinks: RefCell<HashMap<String, SharedSink<BacklinkEntry>>>,
        query_count: Cell<u64>,
        live_sink: RefCell<Option<SharedSink<BacklinkEntry>>>,
        subscribed: RefCell<Vec<String>>,
        unsubscribed: RefCell<Vec<String>>,
    }

    impl TestSource {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                query_sinks: RefCell::new(HashMap::new()),
                query_count: Cell::new(0),
                live_sink: RefCell::new(None),
                subscribed: RefCell::new(Vec::new()),
                unsubscribed: RefCell::new(Vec::new()),
            })
        }

        fn push_live(&self, entry: BacklinkEntry) {
            let sink = self.live_sink.borrow().clone();
            if let Some(sink) = sink {
                sink.borrow_mut().item(entry);
            }
        }

        fn finish_query(&self, subject: &str, entries: Vec<BacklinkEntry>) {
            let sink = self.query_sinks.borrow().get(subject).cloned();
            if let Some(sink) = sink {
                for e in entries {
                    sink.borrow_mut().item(e);
                }
                sink.borrow_mut().done();
            }
        }
    }

    impl BacklinkSource for TestSource {
        fn open_backlink_query(
            &self,
            subject_id: &str,
            sink: SharedSink<BacklinkEntry>,
            _abort: AbortHandle,
        ) {
            self.query_count.set(self.query_count.get() + 1);
            self.query_sinks
                .borrow_mut()
                .insert(subject_id.to_string(), sink);
        }

        fn open_live_backlink_stream(&self, sink: SharedSink<BacklinkEntry>, _abort: AbortHandle) {
            *self.live_sink.borrow_mut() = Some(sink);
        }

        fn open_reference_stream(
            &self,
            _subject_id: &str,
            _resume: ResumeOptions,
            _sink: SharedSink<BacklinkEntry>,
            _abort: AbortHandle,
        ) {
        }

        fn open_fork_stream(
            &self,
            _subject_id: &str,
            _resume: ResumeOptions,
            _sink: SharedSink<BacklinkEntry>,
            _abort: AbortHandle,
        ) {
        }

        fn subscribe(&self, subject_id: &str) {
            self.subscribed.borrow_mut().push(subject_id.to_string());
        }

        fn unsubscribe(&self, subject_id: &str) {
            self.unsubscribed.borrow_mut().push(subject_id.to_string());
        }
    }

    fn cache_with(
        scheduler: &Scheduler,
        connection_up: bool,
    ) -> (BacklinkCache, Rc<TestSource>, Value<bool>) {
        let source = TestSource::new();
        let connection = Value::new(connection_up);
        let cache = BacklinkCache::new(
            scheduler.clone(),
            source.clone(),
            connection.clone(),
            CacheOptions::default(),
        );
        (cache, source, connection)
    }

    #[test]
    fn test_get_defers_query_and_sets_sync_on_done() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);

        let collection = cache.get("%subject");
        // query is deferred a tick
        assert_eq!(source.query_count.get(), 0);
        s.advance(0);
        assert_eq!(source.query_count.get(), 1);

        let sync = cache.sync("%subject").unwrap();
        assert!(!sync.get());
        source.finish_query("%subject", vec![entry("%a", 100, &[]), entry("%b", 50, &[])]);
        assert!(sync.get());
        assert_eq!(order(&collection.get()), vec!["%b", "%a"]);
    }

    #[test]
    fn test_get_is_idempotent_while_live() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);
        let a = cache.get("%subject");
        s.advance(0);
        let b = cache.get("%subject");
        s.advance(0);
        assert_eq!(source.query_count.get(), 1);
        // both handles observe the same collection
        source.finish_query("%subject", vec![entry("%a", 100, &[])]);
        assert_eq!(a.get().len(), 1);
        assert_eq!(b.get().len(), 1);
    }

    #[test]
    fn test_subscribe_waits_for_connection() {
        let s = Scheduler::new();
        let (cache, source, conn) = cache_with(&s, false);
        let _c = cache.get("%subject");
        assert!(source.subscribed.borrow().is_empty());
        conn.set(true);
        assert_eq!(*source.subscribed.borrow(), vec!["%subject"]);
    }

    #[test]
    fn test_live_updates_route_by_subject_and_drop_unknown() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);
        let collection = cache.get("%subject");
        s.advance(0);

        source.push_live(entry("%live", 500, &[]));
        assert_eq!(order(&collection.get()), vec!["%live"]);

        // unknown subject: silently dropped
        let mut other = entry("%other", 600, &[]);
        other.subject_id = "%nobody".to_string();
        source.push_live(other);
        assert_eq!(collection.get().len(), 1);
    }

    #[test]
    fn test_rescue_within_sweep_window_keeps_data_without_requery() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);
        let collection = cache.get("%subject");
        s.advance(0);
        source.finish_query("%subject", vec![entry("%a", 100, &[])]);

        let sub = collection.observe(|_| {});
        drop(sub); // released: scheduled for eviction

        s.advance(5_000); // one sweep: still cached (old generation only)
        assert!(cache.contains("%subject"));

        // re-request inside the window rescues it
        let again = cache.get("%subject");
        assert_eq!(again.get().len(), 1);
        let _keep = again.observe(|_| {});
        s.advance(20_000);
        assert!(cache.contains("%subject"));
        assert_eq!(source.query_count.get(), 1);
        assert!(source.unsubscribed.borrow().is_empty());
    }

    #[test]
    fn test_purge_after_two_sweeps_and_requery_from_scratch() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);
        let collection = cache.get("%subject");
        s.advance(0);
        source.finish_query("%subject", vec![entry("%a", 100, &[])]);

        let sub = collection.observe(|_| {});
        drop(sub);

        s.advance(10_000); // two sweeps: purged
        assert!(!cache.contains("%subject"));
        assert_eq!(*source.unsubscribed.borrow(), vec!["%subject"]);

        // live updates for the purged id are dropped
        source.push_live(entry("%late", 700, &[]));

        // a fresh get re-runs the historical query
        let fresh = cache.get("%subject");
        s.advance(0);
        assert_eq!(source.query_count.get(), 2);
        assert!(fresh.get().is_empty());
        assert_eq!(
            *source.subscribed.borrow(),
            vec!["%subject", "%subject"]
        );
    }

    #[test]
    fn test_never_released_id_survives_sweeps() {
        let s = Scheduler::new();
        let (cache, source, _conn) = cache_with(&s, true);
        let collection = cache.get("%subject");
        let _sub = collection.observe(|_| {});
        s.advance(60_000);
        assert!(cache.contains("%subject"));
        assert!(source.unsubscribed.borrow().is_empty());
    }

    #[test]
    fn test_forks_empty_for_non_root_messages() {
        let s = Scheduler::new();
        let (cache, _source, _conn) = cache_with(&s, true);
        let reply = MessageRef {
            id: "%reply".to_string(),
            author_id: "@a".to_string(),
            root_id: Some("%root".to_string()),
            branch_ids: vec!["%root".to_string()],
            timestamp_claimed: 1,
            timestamp_received: 1,
        };
        let forks = cache.forks(&reply);
        let items = forks.items();
        let _sub = items.observe(|_| {});
        assert!(items.get().is_empty());
    }
}
