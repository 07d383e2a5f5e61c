//! Sync-progress composite.
//!
//! Folds the independent progress sources (index build, schema migration,
//! peer replication, plus a replication heartbeat) into one set of derived
//! cells the host can bind a progress indicator to. The headline outputs are
//! `done`, its hysteresis-filtered `hidden`, and the second-order
//! `displaying` signal that tells the host when the indicator may actually
//! leave the render tree.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::clock::{Scheduler, TimerHandle};
use crate::error::StreamError;
use crate::models::{ProgressSample, ReplicationSample};
use crate::observable::{Subscription, Value};
use crate::signal::{sustained, sustained_when};
use crate::stream::{ItemSink, SharedSink};

#[derive(Debug, Clone)]
pub struct ProgressOptions {
    /// Hysteresis window for `hidden` and the delayed hide of `displaying`.
    pub sustain_ms: u64,
    /// Silence on the heartbeat channel after which the notifier reports
    /// `waiting`.
    pub heartbeat_timeout_ms: u64,
    /// How often heartbeat silence is checked.
    pub heartbeat_check_ms: u64,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            sustain_ms: 500,
            heartbeat_timeout_ms: 1_000,
            heartbeat_check_ms: 1_000,
        }
    }
}

/// Aggregates progress sources into display-ready signals.
pub struct ProgressNotifier {
    indexes: Value<ProgressSample>,
    migration: Value<ProgressSample>,
    replication: Value<ReplicationSample>,

    pending: Value<u64>,
    pending_migration: Value<u64>,
    index_progress: Value<f64>,
    migration_progress: Value<f64>,
    download_progress: Value<f64>,
    waiting: Value<bool>,
    done: Value<bool>,
    hidden: Value<bool>,
    displaying: Value<bool>,

    last_tick: Rc<Cell<u64>>,
    scheduler: Scheduler,
    recompute: Rc<dyn Fn()>,

    subs: Vec<Subscription>,
    timers: Vec<TimerHandle>,
}

impl ProgressNotifier {
    pub fn new(scheduler: Scheduler, options: ProgressOptions) -> Self {
        let indexes = Value::new(ProgressSample::default());
        let migration = Value::new(ProgressSample::default());
        let replication = Value::new(ReplicationSample::default());

        let pending = Value::new(0u64);
        let pending_migration = Value::new(0u64);
        let index_progress = Value::new(1.0f64);
        let migration_progress = Value::new(1.0f64);
        let download_progress = Value::new(1.0f64);
        let waiting = Value::new(false);
        let done = Value::new(true);

        let last_tick = Rc::new(Cell::new(scheduler.now()));
        // high-water mark of incomplete feeds since the last fully-synced
        // moment; the denominator of the download fraction
        let incomplete_from = Rc::new(Cell::new(0u64));

        let recompute: Rc<dyn Fn()> = Rc::new({
            let pending = pending.clone();
            let pending_migration = pending_migration.clone();
            let download_progress = download_progress.clone();
            let waiting = waiting.clone();
            let done = done.clone();
            move || {
                done.set_if_changed(
                    !waiting.get()
                        && download_progress.get() >= 1.0
                        && pending.get() == 0
                        && pending_migration.get() == 0,
                );
            }
        });

        let mut subs = Vec::new();

        subs.push(indexes.observe({
            let pending = pending.clone();
            let index_progress = index_progress.clone();
            let recompute = recompute.clone();
            move |s: &ProgressSample| {
                pending.set_if_changed(s.pending());
                index_progress.set_if_changed(s.fraction());
                recompute();
            }
        }));

        subs.push(migration.observe({
            let pending_migration = pending_migration.clone();
            let migration_progress = migration_progress.clone();
            let recompute = recompute.clone();
            move |s: &ProgressSample| {
                pending_migration.set_if_changed(s.pending());
                migration_progress.set_if_changed(s.fraction());
                recompute();
            }
        }));

        subs.push(replication.observe({
            let download_progress = download_progress.clone();
            let waiting = waiting.clone();
            let incomplete_from = incomplete_from.clone();
            let last_tick = last_tick.clone();
            let scheduler = scheduler.clone();
            let recompute = recompute.clone();
            move |r: &ReplicationSample| {
                // a replication sample counts as liveness
                last_tick.set(scheduler.now());
                waiting.set_if_changed(false);

                let fraction = if r.feeds == 0 || r.incomplete_feeds == 0 {
                    incomplete_from.set(0);
                    1.0
                } else {
                    if r.incomplete_feeds > incomplete_from.get() {
                        incomplete_from.set(r.incomplete_feeds);
                    }
                    let from = incomplete_from.get() as f64;
                    ((r.feeds as f64 - r.incomplete_feeds as f64) / from).clamp(0.0, 1.0)
                };
                download_progress.set_if_changed(fraction);
                recompute();
            }
        }));

        let mut timers = Vec::new();
        timers.push(scheduler.every(options.heartbeat_check_ms, {
            let waiting = waiting.clone();
            let last_tick = last_tick.clone();
            let scheduler = scheduler.clone();
            let timeout = options.heartbeat_timeout_ms;
            let recompute = recompute.clone();
            move || {
                if scheduler.now().saturating_sub(last_tick.get()) > timeout {
                    waiting.set_if_changed(true);
                    recompute();
                }
            }
        }));

        let (hidden, hidden_sub) = sustained(&scheduler, &done, options.sustain_ms);
        subs.push(hidden_sub);

        // the indicator reappears instantly but leaves the render tree one
        // sustain window after it hid, so the hide transition can play out
        let (delayed_hide, delayed_sub) =
            sustained_when(&scheduler, &hidden, options.sustain_ms, |v| v);
        subs.push(delayed_sub);
        let displaying = Value::new(!delayed_hide.get());
        subs.push(delayed_hide.observe({
            let displaying = displaying.clone();
            move |v| displaying.set_if_changed(!*v)
        }));

        Self {
            indexes,
            migration,
            replication,
            pending,
            pending_migration,
            index_progress,
            migration_progress,
            download_progress,
            waiting,
            done,
            hidden,
            displaying,
            last_tick,
            scheduler,
            recompute,
            subs,
            timers,
        }
    }

    pub fn update_indexes(&self, sample: ProgressSample) {
        self.indexes.set(sample);
    }

    pub fn update_migration(&self, sample: ProgressSample) {
        self.migration.set(sample);
    }

    pub fn update_replication(&self, sample: ReplicationSample) {
        self.replication.set(sample);
    }

    /// Mark the replication channel alive without new progress data.
    pub fn heartbeat(&self) {
        self.last_tick.set(self.scheduler.now());
        if self.waiting.get() {
            tracing::debug!("progress: replication heartbeat resumed");
        }
        self.waiting.set_if_changed(false);
        (self.recompute)();
    }

    /// Sink adapter for hosts that deliver heartbeats as a push stream.
    pub fn heartbeat_sink(notifier: &Rc<Self>) -> SharedSink<()> {
        Rc::new(RefCell::new(HeartbeatSink {
            notifier: Rc::downgrade(notifier),
        }))
    }

    pub fn pending(&self) -> Value<u64> {
        self.pending.clone()
    }

    pub fn pending_migration(&self) -> Value<u64> {
        self.pending_migration.clone()
    }

    pub fn index_progress(&self) -> Value<f64> {
        self.index_progress.clone()
    }

    pub fn migration_progress(&self) -> Value<f64> {
        self.migration_progress.clone()
    }

    pub fn download_progress(&self) -> Value<f64> {
        self.download_progress.clone()
    }

    pub fn waiting(&self) -> Value<bool> {
        self.waiting.clone()
    }

    /// True when every source reports caught-up and the heartbeat is live.
    pub fn done(&self) -> Value<bool> {
        self.done.clone()
    }

    /// `done` filtered through the sustain window, in both directions.
    pub fn hidden(&self) -> Value<bool> {
        self.hidden.clone()
    }

    /// Whether the indicator should be mounted at all: flips on as soon as
    /// `hidden` clears, flips off one sustain window after `hidden` sets.
    pub fn displaying(&self) -> Value<bool> {
        self.displaying.clone()
    }
}

impl Drop for ProgressNotifier {
    fn drop(&mut self) {
        for t in &self.timers {
            t.cancel();
        }
        self.subs.clear();
    }
}

struct HeartbeatSink {
    notifier: std::rc::Weak<ProgressNotifier>,
}

impl ItemSink<()> for HeartbeatSink {
    fn item(&mut self, _item: ()) {
        if let Some(n) = self.notifier.upgrade() {
            n.heartbeat();
        }
    }

    fn done(&mut self) {}

    fn error(&mut self, err: StreamError) {
        tracing::debug!("progress: heartbeat stream failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(s: &Scheduler) -> ProgressNotifier {
        ProgressNotifier::new(s.clone(), ProgressOptions::default())
    }

    fn repl(feeds: u64, incomplete: u64) -> ReplicationSample {
        ReplicationSample {
            feeds,
            incomplete_feeds: incomplete,
        }
    }

    #[test]
    fn test_download_progress_tracks_incomplete_high_water() {
        let s = Scheduler::new();
        let n = notifier(&s);
        let dl = n.download_progress();

        n.update_replication(repl(5, 0));
        assert_eq!(dl.get(), 1.0);

        n.update_replication(repl(5, 5));
        assert_eq!(dl.get(), 0.0);

        n.update_replication(repl(5, 3));
        assert!((dl.get() - 0.4).abs() < f64::EPSILON);

        // a regression never lowers the denominator mid-flight
        n.update_replication(repl(5, 5));
        assert_eq!(dl.get(), 0.0);

        n.update_replication(repl(5, 0));
        assert_eq!(dl.get(), 1.0);
    }

    #[test]
    fn test_download_progress_numerator_uses_total_feeds() {
        let s = Scheduler::new();
        let n = notifier(&s);
        let dl = n.download_progress();

        // total feed count can exceed the incomplete high-water; the
        // fraction saturates rather than understating progress
        n.update_replication(repl(10, 5));
        assert_eq!(dl.get(), 1.0);
        n.update_replication(repl(10, 3));
        assert_eq!(dl.get(), 1.0);

        // and a backlog larger than the feed count clamps at zero
        n.update_replication(repl(4, 8));
        assert_eq!(dl.get(), 0.0);
        n.update_replication(repl(6, 8));
        assert!((dl.get() - 0.0).abs() < f64::EPSILON);
        n.update_replication(repl(8, 4));
        assert!((dl.get() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_done_requires_every_source_caught_up() {
        let s = Scheduler::new();
        let n = notifier(&s);
        assert!(n.done().get());

        n.update_indexes(ProgressSample {
            start: 0,
            current: 3,
            target: 10,
        });
        assert!(!n.done().get());
        assert_eq!(n.pending().get(), 7);

        n.update_replication(repl(4, 4));
        n.update_indexes(ProgressSample {
            start: 0,
            current: 10,
            target: 10,
        });
        // indexes caught up, downloads still behind
        assert!(!n.done().get());

        n.update_replication(repl(4, 0));
        assert!(n.done().get());
    }

    #[test]
    fn test_waiting_flips_after_heartbeat_silence() {
        let s = Scheduler::new();
        let n = notifier(&s);
        assert!(!n.waiting().get());

        // checks run every second; silence over the timeout flips waiting
        s.advance(1_000);
        assert!(!n.waiting().get());
        s.advance(1_000);
        assert!(n.waiting().get());
        assert!(!n.done().get());

        n.heartbeat();
        assert!(!n.waiting().get());
        assert!(n.done().get());

        // replication samples count as liveness too
        s.advance(1_999);
        n.update_replication(repl(5, 0));
        s.advance(1_000);
        assert!(!n.waiting().get());
    }

    #[test]
    fn test_hidden_swallows_sub_window_done_flicker() {
        let s = Scheduler::new();
        let n = notifier(&s);
        let hidden = n.hidden();
        assert!(hidden.get());

        // briefly not-done, back to done inside the sustain window
        n.update_replication(repl(2, 2));
        s.advance(200);
        n.update_replication(repl(2, 0));
        s.advance(1_000);
        assert!(hidden.get());

        // a sustained not-done does surface
        n.update_replication(repl(2, 2));
        s.advance(500);
        assert!(!hidden.get());
    }

    #[test]
    fn test_displaying_shows_immediately_hides_one_window_late() {
        let s = Scheduler::new();
        let n = notifier(&s);
        assert!(!n.displaying().get());

        n.update_replication(repl(2, 2));
        s.advance(500); // hidden clears
        assert!(!n.hidden().get());
        assert!(n.displaying().get());

        n.update_replication(repl(2, 0));
        s.advance(500); // hidden sets again
        assert!(n.hidden().get());
        // indicator stays mounted one more window
        assert!(n.displaying().get());
        s.advance(500);
        assert!(!n.displaying().get());
    }

    #[test]
    fn test_heartbeat_sink_resets_waiting() {
        let s = Scheduler::new();
        let n = Rc::new(notifier(&s));
        let sink = ProgressNotifier::heartbeat_sink(&n);

        s.advance(2_000);
        assert!(n.waiting().get());
        sink.borrow_mut().item(());
        assert!(!n.waiting().get());
    }
}
