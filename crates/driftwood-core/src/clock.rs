//! Deterministic single-threaded task scheduler.
//!
//! Every timer in the crate (cache eviction sweeps, heartbeat-timeout checks,
//! throttled counters, deferred query starts) runs through a `Scheduler`
//! handle instead of an ambient engine timer. The host event loop drives it
//! from wall time with `advance_to`; tests drive it manually, which makes all
//! timing behavior (hysteresis windows, eviction lag) exactly reproducible.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

type Task = Box<dyn FnMut()>;

struct Entry {
    due: u64,
    seq: u64,
    interval: Option<u64>,
    cancelled: Rc<Cell<bool>>,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct Inner {
    now: u64,
    next_seq: u64,
    queue: BinaryHeap<Reverse<Entry>>,
}

/// Cancellation handle for a scheduled task.
///
/// `cancel` is idempotent. Dropping the handle does not cancel the task.
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Cheaply clonable handle to the shared timer queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: 0,
                next_seq: 0,
                queue: BinaryHeap::new(),
            })),
        }
    }

    /// Current time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    /// Run `f` on the next advance, before any later-scheduled work at the
    /// same timestamp. Used where the caller must get a handle back
    /// synchronously before the work starts (e.g. the backlink history query).
    pub fn defer(&self, f: impl FnOnce() + 'static) -> TimerHandle {
        self.schedule(0, f)
    }

    /// One-shot task after `delay_ms`.
    pub fn schedule(&self, delay_ms: u64, f: impl FnOnce() + 'static) -> TimerHandle {
        let mut f = Some(f);
        self.push(delay_ms, None, Box::new(move || {
            if let Some(f) = f.take() {
                f();
            }
        }))
    }

    /// Repeating task every `interval_ms`, first firing one interval from now.
    pub fn every(&self, interval_ms: u64, f: impl FnMut() + 'static) -> TimerHandle {
        self.push(interval_ms, Some(interval_ms), Box::new(f))
    }

    fn push(&self, delay_ms: u64, interval: Option<u64>, task: Task) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        let mut inner = self.inner.borrow_mut();
        let due = inner.now + delay_ms;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(Reverse(Entry {
            due,
            seq,
            interval,
            cancelled: cancelled.clone(),
            task,
        }));
        TimerHandle { cancelled }
    }

    /// Advance the clock by `ms`, running every due task in timestamp order
    /// (FIFO within one timestamp).
    pub fn advance(&self, ms: u64) {
        let target = self.now() + ms;
        self.advance_to(target);
    }

    /// Advance the clock to an absolute time. Tasks scheduled while advancing
    /// run in the same pass if they fall due before `target`.
    pub fn advance_to(&self, target: u64) {
        loop {
            let entry = {
                let mut inner = self.inner.borrow_mut();
                let due = match inner.queue.peek() {
                    Some(Reverse(e)) if e.due <= target => e.due,
                    _ => {
                        inner.now = inner.now.max(target);
                        break;
                    }
                };
                inner.now = inner.now.max(due);
                match inner.queue.pop() {
                    Some(Reverse(e)) => e,
                    None => break,
                }
            };

            let mut entry = entry;
            if entry.cancelled.get() {
                continue;
            }
            // run outside the borrow: tasks may schedule or cancel freely
            (entry.task)();

            if let Some(interval) = entry.interval {
                if !entry.cancelled.get() {
                    let mut inner = self.inner.borrow_mut();
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.queue.push(Reverse(Entry {
                        due: entry.due + interval,
                        seq,
                        interval: entry.interval,
                        cancelled: entry.cancelled,
                        task: entry.task,
                    }));
                }
            }
        }
    }
}
