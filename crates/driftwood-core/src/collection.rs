//! Observable collection over a resumable push stream.
//!
//! Wraps a stream factory into an ordered collection that opens the stream
//! on the first observer, tears it down when the last observer leaves, and
//! re-opens from the most recent delivered item (not from scratch) when a
//! new observer arrives later. Stream errors are terminal for the
//! collection; consumers re-create it to retry.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::StreamError;
use crate::observable::Value;
use crate::stream::{AbortHandle, ItemSink, SharedSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionState {
    /// No observer attached yet (or the stream was torn down cleanly).
    Idle,
    /// Stream open, historical drain possibly still in flight.
    Live,
    /// The stream signalled completion.
    Synced,
    /// Terminal: the stream failed. No automatic retry.
    Failed(StreamError),
}

type Factory<T> = Rc<dyn Fn(Option<&T>, SharedSink<T>, AbortHandle)>;

struct Shared<T> {
    factory: Factory<T>,
    state: CollectionState,
    /// Resume point for the next open.
    last: Option<T>,
    abort: Option<AbortHandle>,
    opens: u64,
}

/// The observable ordered collection. Observe `items()` to receive appends;
/// the observation itself drives the stream lifecycle.
pub struct PullCollection<T> {
    shared: Rc<RefCell<Shared<T>>>,
    items: Value<Vec<T>>,
}

impl<T: Clone + 'static> PullCollection<T> {
    /// `factory` (re)opens the underlying stream. It receives the resume
    /// point — the most recent item previously delivered — or `None` on the
    /// first open, and may push into the sink synchronously.
    pub fn new(factory: impl Fn(Option<&T>, SharedSink<T>, AbortHandle) + 'static) -> Self {
        let shared = Rc::new(RefCell::new(Shared {
            factory: Rc::new(factory),
            state: CollectionState::Idle,
            last: None,
            abort: None,
            opens: 0,
        }));

        // the items cell must exist before its own lifecycle hooks can hand
        // it to the sink, so the open hook reads it back out of a slot
        let items_slot: Rc<RefCell<Option<Value<Vec<T>>>>> = Rc::new(RefCell::new(None));
        let items = Value::with_lifecycle(
            Vec::new(),
            {
                let weak = Rc::downgrade(&shared);
                let slot = items_slot.clone();
                move || {
                    let items = slot.borrow().clone();
                    if let Some(items) = items {
                        Self::open(&weak, items);
                    }
                }
            },
            {
                let weak = Rc::downgrade(&shared);
                move || Self::teardown(&weak)
            },
        );
        *items_slot.borrow_mut() = Some(items.clone());

        Self { shared, items }
    }

    /// A permanently empty, non-live collection (e.g. forks of a non-root
    /// message). Observing it never opens anything.
    pub fn empty() -> Self {
        Self::new(|_, _, _| {})
    }

    /// Handle to the observable item list. Attaching the first observer
    /// opens the stream; detaching the last aborts it.
    pub fn items(&self) -> Value<Vec<T>> {
        self.items.clone()
    }

    pub fn state(&self) -> CollectionState {
        self.shared.borrow().state.clone()
    }

    /// Number of times the underlying stream has been opened. Lets callers
    /// (and tests) distinguish a resume from a cold start.
    pub fn open_count(&self) -> u64 {
        self.shared.borrow().opens
    }

    fn open(weak: &Weak<RefCell<Shared<T>>>, items: Value<Vec<T>>) {
        let Some(shared_rc) = weak.upgrade() else {
            return;
        };
        let abort = AbortHandle::new();
        let (factory, resume) = {
            let mut shared = shared_rc.borrow_mut();
            if matches!(shared.state, CollectionState::Failed(_)) {
                return;
            }
            shared.abort = Some(abort.clone());
            if shared.state == CollectionState::Idle {
                shared.state = CollectionState::Live;
            }
            shared.opens += 1;
            (shared.factory.clone(), shared.last.clone())
        };
        let sink: SharedSink<T> = Rc::new(RefCell::new(CollectionSink {
            shared: Rc::downgrade(&shared_rc),
            items,
            abort: abort.clone(),
        }));
        // borrow released: the factory may push synchronously
        factory(resume.as_ref(), sink, abort);
    }

    fn teardown(weak: &Weak<RefCell<Shared<T>>>) {
        let Some(shared_rc) = weak.upgrade() else {
            return;
        };
        let mut shared = shared_rc.borrow_mut();
        if let Some(abort) = shared.abort.take() {
            tracing::trace!("collection: last observer left, aborting stream");
            abort.abort();
        }
        if shared.state == CollectionState::Live {
            shared.state = CollectionState::Idle;
        }
    }
}

/// Sink feeding one open generation of the stream into the collection.
struct CollectionSink<T> {
    shared: Weak<RefCell<Shared<T>>>,
    items: Value<Vec<T>>,
    abort: AbortHandle,
}

impl<T: Clone + 'static> ItemSink<T> for CollectionSink<T> {
    fn item(&mut self, item: T) {
        if self.abort.is_aborted() {
            return;
        }
        if let Some(shared_rc) = self.shared.upgrade() {
            shared_rc.borrow_mut().last = Some(item.clone());
        }
        self.items.modify(|v| v.push(item));
    }

    fn done(&mut self) {
        if self.abort.is_aborted() {
            return;
        }
        if let Some(shared_rc) = self.shared.upgrade() {
            shared_rc.borrow_mut().state = CollectionState::Synced;
        }
    }

    fn error(&mut self, err: StreamError) {
        if self.abort.is_aborted() {
            return;
        }
        if let Some(shared_rc) = self.shared.upgrade() {
            tracing::debug!("collection: stream failed: {err}");
            shared_rc.borrow_mut().state = CollectionState::Failed(err);
        }
    }
}
