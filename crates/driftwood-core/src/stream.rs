//! Push-stream plumbing.
//!
//! Streams are push-driven: the producer calls the consumer's sink for every
//! item, then `done` or `error` exactly once. Cancellation is cooperative —
//! the consumer creates an [`AbortHandle`], hands a clone to the producer,
//! and gates its own sink on the same flag so that a superseded generation
//! delivers nothing even if the producer keeps pushing for a tick.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::StreamError;

/// Consumer side of a push stream.
pub trait ItemSink<T> {
    fn item(&mut self, item: T);
    fn done(&mut self);
    fn error(&mut self, err: StreamError);
}

/// Shared, interior-mutable sink handle passed to stream producers.
pub type SharedSink<T> = Rc<RefCell<dyn ItemSink<T>>>;

/// Single-shot cooperative cancellation flag.
///
/// `abort` is idempotent; aborting after the stream already finished is a
/// benign no-op. Producers poll `is_aborted` and stop producing.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Rc<Cell<bool>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.set(true);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.get()
    }
}

/// Sink wrapper enforcing generation boundaries: after the abort flag fires
/// or the stream finishes, every further delivery is dropped on the floor.
pub struct GatedSink<T> {
    inner: Box<dyn ItemSink<T>>,
    abort: AbortHandle,
    finished: bool,
}

impl<T> GatedSink<T> {
    pub fn new(inner: impl ItemSink<T> + 'static, abort: AbortHandle) -> Self {
        Self {
            inner: Box::new(inner),
            abort,
            finished: false,
        }
    }
}

impl<T> ItemSink<T> for GatedSink<T> {
    fn item(&mut self, item: T) {
        if self.finished || self.abort.is_aborted() {
            return;
        }
        self.inner.item(item);
    }

    fn done(&mut self) {
        if self.finished || self.abort.is_aborted() {
            return;
        }
        self.finished = true;
        self.inner.done();
    }

    fn error(&mut self, err: StreamError) {
        if self.finished || self.abort.is_aborted() {
            return;
        }
        self.finished = true;
        self.inner.error(err);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records everything delivered to it through shared handles, so tests
    /// can keep a clone and inspect what crossed the gate.
    #[derive(Clone)]
    pub struct RecordingSink<T> {
        pub items: Rc<RefCell<Vec<T>>>,
        pub done: Rc<Cell<bool>>,
        pub error: Rc<RefCell<Option<StreamError>>>,
    }

    impl<T> RecordingSink<T> {
        pub fn new() -> Self {
            Self {
                items: Rc::new(RefCell::new(Vec::new())),
                done: Rc::new(Cell::new(false)),
                error: Rc::new(RefCell::new(None)),
            }
        }
    }

    impl<T> ItemSink<T> for RecordingSink<T> {
        fn item(&mut self, item: T) {
            self.items.borrow_mut().push(item);
        }

        fn done(&mut self) {
            self.done.set(true);
        }

        fn error(&mut self, err: StreamError) {
            *self.error.borrow_mut() = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;

    #[test]
    fn test_gated_sink_drops_after_abort() {
        let abort = AbortHandle::new();
        let recorder = RecordingSink::new();
        let mut sink = GatedSink::new(recorder.clone(), abort.clone());

        sink.item(1u32);
        abort.abort();
        sink.item(2);
        sink.done();

        assert_eq!(*recorder.items.borrow(), vec![1]);
        assert!(!recorder.done.get());
    }

    #[test]
    fn test_abort_after_done_is_noop() {
        let abort = AbortHandle::new();
        let recorder = RecordingSink::new();
        let mut sink = GatedSink::new(recorder.clone(), abort.clone());
        sink.item(1u32);
        sink.done();
        abort.abort();
        abort.abort();
        assert!(abort.is_aborted());
        assert!(recorder.done.get());
        assert_eq!(*recorder.items.borrow(), vec![1]);
    }

    #[test]
    fn test_error_is_terminal() {
        let abort = AbortHandle::new();
        let recorder = RecordingSink::new();
        let mut sink = GatedSink::new(recorder.clone(), abort);
        sink.error(StreamError::Terminated("gone".into()));
        sink.item(1u32);
        sink.done();
        assert_eq!(
            *recorder.error.borrow(),
            Some(StreamError::Terminated("gone".into()))
        );
        assert!(recorder.items.borrow().is_empty());
        assert!(!recorder.done.get());
    }
}
