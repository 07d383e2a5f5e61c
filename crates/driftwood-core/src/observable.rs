//! Observable value cell.
//!
//! The mutable/derived-cell graph the UI binds to is modelled as an explicit
//! subject: observers are registered callbacks, and the 0→1 / 1→0 listener
//! transitions fire explicit lifecycle hooks. Those hooks are load-bearing —
//! the backlink cache keys its rescue/release bookkeeping off them, and the
//! pull-collection adapter opens and tears down its stream on them.

use std::cell::RefCell;
use std::rc::Rc;

struct Observer<T> {
    id: u64,
    cb: Box<dyn FnMut(&T)>,
}

struct Inner<T> {
    value: T,
    observers: Vec<Observer<T>>,
    /// Ids removed while a notification pass had the observer list swapped out.
    dead: Vec<u64>,
    listener_count: usize,
    next_id: u64,
    on_first_listen: Option<Box<dyn FnMut()>>,
    on_last_unlisten: Option<Box<dyn FnMut()>>,
}

/// A single mutable observable cell.
///
/// Handles are cheap clones sharing one cell. Setting notifies every observer
/// synchronously with a snapshot of the new value, so observer callbacks may
/// freely read the cell (or attach further observers) without re-entrancy
/// panics.
pub struct Value<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Observer registration guard. Unlistens when dropped or when `unlisten` is
/// called explicitly.
pub struct Subscription {
    unlisten: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// A subscription over an arbitrary removal action, for observer lists
    /// that live outside a `Value` (the rollup's content-patch observers).
    pub(crate) fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Self {
            unlisten: Some(Box::new(f)),
        }
    }

    pub fn unlisten(mut self) {
        if let Some(f) = self.unlisten.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unlisten.take() {
            f();
        }
    }
}

impl<T: 'static> Value<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                observers: Vec::new(),
                dead: Vec::new(),
                listener_count: 0,
                next_id: 0,
                on_first_listen: None,
                on_last_unlisten: None,
            })),
        }
    }

    /// A cell whose 0→1 and 1→0 listener transitions run the given hooks.
    pub fn with_lifecycle(
        value: T,
        on_first_listen: impl FnMut() + 'static,
        on_last_unlisten: impl FnMut() + 'static,
    ) -> Self {
        let cell = Self::new(value);
        {
            let mut inner = cell.inner.borrow_mut();
            inner.on_first_listen = Some(Box::new(on_first_listen));
            inner.on_last_unlisten = Some(Box::new(on_last_unlisten));
        }
        cell
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.borrow().value.clone()
    }

    /// Replace the value and notify all observers.
    pub fn set(&self, value: T)
    where
        T: Clone,
    {
        self.inner.borrow_mut().value = value;
        self.notify();
    }

    /// Set only if the value actually changed. Derived signals use this to
    /// stop recomputation cascades from producing spurious notifications.
    pub fn set_if_changed(&self, value: T)
    where
        T: Clone + PartialEq,
    {
        if self.inner.borrow().value == value {
            return;
        }
        self.set(value);
    }

    /// Mutate in place, then notify.
    pub fn modify(&self, f: impl FnOnce(&mut T))
    where
        T: Clone,
    {
        f(&mut self.inner.borrow_mut().value);
        self.notify();
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().listener_count
    }

    /// Register an observer. The callback fires on every subsequent `set` /
    /// `modify`; it is not called with the current value at registration.
    pub fn observe(&self, cb: impl FnMut(&T) + 'static) -> Subscription {
        let (id, fire_first) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push(Observer {
                id,
                cb: Box::new(cb),
            });
            inner.listener_count += 1;
            (id, inner.listener_count == 1)
        };

        if fire_first {
            Self::run_hook(&self.inner, HookKind::FirstListen);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription {
            unlisten: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::remove_observer(&inner, id);
                }
            })),
        }
    }

    fn remove_observer(inner_rc: &Rc<RefCell<Inner<T>>>, id: u64) {
        let fire_last = {
            let mut inner = inner_rc.borrow_mut();
            let before = inner.observers.len();
            inner.observers.retain(|o| o.id != id);
            if inner.observers.len() == before {
                // currently swapped out by a notification pass
                inner.dead.push(id);
            }
            inner.listener_count = inner.listener_count.saturating_sub(1);
            inner.listener_count == 0
        };
        if fire_last {
            Self::run_hook(inner_rc, HookKind::LastUnlisten);
        }
    }

    /// Hooks are taken out for the duration of the call so they may touch the
    /// cell without a double borrow.
    fn run_hook(inner_rc: &Rc<RefCell<Inner<T>>>, kind: HookKind) {
        let mut hook = {
            let mut inner = inner_rc.borrow_mut();
            match kind {
                HookKind::FirstListen => inner.on_first_listen.take(),
                HookKind::LastUnlisten => inner.on_last_unlisten.take(),
            }
        };
        if let Some(h) = hook.as_mut() {
            h();
        }
        if let Some(h) = hook {
            let mut inner = inner_rc.borrow_mut();
            let slot = match kind {
                HookKind::FirstListen => &mut inner.on_first_listen,
                HookKind::LastUnlisten => &mut inner.on_last_unlisten,
            };
            if slot.is_none() {
                *slot = Some(h);
            }
        }
    }

    fn notify(&self)
    where
        T: Clone,
    {
        let snapshot = self.inner.borrow().value.clone();
        let mut observers = std::mem::take(&mut self.inner.borrow_mut().observers);
        for obs in observers.iter_mut() {
            (obs.cb)(&snapshot);
        }
        let mut inner = self.inner.borrow_mut();
        let dead = std::mem::take(&mut inner.dead);
        if !dead.is_empty() {
            observers.retain(|o| !dead.contains(&o.id));
        }
        // observers attached during the pass landed in the fresh list
        let mut added = std::mem::take(&mut inner.observers);
        observers.append(&mut added);
        inner.observers = observers;
    }
}

#[derive(Clone, Copy)]
enum HookKind {
    FirstListen,
    LastUnlisten,
}

/// Run `f` once, as soon as `value` is true: immediately if it already is,
/// otherwise on the first truthy change. The connection gate for
/// subscribe/unsubscribe requests.
pub fn once_true(value: &Value<bool>, f: impl FnOnce() + 'static) {
    if value.get() {
        f();
        return;
    }
    let slot = Rc::new(RefCell::new(Some(f)));
    let sub_cell: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
    let sub = value.observe({
        let slot = slot.clone();
        let sub_cell = sub_cell.clone();
        move |v| {
            if !*v {
                return;
            }
            if let Some(f) = slot.borrow_mut().take() {
                f();
            }
            sub_cell.borrow_mut().take();
        }
    });
    *sub_cell.borrow_mut() = Some(sub);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_set_notifies_observers() {
        let v = Value::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = v.observe({
            let seen = seen.clone();
            move |x| seen.borrow_mut().push(*x)
        });
        v.set(2);
        v.set(3);
        assert_eq!(*seen.borrow(), vec![2, 3]);
        assert_eq!(v.get(), 3);
    }

    #[test]
    fn test_set_if_changed_suppresses_duplicates() {
        let v = Value::new(5);
        let count = Rc::new(Cell::new(0));
        let _sub = v.observe({
            let count = count.clone();
            move |_| count.set(count.get() + 1)
        });
        v.set_if_changed(5);
        assert_eq!(count.get(), 0);
        v.set_if_changed(6);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_subscription_drop_unlistens() {
        let v = Value::new(0);
        let count = Rc::new(Cell::new(0));
        let sub = v.observe({
            let count = count.clone();
            move |_| count.set(count.get() + 1)
        });
        v.set(1);
        drop(sub);
        v.set(2);
        assert_eq!(count.get(), 1);
        assert_eq!(v.observer_count(), 0);
    }

    #[test]
    fn test_lifecycle_hooks_fire_on_transitions() {
        let firsts = Rc::new(Cell::new(0));
        let lasts = Rc::new(Cell::new(0));
        let v = Value::with_lifecycle(
            0,
            {
                let firsts = firsts.clone();
                move || firsts.set(firsts.get() + 1)
            },
            {
                let lasts = lasts.clone();
                move || lasts.set(lasts.get() + 1)
            },
        );

        let a = v.observe(|_| {});
        assert_eq!((firsts.get(), lasts.get()), (1, 0));
        let b = v.observe(|_| {});
        assert_eq!((firsts.get(), lasts.get()), (1, 0));
        drop(a);
        assert_eq!((firsts.get(), lasts.get()), (1, 0));
        drop(b);
        assert_eq!((firsts.get(), lasts.get()), (1, 1));

        // a fresh listener fires the first-listen hook again
        let c = v.observe(|_| {});
        assert_eq!((firsts.get(), lasts.get()), (2, 1));
        drop(c);
        assert_eq!((firsts.get(), lasts.get()), (2, 2));
    }

    #[test]
    fn test_unlisten_during_notification() {
        let v = Value::new(0);
        let sub_cell: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let fired = Rc::new(Cell::new(0));
        let sub = v.observe({
            let sub_cell = sub_cell.clone();
            let fired = fired.clone();
            move |_| {
                fired.set(fired.get() + 1);
                sub_cell.borrow_mut().take();
            }
        });
        *sub_cell.borrow_mut() = Some(sub);
        v.set(1);
        v.set(2);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_once_true_immediate() {
        let v = Value::new(true);
        let fired = Rc::new(Cell::new(false));
        once_true(&v, {
            let fired = fired.clone();
            move || fired.set(true)
        });
        assert!(fired.get());
    }

    #[test]
    fn test_once_true_waits_and_fires_once() {
        let v = Value::new(false);
        let count = Rc::new(Cell::new(0));
        once_true(&v, {
            let count = count.clone();
            move || count.set(count.get() + 1)
        });
        assert_eq!(count.get(), 0);
        v.set(false);
        assert_eq!(count.get(), 0);
        v.set(true);
        assert_eq!(count.get(), 1);
        v.set(true);
        assert_eq!(count.get(), 1);
    }
}
