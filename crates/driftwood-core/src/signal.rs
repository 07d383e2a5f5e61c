//! Time-based signal combinators.
//!
//! `sustained` is the display-hysteresis primitive behind the progress
//! notifier: a boolean must hold steady for a full window before the output
//! flips, which keeps independently-toggling progress sources from flickering
//! the UI near completion. `throttle` caps the pending-update counter at one
//! propagation per window so bursts of live messages do not thrash layout.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::clock::{Scheduler, TimerHandle};
use crate::observable::{Subscription, Value};

/// Output follows `input` only after it has held a new state for `window_ms`,
/// in both directions. The returned `Subscription` keeps the wiring alive.
pub fn sustained(
    scheduler: &Scheduler,
    input: &Value<bool>,
    window_ms: u64,
) -> (Value<bool>, Subscription) {
    sustained_when(scheduler, input, window_ms, |_| true)
}

/// Like [`sustained`], but only transitions to values matching `sustain_if`
/// are delayed; other transitions propagate immediately. Used for the
/// second-order "remove from render tree" signal, which must reappear
/// instantly but disappear lazily.
pub fn sustained_when(
    scheduler: &Scheduler,
    input: &Value<bool>,
    window_ms: u64,
    sustain_if: impl Fn(bool) -> bool + 'static,
) -> (Value<bool>, Subscription) {
    let output = Value::new(input.get());
    // a pending flip: target value plus the timer that will commit it
    let pending: Rc<RefCell<Option<(bool, TimerHandle)>>> = Rc::new(RefCell::new(None));

    let sub = input.observe({
        let output = output.clone();
        let scheduler = scheduler.clone();
        let pending = pending.clone();
        move |v| {
            let v = *v;
            {
                let mut p = pending.borrow_mut();
                match p.as_ref() {
                    // already counting toward this value: the window keeps running
                    Some((target, _)) if *target == v => return,
                    Some(_) => {
                        if let Some((_, timer)) = p.take() {
                            timer.cancel();
                        }
                    }
                    None => {}
                }
            }
            if v == output.get() {
                return;
            }
            if !sustain_if(v) {
                output.set_if_changed(v);
                return;
            }
            let timer = scheduler.schedule(window_ms, {
                let output = output.clone();
                let pending = pending.clone();
                move || {
                    pending.borrow_mut().take();
                    output.set_if_changed(v);
                }
            });
            *pending.borrow_mut() = Some((v, timer));
        }
    });

    (output, sub)
}

/// At most one propagation of `input` per `window_ms`; the trailing edge is
/// delivered with the latest value once the window elapses.
pub fn throttle<T: Clone + PartialEq + 'static>(
    scheduler: &Scheduler,
    input: &Value<T>,
    window_ms: u64,
) -> (Value<T>, Subscription) {
    let output = Value::new(input.get());
    let last_emit: Rc<Cell<Option<u64>>> = Rc::new(Cell::new(None));
    let trailing: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

    let sub = input.observe({
        let output = output.clone();
        let input = input.clone();
        let scheduler = scheduler.clone();
        let last_emit = last_emit.clone();
        let trailing = trailing.clone();
        move |v| {
            let now = scheduler.now();
            match last_emit.get() {
                Some(t) if now < t + window_ms => {
                    if trailing.borrow().is_none() {
                        let delay = t + window_ms - now;
                        let handle = scheduler.schedule(delay, {
                            let output = output.clone();
                            let input = input.clone();
                            let scheduler = scheduler.clone();
                            let last_emit = last_emit.clone();
                            let trailing = trailing.clone();
                            move || {
                                trailing.borrow_mut().take();
                                last_emit.set(Some(scheduler.now()));
                                output.set_if_changed(input.get());
                            }
                        });
                        *trailing.borrow_mut() = Some(handle);
                    }
                }
                _ => {
                    last_emit.set(Some(now));
                    output.set_if_changed(v.clone());
                }
            }
        }
    });

    (output, sub)
}
