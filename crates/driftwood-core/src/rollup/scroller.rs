//! Paginating scroll consumer.
//!
//! Buffers stream output and releases it against explicit demand, so the
//! rollup renders lazily as the viewport approaches the end of the rendered
//! list instead of materializing the whole history. The loading indicator is
//! tied to unmet demand here, not to the upstream sync flag.

use std::collections::VecDeque;

pub struct Scroller<T> {
    buffer: VecDeque<T>,
    demand: usize,
    delivered: usize,
    upstream_done: bool,
}

impl<T> Scroller<T> {
    pub fn new(initial_demand: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            demand: initial_demand,
            delivered: 0,
            upstream_done: false,
        }
    }

    /// Accept one upstream item; returns the items deliverable right now
    /// (the new item and/or previously buffered ones, up to demand).
    pub fn push(&mut self, item: T) -> Vec<T> {
        self.buffer.push_back(item);
        self.pump()
    }

    /// Raise demand by `n` further items.
    pub fn request(&mut self, n: usize) -> Vec<T> {
        self.demand = self.demand.saturating_add(n);
        self.pump()
    }

    /// Upstream signaled end of stream; buffered items remain deliverable.
    pub fn finish(&mut self) {
        self.upstream_done = true;
    }

    /// Demand outstrips what upstream has produced so far.
    pub fn is_waiting(&self) -> bool {
        !self.upstream_done && self.delivered < self.demand
    }

    /// Every produced item was delivered and no more are coming.
    pub fn is_done(&self) -> bool {
        self.upstream_done && self.buffer.is_empty()
    }

    fn pump(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while self.delivered < self.demand {
            match self.buffer.pop_front() {
                Some(item) => {
                    self.delivered += 1;
                    out.push(item);
                }
                None => break,
            }
        }
        out
    }
}
