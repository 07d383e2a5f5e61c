//! Bounded look-ahead grouping stage.
//!
//! Folds runs of consecutive low-salience items into synthetic group
//! summaries. A run is capped at the window size; anything shorter than two
//! items passes through ungrouped, so grouping is a strict no-op on input
//! with no groupable neighbors.

use crate::models::{FeedItem, ThreadRoot};

pub struct Grouper {
    window: usize,
    run: Vec<ThreadRoot>,
}

impl Grouper {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            run: Vec::new(),
        }
    }

    /// Feed one item through the stage. Emits zero or more output items:
    /// a non-groupable item first flushes any pending run.
    pub fn push(&mut self, item: ThreadRoot, groupable: bool, out: &mut Vec<FeedItem>) {
        if groupable {
            self.run.push(item);
            if self.run.len() == self.window {
                self.emit(out);
            }
        } else {
            self.emit(out);
            out.push(FeedItem::Root(item));
        }
    }

    /// End of input: emit whatever run is still pending.
    pub fn flush(&mut self, out: &mut Vec<FeedItem>) {
        self.emit(out);
    }

    fn emit(&mut self, out: &mut Vec<FeedItem>) {
        match self.run.len() {
            0 => {}
            1 => {
                if let Some(single) = self.run.pop() {
                    out.push(FeedItem::Root(single));
                }
            }
            _ => out.push(FeedItem::Group(std::mem::take(&mut self.run))),
        }
    }
}
