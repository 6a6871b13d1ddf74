//! Bounded recent-message window for duplicate suppression.
//!
//! Multicast datagrams are deliberately sent more than once, so every
//! receiver sees duplicates in the normal case. The window remembers the
//! most recent `(origin, seq)` pairs and drops re-deliveries; it is
//! bounded, with the oldest pairs forgotten first.

use mcc_core::NodeId;
use std::collections::{HashSet, VecDeque};

pub struct DedupWindow {
    seen: HashSet<(NodeId, u64)>,
    order: VecDeque<(NodeId, u64)>,
    cap: usize,
}

impl DedupWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Record a delivery. Returns `true` the first time a pair is seen
    /// within the window, `false` for a duplicate.
    pub fn record(&mut self, origin: NodeId, seq: u64) -> bool {
        if !self.seen.insert((origin, seq)) {
            return false;
        }
        self.order.push_back((origin, seq));
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
