//! Identity-keyed memoization with taint propagation.
//!
//! One [`Memo`] lives for one top-level evaluation (or one transaction
//! scope). A node's outcome is cached after its visit unless the node is
//! tainted: its fragment declares the kind volatile, or a child it recursed
//! into during the visit was tainted. Tainted nodes are recomputed on every
//! read, which is how an expression shared between a loop body and the code
//! around it is evaluated once outside and once per iteration inside.
//!
//! Visits of binding-independent nodes are also registered while they run,
//! so concurrent readers join the running visit instead of starting another.

use futures::future::{LocalBoxFuture, Shared, WeakShared};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::error::Outcome;
use crate::graph::NodeId;

/// A visit other readers can await while it runs.
pub(crate) type Visiting = Shared<LocalBoxFuture<'static, Outcome>>;

#[derive(Clone, Default)]
struct Slot {
    outcome: Option<Outcome>,
    tainted: bool,
}

/// Counters describing cache behaviour during one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Reads answered from the cache or by joining a running visit.
    pub hits: u64,
    /// Visits actually performed.
    pub visits: u64,
    /// Visits whose result was discarded because the node is tainted.
    pub tainted: u64,
}

/// Cache and taint vectors indexed by [`NodeId`].
pub struct Memo {
    slots: RefCell<Vec<Slot>>,
    // Weak so an abandoned visit is freed with the futures that drive it.
    running: RefCell<HashMap<NodeId, WeakShared<LocalBoxFuture<'static, Outcome>>>>,
    enabled: bool,
    stats: Cell<MemoStats>,
}

impl Memo {
    /// A fresh, empty cache. With `enabled == false` every read misses.
    pub fn new(enabled: bool) -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            running: RefCell::new(HashMap::new()),
            enabled,
            stats: Cell::new(MemoStats::default()),
        }
    }

    /// Cached outcome for `id`, provided it exists and the node is not tainted.
    /// Cached failures are replayed as failures.
    pub fn lookup(&self, id: NodeId) -> Option<Outcome> {
        if !self.enabled {
            return None;
        }
        let slots = self.slots.borrow();
        let slot = slots.get(id.index())?;
        if slot.tainted {
            return None;
        }
        let hit = slot.outcome.clone()?;
        drop(slots);
        self.bump(|stats| stats.hits += 1);
        Some(hit)
    }

    /// Whether the cache is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The visit of `id` still in progress, if any.
    pub(crate) fn running(&self, id: NodeId) -> Option<Visiting> {
        if !self.enabled {
            return None;
        }
        let visit = self.running.borrow().get(&id)?.upgrade()?;
        self.bump(|stats| stats.hits += 1);
        Some(visit)
    }

    /// Register the visit of `id` so concurrent readers can join it.
    pub(crate) fn start(&self, id: NodeId, visit: &Visiting) {
        if let Some(weak) = visit.downgrade() {
            self.running.borrow_mut().insert(id, weak);
        }
    }

    /// Whether `id` is currently tainted.
    pub fn is_tainted(&self, id: NodeId) -> bool {
        self.slots
            .borrow()
            .get(id.index())
            .map(|slot| slot.tainted)
            .unwrap_or(false)
    }

    /// Record the outcome of a completed visit.
    pub fn record(&self, id: NodeId, outcome: &Outcome, tainted: bool) {
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= id.index() {
            slots.resize(id.index() + 1, Slot::default());
        }
        let slot = &mut slots[id.index()];
        slot.tainted = tainted;
        slot.outcome = if tainted || !self.enabled {
            None
        } else {
            Some(outcome.clone())
        };
        drop(slots);
        self.running.borrow_mut().remove(&id);
        self.bump(|stats| {
            stats.visits += 1;
            if tainted {
                stats.tainted += 1;
            }
        });
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MemoStats {
        self.stats.get()
    }

    fn bump(&self, update: impl FnOnce(&mut MemoStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;
    use crate::interp::value::Value;

    #[test]
    fn caches_success_and_failure() {
        let memo = Memo::new(true);
        memo.record(NodeId(2), &Ok(Value::Number(1.0)), false);
        memo.record(NodeId(0), &Err(Fault::raise("E", "boom")), false);
        assert_eq!(memo.lookup(NodeId(2)), Some(Ok(Value::Number(1.0))));
        assert!(matches!(memo.lookup(NodeId(0)), Some(Err(Fault::Raised(_)))));
        assert_eq!(memo.lookup(NodeId(1)), None);
        assert_eq!(memo.stats().hits, 2);
    }

    #[test]
    fn taint_discards_and_later_clean_visit_restores() {
        let memo = Memo::new(true);
        memo.record(NodeId(0), &Ok(Value::Number(1.0)), false);
        memo.record(NodeId(0), &Ok(Value::Number(2.0)), true);
        assert!(memo.is_tainted(NodeId(0)));
        assert_eq!(memo.lookup(NodeId(0)), None);
        memo.record(NodeId(0), &Ok(Value::Number(3.0)), false);
        assert!(!memo.is_tainted(NodeId(0)));
        assert_eq!(memo.lookup(NodeId(0)), Some(Ok(Value::Number(3.0))));
    }

    #[test]
    fn disabled_cache_always_misses() {
        let memo = Memo::new(false);
        memo.record(NodeId(0), &Ok(Value::Null), false);
        assert_eq!(memo.lookup(NodeId(0)), None);
        assert_eq!(memo.stats().visits, 1);
    }
}
