use std::collections::{HashSet, VecDeque};

use tracing::warn;

use suitepool_model::SuiteRef;

use crate::slot::SlotId;

/// Run-wide bookkeeping of the coordinator.
///
/// Mutated only from the coordinator's event loop, so it carries no locks.
#[derive(Debug)]
pub struct GlobalState {
    original: Vec<SuiteRef>,
    queue: VecDeque<SuiteRef>,
    /// Every dispatch in order, with the slot that received it.
    dispatched: Vec<(SlotId, SuiteRef)>,
    finished: Vec<SuiteRef>,
    finished_set: HashSet<SuiteRef>,
    has_bailed: bool,
    active_slots: usize,
    terminated_slots: usize,
}

impl GlobalState {
    /// Queue `suites` for a pool of at most `pool_size` slots.
    ///
    /// The live slot count is fixed here to `min(pool_size, suites)`.
    pub fn new(suites: Vec<SuiteRef>, pool_size: usize) -> Self {
        let active_slots = pool_size.max(1).min(suites.len());
        Self {
            queue: suites.iter().cloned().collect(),
            original: suites,
            dispatched: Vec::new(),
            finished: Vec::new(),
            finished_set: HashSet::new(),
            has_bailed: false,
            active_slots,
            terminated_slots: 0,
        }
    }

    /// Pop the next suite for `slot`, FIFO.
    pub fn next_suite(&mut self, slot: SlotId) -> Option<SuiteRef> {
        let suite = self.queue.pop_front()?;
        self.dispatched.push((slot, suite.clone()));
        Some(suite)
    }

    /// Stop handing out work. Returns `true` on the first call only.
    pub fn bail(&mut self) -> bool {
        self.queue.clear();
        !std::mem::replace(&mut self.has_bailed, true)
    }

    /// Record a `suiteDone`. Unknown or repeated suites are ignored.
    pub fn record_finished(&mut self, suite: SuiteRef) -> bool {
        if !self.original.contains(&suite) {
            warn!(target: "suitepool.coordinator", %suite, "finished suite was never queued");
            return false;
        }
        if !self.finished_set.insert(suite.clone()) {
            warn!(target: "suitepool.coordinator", %suite, "suite reported done twice");
            return false;
        }
        self.finished.push(suite);
        true
    }

    /// Suites that never reported `suiteDone`, in original order.
    pub fn missing(&self) -> Vec<SuiteRef> {
        self.original
            .iter()
            .filter(|s| !self.finished_set.contains(*s))
            .cloned()
            .collect()
    }

    pub fn slot_terminated(&mut self) {
        self.terminated_slots += 1;
    }

    pub fn all_slots_terminated(&self) -> bool {
        self.terminated_slots >= self.active_slots
    }

    pub fn original(&self) -> &[SuiteRef] {
        &self.original
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatched(&self) -> &[(SlotId, SuiteRef)] {
        &self.dispatched
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.len()
    }

    pub fn finished(&self) -> &[SuiteRef] {
        &self.finished
    }

    pub fn has_bailed(&self) -> bool {
        self.has_bailed
    }

    pub fn active_slots(&self) -> usize {
        self.active_slots
    }
}
