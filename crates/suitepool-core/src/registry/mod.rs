use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use suitepool_model::{WorkerId, WorkerRecord, WorkerRole};

/// Readable identities (`s-1`, `r-7`) of every worker spawned during a run.
///
/// Owned by the coordinator and handed to each slot; counters are
/// monotonic per role and never reused.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    /// Records indexed by worker (process) id.
    records: HashMap<WorkerId, WorkerRecord>,
    servers: u32,
    runners: u32,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly forked server worker.
    pub fn register_server(&self, id: WorkerId) -> WorkerRecord {
        self.register(id, WorkerRole::Server)
    }

    /// Register a freshly forked runner worker.
    pub fn register_runner(&self, id: WorkerId) -> WorkerRecord {
        self.register(id, WorkerRole::Runner)
    }

    fn register(&self, id: WorkerId, role: WorkerRole) -> WorkerRecord {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let seq = match role {
            WorkerRole::Server => {
                inner.servers += 1;
                inner.servers
            }
            WorkerRole::Runner => {
                inner.runners += 1;
                inner.runners
            }
        };
        let record = WorkerRecord {
            worker_id: id,
            role,
            custom_id: format!("{}-{seq}", role.prefix()),
        };
        inner.records.insert(id, record.clone());
        record
    }

    pub fn get(&self, id: WorkerId) -> Option<WorkerRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.records.get(&id).cloned()
    }

    pub fn custom_id(&self, id: WorkerId) -> Option<String> {
        self.get(id).map(|r| r.custom_id)
    }

    /// Label used in shutdown and forwarding diagnostics.
    pub fn describe(&self, id: WorkerId) -> String {
        match self.get(id) {
            Some(record) => record.to_string(),
            None => format!("worker (pid {id})"),
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of workers registered for `role` so far.
    pub fn count(&self, role: WorkerRole) -> u32 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match role {
            WorkerRole::Server => inner.servers,
            WorkerRole::Runner => inner.runners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_per_role() {
        let registry = WorkerRegistry::new();

        assert_eq!(registry.register_server(100).custom_id, "s-1");
        assert_eq!(registry.register_runner(101).custom_id, "r-1");
        assert_eq!(registry.register_runner(102).custom_id, "r-2");
        assert_eq!(registry.register_server(103).custom_id, "s-2");

        assert_eq!(registry.count(WorkerRole::Runner), 2);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn lookup_by_process_id() {
        let registry = WorkerRegistry::new();
        registry.register_runner(7);

        let record = registry.get(7).expect("runner should be registered");
        assert!(record.is_runner());
        assert_eq!(registry.custom_id(7).as_deref(), Some("r-1"));
        assert_eq!(registry.describe(7), "runner r-1 (pid 7)");
        assert_eq!(registry.describe(8), "worker (pid 8)");
    }

    #[test]
    fn clones_share_state() {
        let registry = WorkerRegistry::new();
        let handle = registry.clone();
        handle.register_server(1);
        assert_eq!(registry.custom_id(1).as_deref(), Some("s-1"));
    }

    #[test]
    fn reused_pid_keeps_counting() {
        let registry = WorkerRegistry::new();
        registry.register_runner(50);
        let again = registry.register_runner(50);
        assert_eq!(again.custom_id, "r-2");
        assert_eq!(registry.len(), 1);
    }
}
