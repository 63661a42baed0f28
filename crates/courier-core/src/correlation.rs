use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::trace;

use crate::{
    sync::lock,
    types::{BackendEvent, RequestId},
};

/// One-shot reply handler. Runs on the receive loop thread.
pub type ReplyHandler = Box<dyn FnOnce(BackendEvent) + Send + 'static>;

/// Maps outstanding request IDs to their reply handlers.
///
/// Handlers are removed on [`CorrelationTable::resolve`], so each one can be
/// invoked at most once. IDs start at 1; `0` belongs to push events.
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, ReplyHandler>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending", &self.len())
            .finish()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` under a fresh request ID and return the ID.
    pub fn register<F>(&self, handler: F) -> RequestId
    where
        F: FnOnce(BackendEvent) + Send + 'static,
    {
        let id = self.next_untracked_id();
        lock(&self.pending).insert(id, Box::new(handler));
        trace!(request_id = id, "registered reply handler");
        id
    }

    /// Allocate a request ID for a fire-and-forget request.
    ///
    /// Replies to it find no handler and are dropped.
    pub fn next_untracked_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove and return the handler registered for `id`.
    pub fn resolve(&self, id: RequestId) -> Option<ReplyHandler> {
        lock(&self.pending).remove(&id)
    }

    /// Drop every pending handler without invoking it.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *lock(&self.pending));
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use proptest::prelude::*;

    use super::*;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> impl FnOnce(BackendEvent) + Send + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_zero() {
        let table = CorrelationTable::new();
        let a = table.register(|_| {});
        let b = table.register(|_| {});
        let c = table.next_untracked_id();
        assert_eq!(a, 1);
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn resolve_removes_handler() {
        let table = CorrelationTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = table.register(counting_handler(&calls));

        let handler = table.resolve(id).expect("handler should be registered");
        handler(BackendEvent::Ok);
        assert!(table.resolve(id).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_and_untracked_ids_resolve_to_none() {
        let table = CorrelationTable::new();
        let untracked = table.next_untracked_id();
        assert!(table.resolve(untracked).is_none());
        assert!(table.resolve(9_999).is_none());
    }

    #[test]
    fn clear_drops_without_invoking() {
        let table = CorrelationTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        table.register(counting_handler(&calls));
        table.register(counting_handler(&calls));

        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_registration_yields_unique_ids() {
        let table = Arc::new(CorrelationTable::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| table.register(|_| {}))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<RequestId> = workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("worker should finish"))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1_000);
        assert_eq!(table.len(), 1_000);
    }

    proptest! {
        #[test]
        fn handlers_fire_at_most_once(
            ops in proptest::collection::vec((any::<bool>(), 0usize..16), 1..64)
        ) {
            let table = CorrelationTable::new();
            let counters: Vec<Arc<AtomicUsize>> =
                (0..16).map(|_| Arc::new(AtomicUsize::new(0))).collect();
            let mut ids: Vec<Option<RequestId>> = vec![None; 16];

            for (register, slot) in ops {
                if register && ids[slot].is_none() {
                    ids[slot] = Some(table.register(counting_handler(&counters[slot])));
                } else if let Some(id) = ids[slot] {
                    if let Some(handler) = table.resolve(id) {
                        handler(BackendEvent::Ok);
                    }
                }
            }

            for (slot, counter) in counters.iter().enumerate() {
                let calls = counter.load(Ordering::SeqCst);
                prop_assert!(calls <= 1);
                if let Some(id) = ids[slot] {
                    let still_pending = table.resolve(id).is_some();
                    prop_assert!(!(still_pending && calls == 1));
                }
            }
        }
    }
}
