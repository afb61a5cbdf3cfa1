use std::collections::HashMap;

use tokio::sync::mpsc;

use mimir_types::RequestId;

/// Capacity-1 failure slot; the registry's sends never block.
pub(crate) type FailTx = mpsc::Sender<()>;

#[derive(Debug)]
pub(crate) struct PendingEntry {
    pub request_id: RequestId,
    pub fail_tx: FailTx,
}

/// Requests accepted by this server and still awaiting commit, keyed by the
/// log index `start` assigned them. At most one entry per index.
#[derive(Debug, Default)]
pub(crate) struct PendingRegistry {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingRegistry {
    pub fn register(&mut self, index: u64, entry: PendingEntry) {
        // An existing entry at this index means leadership churn rewrote the
        // index; the displaced request can no longer commit here.
        if let Some(old) = self.entries.insert(index, entry) {
            let _ = old.fail_tx.try_send(());
        }
    }

    /// A commit arrived at `index`: fail the waiter if a different request
    /// won the slot, and drop the entry either way; log indices are never
    /// reused.
    pub fn resolve(&mut self, index: u64, committed: RequestId) {
        if let Some(entry) = self.entries.remove(&index) {
            if entry.request_id != committed {
                let _ = entry.fail_tx.try_send(());
            }
        }
    }

    /// Leadership or term moved on: every accepted-but-uncommitted request
    /// must be retried by its client.
    pub fn fail_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.fail_tx.try_send(());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(client: u64, seq: u32) -> (PendingEntry, mpsc::Receiver<()>) {
        let (fail_tx, fail_rx) = mpsc::channel(1);
        (
            PendingEntry { request_id: RequestId { client, seq }, fail_tx },
            fail_rx,
        )
    }

    #[tokio::test]
    async fn matching_commit_resolves_without_failing() {
        let mut registry = PendingRegistry::default();
        let (e, mut fail_rx) = entry(1, 1);
        registry.register(5, e);

        registry.resolve(5, RequestId { client: 1, seq: 1 });
        assert_eq!(registry.len(), 0);
        assert!(fail_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn conflicting_commit_fails_the_waiter() {
        let mut registry = PendingRegistry::default();
        let (e, mut fail_rx) = entry(1, 1);
        registry.register(5, e);

        registry.resolve(5, RequestId { client: 2, seq: 9 });
        assert_eq!(registry.len(), 0);
        assert_eq!(fail_rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn fail_all_wakes_every_waiter() {
        let mut registry = PendingRegistry::default();
        let (e1, mut rx1) = entry(1, 1);
        let (e2, mut rx2) = entry(2, 4);
        registry.register(3, e1);
        registry.register(4, e2);

        registry.fail_all();
        assert_eq!(registry.len(), 0);
        assert_eq!(rx1.recv().await, Some(()));
        assert_eq!(rx2.recv().await, Some(()));
    }

    #[tokio::test]
    async fn displaced_entry_is_failed_immediately() {
        let mut registry = PendingRegistry::default();
        let (old, mut old_rx) = entry(1, 1);
        let (new, mut new_rx) = entry(2, 1);
        registry.register(7, old);
        registry.register(7, new);

        assert_eq!(registry.len(), 1);
        assert_eq!(old_rx.recv().await, Some(()));
        assert!(new_rx.try_recv().is_err());
    }
}
