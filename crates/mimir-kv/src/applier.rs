use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mimir_consensus::{ApplyMsg, Command, RaftLog};
use mimir_types::{NodeId, OpKind};

use crate::core::KvShared;
use crate::snapshot::{decode_snapshot, encode_snapshot};

/// Single consumer of the commit stream. Sole mutator of the store; sole
/// writer of the dedup table. Lock order where two are held: store before
/// dedup, and the pending lock is never held together with either.
pub(crate) struct Applier<L> {
    shared: Arc<KvShared>,
    log: Arc<L>,
    me: NodeId,
    apply_rx: mpsc::Receiver<ApplyMsg>,
    kill_rx: mpsc::Receiver<()>,
    snapshot_threshold: Option<u64>,
    last_applied: u64,
}

impl<L: RaftLog> Applier<L> {
    pub(crate) fn new(
        shared: Arc<KvShared>,
        log: Arc<L>,
        me: NodeId,
        apply_rx: mpsc::Receiver<ApplyMsg>,
        kill_rx: mpsc::Receiver<()>,
        snapshot_threshold: Option<u64>,
    ) -> Self {
        Applier {
            shared,
            log,
            me,
            apply_rx,
            kill_rx,
            snapshot_threshold,
            last_applied: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.apply_rx.recv() => match msg {
                    Some(ApplyMsg::Command { index, command }) => {
                        self.apply_command(index, command).await;
                    }
                    Some(ApplyMsg::TermChanged { term }) => {
                        info!(me = self.me, term, "term changed; failing pending requests");
                        self.shared.pending.lock().await.fail_all();
                    }
                    Some(ApplyMsg::Snapshot { last_index, data }) => {
                        self.install_snapshot(last_index, &data).await;
                    }
                    None => break,
                },
                _ = self.kill_rx.recv() => break,
            }
        }
        debug!(me = self.me, "applier stopped");
    }

    async fn apply_command(&mut self, index: u64, command: Command) {
        self.shared
            .pending
            .lock()
            .await
            .resolve(index, command.request_id);

        let result = self.apply_to_state(&command).await;
        self.last_applied = index;
        debug!(
            me = self.me,
            index,
            client = command.request_id.client,
            seq = command.request_id.seq,
            "applied command"
        );

        // Reply only to a waiter on this server. After a restart the replayed
        // command carries no reply slot and the send is skipped entirely.
        if command.origin == self.me {
            if let Some(reply) = &command.reply {
                let _ = reply.try_send(result);
            }
        }

        self.maybe_compact().await;
    }

    /// Dedup write path. A sequence equal to the client's last retired one is
    /// a log-level duplicate (re-election can commit a request twice); it
    /// returns the cached result without touching the store.
    async fn apply_to_state(&self, command: &Command) -> String {
        let id = command.request_id;
        if let Some(cached) = self.shared.dedup.read().await.replayed(id.client, id.seq) {
            return cached;
        }
        let result = {
            let mut store = self.shared.store.write().await;
            match command.kind {
                OpKind::Put => {
                    store.put(&command.key, &command.value);
                    String::new()
                }
                OpKind::Append => {
                    store.append(&command.key, &command.value);
                    String::new()
                }
                OpKind::Get => store.get(&command.key),
            }
        };
        self.shared
            .dedup
            .write()
            .await
            .record(id.client, id.seq, result.clone());
        result
    }

    async fn maybe_compact(&self) {
        let Some(threshold) = self.snapshot_threshold else {
            return;
        };
        if self.log.persisted_bytes().await <= threshold {
            return;
        }
        let encoded = {
            let store = self.shared.store.read().await;
            let dedup = self.shared.dedup.read().await;
            encode_snapshot(self.last_applied, &store, &dedup)
        };
        match encoded {
            Ok(bytes) => {
                if let Err(e) = self.log.compact(self.last_applied, bytes).await {
                    warn!(me = self.me, error = %e, "log compaction failed");
                }
            }
            Err(e) => warn!(me = self.me, error = %e, "snapshot encoding failed"),
        }
    }

    async fn install_snapshot(&mut self, last_index: u64, data: &[u8]) {
        let contents = match decode_snapshot(data) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(me = self.me, error = %e, "ignoring undecodable snapshot");
                return;
            }
        };
        {
            let mut store = self.shared.store.write().await;
            let mut dedup = self.shared.dedup.write().await;
            *store = contents.store;
            *dedup = contents.dedup;
        }
        self.last_applied = last_index;
        info!(
            me = self.me,
            snapshot_id = %contents.snapshot_id,
            last_index,
            "installed snapshot"
        );
    }
}
