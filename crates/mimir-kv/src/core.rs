use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use mimir_consensus::{ApplyMsg, Command, RaftLog};
use mimir_types::{ClientId, KvError, NodeId, OpKind, RequestId, SeqNumber};

use crate::applier::Applier;
use crate::dedup::{DedupTable, SeqCheck};
use crate::pending::{PendingEntry, PendingRegistry};
use crate::store::Store;

/// Buffered so `shutdown` never blocks, from any context.
const KILL_BUFFER: usize = 8;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long an accepted request may wait for its commit before the
    /// caller gets `Timeout`. The command itself is not withdrawn.
    pub request_timeout: Duration,
    /// Compact the log once its persisted size exceeds this many bytes.
    /// `None` disables the trigger.
    pub snapshot_threshold: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            request_timeout: Duration::from_secs(60),
            snapshot_threshold: None,
        }
    }
}

/// State shared between the RPC frontend and the applier task.
///
/// Lock order where two are held: pending is never held together with the
/// others; store before dedup.
pub(crate) struct KvShared {
    pub(crate) store: RwLock<Store>,
    pub(crate) dedup: RwLock<DedupTable>,
    pub(crate) pending: Mutex<PendingRegistry>,
}

/// The replicated key/value service core: accepts Get/Put/Append, submits
/// them to the consensus log, and answers once the command commits, or
/// fails the caller when leadership moves on first.
pub struct KvCore<L> {
    me: NodeId,
    log: Arc<L>,
    shared: Arc<KvShared>,
    kill_tx: mpsc::Sender<()>,
    request_timeout: Duration,
}

impl<L: RaftLog> KvCore<L> {
    /// Spawns the applier task consuming `apply_rx`. Must be called from
    /// within a tokio runtime.
    pub fn new(
        log: Arc<L>,
        apply_rx: mpsc::Receiver<ApplyMsg>,
        me: NodeId,
        config: CoreConfig,
    ) -> Arc<Self> {
        let shared = Arc::new(KvShared {
            store: RwLock::new(Store::new()),
            dedup: RwLock::new(DedupTable::new()),
            pending: Mutex::new(PendingRegistry::default()),
        });
        let (kill_tx, kill_rx) = mpsc::channel(KILL_BUFFER);
        let applier = Applier::new(
            shared.clone(),
            log.clone(),
            me,
            apply_rx,
            kill_rx,
            config.snapshot_threshold,
        );
        tokio::spawn(applier.run());
        Arc::new(KvCore {
            me,
            log,
            shared,
            kill_tx,
            request_timeout: config.request_timeout,
        })
    }

    pub async fn get(
        &self,
        key: &str,
        client: ClientId,
        seq: SeqNumber,
    ) -> Result<String, KvError> {
        self.submit_and_wait(OpKind::Get, key, String::new(), client, seq)
            .await
    }

    pub async fn put(
        &self,
        key: &str,
        value: String,
        client: ClientId,
        seq: SeqNumber,
    ) -> Result<(), KvError> {
        self.submit_and_wait(OpKind::Put, key, value, client, seq)
            .await
            .map(|_| ())
    }

    pub async fn append(
        &self,
        key: &str,
        value: String,
        client: ClientId,
        seq: SeqNumber,
    ) -> Result<(), KvError> {
        self.submit_and_wait(OpKind::Append, key, value, client, seq)
            .await
            .map(|_| ())
    }

    async fn submit_and_wait(
        &self,
        kind: OpKind,
        key: &str,
        value: String,
        client: ClientId,
        seq: SeqNumber,
    ) -> Result<String, KvError> {
        // Early dedup: duplicates answer from cache, stale retries are
        // rejected, neither touches the log.
        match self.shared.dedup.read().await.check(client, seq) {
            SeqCheck::Duplicate(cached) => return Ok(cached),
            SeqCheck::Stale { latest } => return Err(KvError::StaleRequest { seq, latest }),
            SeqCheck::Fresh => {}
        }

        let request_id = RequestId { client, seq };
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let (fail_tx, mut fail_rx) = mpsc::channel(1);
        let command = Command {
            kind,
            key: key.to_string(),
            value,
            origin: self.me,
            request_id,
            reply: Some(reply_tx),
        };

        // A log that cannot accept the command is equivalent to a follower:
        // the client retries elsewhere.
        let ack = self
            .log
            .start(command)
            .await
            .map_err(|_| KvError::WrongLeader)?;
        if !ack.is_leader {
            return Err(KvError::WrongLeader);
        }
        debug!(
            me = self.me,
            index = ack.index,
            term = ack.term,
            client,
            seq,
            "request accepted"
        );

        self.shared
            .pending
            .lock()
            .await
            .register(ack.index, PendingEntry { request_id, fail_tx });

        // The registry drops our failure slot on a matching commit, which
        // closes the channel; only an actual signal means the request is
        // lost. On close, keep waiting for the reply.
        let lost = async {
            match fail_rx.recv().await {
                Some(()) => {}
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = lost => Err(KvError::LostLeadership),
            reply = reply_rx.recv() => match reply {
                Some(result) => Ok(result),
                // Every holder of the reply slot dropped without sending:
                // the entry was discarded before it could commit.
                None => Err(KvError::LostLeadership),
            },
            _ = tokio::time::sleep(self.request_timeout) => Err(KvError::Timeout),
        }
    }

    /// Number of requests currently awaiting commit on this server.
    pub async fn pending_requests(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Halt the applier and shut the log layer down. In-flight requests end
    /// via their failure channels or the request timeout.
    pub async fn shutdown(&self) {
        let _ = self.kill_tx.try_send(());
        self.log.shutdown().await;
    }
}
