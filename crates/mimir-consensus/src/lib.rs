use std::collections::{BTreeMap, VecDeque};

use tokio::sync::{mpsc, Mutex};

use mimir_types::{LogError, NodeId, OpKind, RequestId};

// ---------------------------------------------------------------------------
// Commands and the commit stream
// ---------------------------------------------------------------------------

/// Capacity-1 reply slot carried by a command. The applier notifies it with
/// `try_send`, so delivery never blocks the apply loop.
pub type ReplyTx = mpsc::Sender<String>;

/// What gets submitted to the replicated log.
///
/// The reply slot is deliberately non-persistable: after a restart the log
/// layer replays committed entries from disk, and deserialization leaves
/// `reply` as `None`, the sentinel for "no live waiter on this process".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Command {
    pub kind: OpKind,
    pub key: String,
    /// Unused for Get.
    pub value: String,
    /// The server that accepted the RPC; replies are routed only there.
    pub origin: NodeId,
    pub request_id: RequestId,
    #[serde(skip)]
    pub reply: Option<ReplyTx>,
}

/// Messages delivered on the commit stream, in commit order.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    /// A command committed at `index`.
    Command { index: u64, command: Command },
    /// This replica's leadership or term moved on; commands accepted under
    /// the previous term may never commit at their assigned indices.
    TermChanged { term: u64 },
    /// State-machine snapshot covering everything up to `last_index`.
    Snapshot { last_index: u64, data: Vec<u8> },
}

/// Result of submitting a command. When `is_leader` is false nothing was
/// accepted and `index` is meaningless.
#[derive(Debug, Clone, Copy)]
pub struct StartAck {
    pub index: u64,
    pub term: u64,
    pub is_leader: bool,
}

// ---------------------------------------------------------------------------
// RaftLog trait
// Uses RPITIT (stable since Rust 1.75); the explicit `+ Send` bound on each
// future lets generic callers `.await` across task boundaries.
// ---------------------------------------------------------------------------

pub trait RaftLog: Send + Sync + 'static {
    /// Submit a command for replication. Non-blocking in the consensus
    /// sense: returns the prospective commit index, not the commit itself.
    fn start(
        &self,
        cmd: Command,
    ) -> impl std::future::Future<Output = Result<StartAck, LogError>> + Send;

    /// Approximate size of the persisted log, for the snapshot size trigger.
    fn persisted_bytes(&self) -> impl std::future::Future<Output = u64> + Send;

    /// Discard entries at or below `up_to`, retaining `snapshot` in their
    /// place.
    fn compact(
        &self,
        up_to: u64,
        snapshot: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), LogError>> + Send;

    /// Cooperative stop; subsequent `start` calls are refused.
    fn shutdown(&self) -> impl std::future::Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// MemLog — in-memory, single-node, commits without replication
// ---------------------------------------------------------------------------

fn encode<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, LogError> {
    bincode::serde::encode_to_vec(val, bincode::config::standard())
        .map_err(|e| LogError::Storage(e.to_string()))
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, LogError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| LogError::Storage(e.to_string()))
}

struct MemLogInner {
    next_index: u64,
    term: u64,
    is_leader: bool,
    auto_commit: bool,
    dead: bool,
    /// index → bincode-encoded command. Entries live here exactly as a
    /// persistent log would hold them, so replay naturally comes back
    /// without reply slots.
    entries: BTreeMap<u64, Vec<u8>>,
    /// Accepted but not yet committed (manual mode only). These still carry
    /// their live reply slots.
    held: VecDeque<(u64, Command)>,
    snapshot: Option<(u64, Vec<u8>)>,
}

/// In-memory `RaftLog` for a single node: every accepted command commits,
/// immediately in auto mode or when the test says so in manual mode.
///
/// Not a consensus implementation: it exists so the state machine and
/// request coordination above it can run (and be tested) against the real
/// interface, including scripted leadership churn and restart replay.
pub struct MemLog {
    apply_tx: mpsc::Sender<ApplyMsg>,
    inner: Mutex<MemLogInner>,
}

impl MemLog {
    /// Auto-commit log: every accepted command is committed on the spot.
    pub fn new(apply_tx: mpsc::Sender<ApplyMsg>) -> Self {
        Self::build(apply_tx, true, None, BTreeMap::new())
    }

    /// Manual log: accepted commands are held until `commit_next` or
    /// `commit_all`, exposing the window between acceptance and commit.
    pub fn manual(apply_tx: mpsc::Sender<ApplyMsg>) -> Self {
        Self::build(apply_tx, false, None, BTreeMap::new())
    }

    /// Rebuild a log from previously persisted state, as a restart would.
    pub fn from_persisted(
        apply_tx: mpsc::Sender<ApplyMsg>,
        snapshot: Option<(u64, Vec<u8>)>,
        entries: BTreeMap<u64, Vec<u8>>,
    ) -> Self {
        Self::build(apply_tx, true, snapshot, entries)
    }

    fn build(
        apply_tx: mpsc::Sender<ApplyMsg>,
        auto_commit: bool,
        snapshot: Option<(u64, Vec<u8>)>,
        entries: BTreeMap<u64, Vec<u8>>,
    ) -> Self {
        let last = entries
            .keys()
            .next_back()
            .copied()
            .max(snapshot.as_ref().map(|(idx, _)| *idx));
        MemLog {
            apply_tx,
            inner: Mutex::new(MemLogInner {
                next_index: last.unwrap_or(0) + 1,
                term: 1,
                is_leader: true,
                auto_commit,
                dead: false,
                entries,
                held: VecDeque::new(),
                snapshot,
            }),
        }
    }

    pub async fn set_leader(&self, is_leader: bool) {
        self.inner.lock().await.is_leader = is_leader;
    }

    /// Advance the term and step down. Held (uncommitted) commands are
    /// dropped, since a new leader's entries overwrite those indices, and
    /// the commit stream observes a `TermChanged`.
    pub async fn term_changed(&self) {
        let term = {
            let mut g = self.inner.lock().await;
            let inner = &mut *g;
            inner.term += 1;
            inner.is_leader = false;
            for (index, _) in inner.held.drain(..) {
                inner.entries.remove(&index);
            }
            inner.term
        };
        let _ = self.apply_tx.send(ApplyMsg::TermChanged { term }).await;
    }

    /// Commit the oldest held command, if any. Manual mode only.
    pub async fn commit_next(&self) -> bool {
        let next = self.inner.lock().await.held.pop_front();
        match next {
            Some((index, command)) => {
                let _ = self.apply_tx.send(ApplyMsg::Command { index, command }).await;
                true
            }
            None => false,
        }
    }

    /// Commit every held command, oldest first.
    pub async fn commit_all(&self) {
        while self.commit_next().await {}
    }

    /// The durable state a restart would start from.
    pub async fn persisted(&self) -> (Option<(u64, Vec<u8>)>, BTreeMap<u64, Vec<u8>>) {
        let g = self.inner.lock().await;
        (g.snapshot.clone(), g.entries.clone())
    }

    /// Re-deliver the persisted snapshot and every surviving entry on the
    /// commit stream, the way the log layer does after a restart. Replayed
    /// commands carry no reply slots.
    pub async fn replay(&self) -> Result<(), LogError> {
        let (snapshot, entries) = self.persisted().await;
        if let Some((last_index, data)) = snapshot {
            let _ = self.apply_tx.send(ApplyMsg::Snapshot { last_index, data }).await;
        }
        for (index, bytes) in entries {
            let command: Command = decode(&bytes)?;
            let _ = self.apply_tx.send(ApplyMsg::Command { index, command }).await;
        }
        Ok(())
    }
}

impl RaftLog for MemLog {
    async fn start(&self, cmd: Command) -> Result<StartAck, LogError> {
        let mut g = self.inner.lock().await;
        if g.dead {
            return Err(LogError::Shutdown);
        }
        if !g.is_leader {
            return Ok(StartAck { index: 0, term: g.term, is_leader: false });
        }
        let index = g.next_index;
        g.next_index += 1;
        g.entries.insert(index, encode(&cmd)?);
        let term = g.term;
        if g.auto_commit {
            let _ = self.apply_tx.send(ApplyMsg::Command { index, command: cmd }).await;
        } else {
            g.held.push_back((index, cmd));
        }
        Ok(StartAck { index, term, is_leader: true })
    }

    async fn persisted_bytes(&self) -> u64 {
        let g = self.inner.lock().await;
        g.entries.values().map(|e| e.len() as u64).sum()
    }

    async fn compact(&self, up_to: u64, snapshot: Vec<u8>) -> Result<(), LogError> {
        let mut g = self.inner.lock().await;
        g.entries.retain(|&index, _| index > up_to);
        g.snapshot = Some((up_to, snapshot));
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.lock().await.dead = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(client: u64, seq: u32, reply: Option<ReplyTx>) -> Command {
        Command {
            kind: OpKind::Put,
            key: "k".into(),
            value: "v".into(),
            origin: 0,
            request_id: RequestId { client, seq },
            reply,
        }
    }

    #[tokio::test]
    async fn auto_commit_assigns_increasing_indices() {
        let (tx, mut rx) = mpsc::channel(16);
        let log = MemLog::new(tx);

        for seq in 1..=3u32 {
            let ack = log.start(command(7, seq, None)).await.unwrap();
            assert!(ack.is_leader);
            assert_eq!(ack.index, seq as u64);
        }

        for expected in 1..=3u64 {
            match rx.recv().await.unwrap() {
                ApplyMsg::Command { index, command } => {
                    assert_eq!(index, expected);
                    assert_eq!(command.request_id.seq, expected as u32);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn follower_refuses_commands() {
        let (tx, mut rx) = mpsc::channel(16);
        let log = MemLog::new(tx);
        log.set_leader(false).await;

        let ack = log.start(command(1, 1, None)).await.unwrap();
        assert!(!ack.is_leader);
        assert!(rx.try_recv().is_err());
        assert_eq!(log.persisted_bytes().await, 0);
    }

    #[tokio::test]
    async fn manual_mode_holds_until_committed() {
        let (tx, mut rx) = mpsc::channel(16);
        let log = MemLog::manual(tx);

        log.start(command(1, 1, None)).await.unwrap();
        log.start(command(1, 2, None)).await.unwrap();
        assert!(rx.try_recv().is_err());

        assert!(log.commit_next().await);
        match rx.recv().await.unwrap() {
            ApplyMsg::Command { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected message: {other:?}"),
        }

        log.commit_all().await;
        match rx.recv().await.unwrap() {
            ApplyMsg::Command { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(!log.commit_next().await);
    }

    #[tokio::test]
    async fn term_change_drops_held_commands_and_notifies() {
        let (tx, mut rx) = mpsc::channel(16);
        let log = MemLog::manual(tx);

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        log.start(command(1, 1, Some(reply_tx))).await.unwrap();
        log.term_changed().await;

        match rx.recv().await.unwrap() {
            ApplyMsg::TermChanged { term } => assert_eq!(term, 2),
            other => panic!("unexpected message: {other:?}"),
        }
        // The held command is gone: its reply slot closed without a value.
        assert_eq!(reply_rx.recv().await, None);
        assert!(!log.commit_next().await);
        assert_eq!(log.persisted_bytes().await, 0);

        let ack = log.start(command(1, 1, None)).await.unwrap();
        assert!(!ack.is_leader, "stepped-down log must refuse commands");
    }

    #[tokio::test]
    async fn persisted_entries_lose_reply_slots() {
        let (tx, _rx) = mpsc::channel(16);
        let log = MemLog::new(tx);

        let (reply_tx, _reply_rx) = mpsc::channel(1);
        log.start(command(9, 4, Some(reply_tx))).await.unwrap();

        let (_, entries) = log.persisted().await;
        let restored: Command = decode(&entries[&1]).unwrap();
        assert_eq!(restored.request_id, RequestId { client: 9, seq: 4 });
        assert!(restored.reply.is_none());
    }

    #[tokio::test]
    async fn compact_then_replay_delivers_snapshot_and_tail() {
        let (tx, mut rx) = mpsc::channel(16);
        let log = MemLog::new(tx);

        for seq in 1..=4u32 {
            log.start(command(2, seq, None)).await.unwrap();
        }
        let full = log.persisted_bytes().await;
        log.compact(3, b"snap".to_vec()).await.unwrap();
        assert!(log.persisted_bytes().await < full);

        // Drain the four original commits.
        for _ in 0..4 {
            rx.recv().await.unwrap();
        }

        // Restart: rebuild from persisted state and replay.
        let (tx2, mut rx2) = mpsc::channel(16);
        let (snapshot, entries) = log.persisted().await;
        let restarted = MemLog::from_persisted(tx2, snapshot, entries);
        restarted.replay().await.unwrap();

        match rx2.recv().await.unwrap() {
            ApplyMsg::Snapshot { last_index, data } => {
                assert_eq!(last_index, 3);
                assert_eq!(data, b"snap");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match rx2.recv().await.unwrap() {
            ApplyMsg::Command { index, .. } => assert_eq!(index, 4),
            other => panic!("unexpected message: {other:?}"),
        }

        // New submissions pick up after the replayed tail.
        let ack = restarted.start(command(2, 5, None)).await.unwrap();
        assert_eq!(ack.index, 5);
    }

    #[tokio::test]
    async fn shutdown_refuses_further_commands() {
        let (tx, _rx) = mpsc::channel(16);
        let log = MemLog::new(tx);
        log.shutdown().await;
        assert!(matches!(
            log.start(command(1, 1, None)).await,
            Err(LogError::Shutdown)
        ));
    }
}
