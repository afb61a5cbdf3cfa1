pub type NodeId = u64;
pub type ClientId = u64;

/// Per-client request counter. A client advances it only after the previous
/// request reached a definitive outcome, so the sequence numbers observed at
/// commit time are non-decreasing per client.
pub type SeqNumber = u32;

/// Identity of a logical client request, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RequestId {
    pub client: ClientId,
    pub seq: SeqNumber,
}

/// Operations replicated through the log. Get goes through the log as
/// well; that is what makes reads linearizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    Get,
    Put,
    Append,
}

/// Outcomes surfaced to clients. Everything here is safe to retry except
/// `StaleRequest`, which indicates the client reused a retired sequence
/// number.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("not the leader; retry elsewhere")]
    WrongLeader,
    #[error("leadership lost before commit")]
    LostLeadership,
    #[error("timed out waiting for commit")]
    Timeout,
    #[error("stale request: sequence {seq} superseded by {latest}")]
    StaleRequest { seq: SeqNumber, latest: SeqNumber },
}

/// Failures internal to the log layer, never shown to clients directly.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("log storage error: {0}")]
    Storage(String),
    #[error("log layer is shut down")]
    Shutdown,
}
