use std::collections::HashMap;

use mimir_types::{ClientId, SeqNumber};

/// Outcome of the frontend's pre-submission duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqCheck {
    /// Unseen sequence; submit to the log.
    Fresh,
    /// Exactly the last retired sequence for this client: answer from the
    /// cache without touching the log.
    Duplicate(String),
    /// Below the last retired sequence; the request is provably obsolete.
    Stale { latest: SeqNumber },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ClientRecord {
    seq: SeqNumber,
    result: String,
}

/// Per-client record of the highest applied sequence number and the result
/// it produced (the value for Get, empty for Put/Append). The pair lives in
/// one map value, so a concurrent reader sees either the pre- or the
/// post-update state, never a torn one.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DedupTable {
    clients: HashMap<ClientId, ClientRecord>,
}

impl DedupTable {
    pub fn new() -> Self {
        DedupTable { clients: HashMap::new() }
    }

    pub fn check(&self, client: ClientId, seq: SeqNumber) -> SeqCheck {
        match self.clients.get(&client) {
            None => SeqCheck::Fresh,
            Some(rec) if seq == rec.seq => SeqCheck::Duplicate(rec.result.clone()),
            Some(rec) if seq < rec.seq => SeqCheck::Stale { latest: rec.seq },
            Some(_) => SeqCheck::Fresh,
        }
    }

    /// Cached result if `seq` is already retired for `client`, used by the
    /// applier to skip log-level duplicates. Sequence numbers at commit are
    /// non-decreasing per client, so a committed sequence below the recorded
    /// one cannot occur.
    pub fn replayed(&self, client: ClientId, seq: SeqNumber) -> Option<String> {
        self.clients
            .get(&client)
            .filter(|rec| rec.seq == seq)
            .map(|rec| rec.result.clone())
    }

    pub fn record(&mut self, client: ClientId, seq: SeqNumber, result: String) {
        self.clients.insert(client, ClientRecord { seq, result });
    }
}
