use mimir_types::LogError;

use crate::dedup::DedupTable;
use crate::store::Store;

/// Everything the state machine needs to resume from a snapshot: the store
/// and the dedup table travel together so replayed duplicates stay
/// detectable. Reply slots are structurally absent.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct SnapshotContents {
    pub snapshot_id: String,
    pub last_index: u64,
    pub store: Store,
    pub dedup: DedupTable,
}

pub(crate) fn encode_snapshot(
    last_index: u64,
    store: &Store,
    dedup: &DedupTable,
) -> Result<Vec<u8>, LogError> {
    let contents = SnapshotContents {
        snapshot_id: uuid::Uuid::new_v4().to_string(),
        last_index,
        store: store.clone(),
        dedup: dedup.clone(),
    };
    bincode::serde::encode_to_vec(&contents, bincode::config::standard())
        .map_err(|e| LogError::Storage(e.to_string()))
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotContents, LogError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(contents, _)| contents)
        .map_err(|e| LogError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip_restores_store_and_dedup() {
        let mut store = Store::new();
        store.put("a", "12");
        let mut dedup = DedupTable::new();
        dedup.record(5, 3, String::new());

        let bytes = encode_snapshot(9, &store, &dedup).unwrap();
        let restored = decode_snapshot(&bytes).unwrap();

        assert_eq!(restored.last_index, 9);
        assert_eq!(restored.store.get("a"), "12");
        assert_eq!(restored.dedup.replayed(5, 3), Some(String::new()));
        assert!(!restored.snapshot_id.is_empty());
    }
}
