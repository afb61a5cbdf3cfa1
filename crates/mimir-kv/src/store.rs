use std::collections::HashMap;

/// In-memory key/value state. The applier task is the sole mutator; reads
/// travel through the log as Get commands, so there is no read path around
/// the applier's serialization.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Store {
    map: HashMap<String, String>,
}

impl Store {
    pub fn new() -> Self {
        Store { map: HashMap::new() }
    }

    /// Missing keys read as the empty string and never create an entry.
    pub fn get(&self, key: &str) -> String {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }

    /// Appending to an absent key behaves as a put of the suffix.
    pub fn append(&mut self, key: &str, suffix: &str) {
        self.map.entry(key.to_string()).or_default().push_str(suffix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites() {
        let mut store = Store::new();
        store.put("a", "1");
        store.put("a", "2");
        assert_eq!(store.get("a"), "2");
    }

    #[test]
    fn append_concatenates() {
        let mut store = Store::new();
        store.put("a", "1");
        store.append("a", "2");
        assert_eq!(store.get("a"), "12");
    }

    #[test]
    fn append_to_absent_key_acts_as_put() {
        let mut store = Store::new();
        store.append("a", "x");
        assert_eq!(store.get("a"), "x");
    }

    #[test]
    fn get_of_absent_key_is_empty() {
        let store = Store::new();
        assert_eq!(store.get("missing"), "");
    }
}
