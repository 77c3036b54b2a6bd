//! Persistent key-value storage abstraction.
//!
//! The engine only needs a flat namespace of string keys; the host supplies
//! the backing store (NVS on device, a file on desktop, memory in tests).

use std::collections::HashMap;

/// The narrow storage interface the protocol depends on.
pub trait KvStore {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&mut self, key: &str, value: &str);
    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&mut self, key: &str, value: i64);
    fn erase(&mut self, key: &str);
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.entries.get(key)?.parse().ok()
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn erase(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_erase() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get_string("k"), None);
        store.set_string("k", "v");
        assert_eq!(store.get_string("k").as_deref(), Some("v"));
        store.erase("k");
        assert_eq!(store.get_string("k"), None);
    }

    #[test]
    fn int_roundtrip() {
        let mut store = MemoryStore::new();
        store.set_int("n", -7);
        assert_eq!(store.get_int("n"), Some(-7));
        store.set_string("n", "not a number");
        assert_eq!(store.get_int("n"), None);
    }
}
