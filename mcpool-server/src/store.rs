//! # Item Store
//!
//! Map from key to `(flags, data)` behind one lock. Good enough for tests
//! and load generation; there is no eviction or expiry.

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Stored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub flags: u32,
    pub data: Vec<u8>,
}

/// Thread-safe in-memory item map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<Vec<u8>, Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Item> {
        self.items.lock().get(key).cloned()
    }

    pub fn set(&self, key: Vec<u8>, item: Item) {
        self.items.lock().insert(key, item);
    }

    /// Drops every item.
    pub fn flush(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_flush() {
        let store = MemoryStore::new();
        store.set(b"alpha".to_vec(), Item { flags: 3, data: b"value".to_vec() });

        let item = store.get(b"alpha").unwrap();
        assert_eq!(item.flags, 3);
        assert_eq!(item.data, b"value");

        store.flush();
        assert!(store.get(b"alpha").is_none());
        assert!(store.is_empty());
    }
}
