//! Per-key async mutexes.
//!
//! Each key gets its own `tokio::sync::Mutex<V>`, created on first use. The
//! map itself sits behind a short-lived std mutex that is never held across an
//! await point.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug)]
pub struct KeyedLocks<K, V> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<V>>>>,
}

impl<K, V> Default for KeyedLocks<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedLocks<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `key`, created with `V::default()` if absent.
    pub fn slot(&self, key: &K) -> Arc<AsyncMutex<V>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(V::default())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_shares_slot() {
        let locks: KeyedLocks<String, u32> = KeyedLocks::new();
        let a = locks.slot(&"s1".to_string());
        let b = locks.slot(&"s1".to_string());
        *a.lock().await += 1;
        assert_eq!(*b.lock().await, 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks: KeyedLocks<String, ()> = KeyedLocks::new();
        let a = locks.slot(&"s1".to_string());
        let _held = a.lock().await;
        let b = locks.slot(&"s2".to_string());
        assert!(b.try_lock().is_ok());
    }
}
