//! In-process counter store. Entries expire lazily on access.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::CounterStore;

struct Entry {
    value: String,
    deadline: Instant,
}

#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("counter store mutex poisoned");
        let live = entries
            .get(key)
            .filter(|entry| entry.deadline > now)
            .and_then(|entry| entry.value.parse::<u64>().ok());
        match live {
            Some(count) => {
                let next = count + 1;
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = next.to_string();
                }
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        deadline: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("counter store mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("counter store mutex poisoned");
        Ok(entries
            .get(key)
            .filter(|entry| entry.deadline > now)
            .map(|entry| entry.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("counter store mutex poisoned");
        entries.remove(key);
        Ok(())
    }
}
