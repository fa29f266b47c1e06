//! Audio blob cache
//!
//! Short-lived store for generated speech, keyed by opaque id so stream
//! events can carry a reference instead of the payload. Entries expire after
//! a TTL and the cache never grows past a fixed entry count; every operation
//! runs under one mutex held only for the map mutation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

struct AudioEntry {
    bytes: Vec<u8>,
    mime: String,
    created: Instant,
}

/// Handle returned by `put`; events carry these two fields verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAudio {
    pub id: String,
    pub mime: String,
}

pub struct AudioStore {
    ttl: Duration,
    max_items: usize,
    entries: Mutex<HashMap<String, AudioEntry>>,
}

impl AudioStore {
    pub fn new(ttl: Duration, max_items: usize) -> Self {
        Self {
            ttl,
            max_items: max_items.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn mime_for_provider(provider: &str) -> &'static str {
        match provider.to_lowercase().as_str() {
            "elevenlabs" => "audio/mpeg",
            // Fish returns WAV in this stack
            _ => "audio/wav",
        }
    }

    /// Insert a blob, purging expired entries first and then evicting the
    /// oldest remaining entries until a slot is free.
    pub async fn put(&self, bytes: Vec<u8>, provider: &str) -> StoredAudio {
        let id = Uuid::new_v4().simple().to_string();
        let mime = Self::mime_for_provider(provider).to_string();
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now.duration_since(entry.created) <= self.ttl);

        while entries.len() >= self.max_items {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }

        entries.insert(
            id.clone(),
            AudioEntry {
                bytes,
                mime: mime.clone(),
                created: now,
            },
        );
        StoredAudio { id, mime }
    }

    /// Fetch a blob. An expired-but-unpurged entry is removed lazily and
    /// reported as absent.
    pub async fn get(&self, id: &str) -> Option<(Vec<u8>, String)> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(id) {
            Some(entry) => Instant::now().duration_since(entry.created) > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(id);
            return None;
        }
        entries
            .get(id)
            .map(|entry| (entry.bytes.clone(), entry.mime.clone()))
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = AudioStore::new(Duration::from_secs(60), 10);
        let payload = vec![1u8, 2, 3, 4];
        let stored = store.put(payload.clone(), "fish").await;
        assert_eq!(stored.mime, "audio/wav");

        let (bytes, mime) = store.get(&stored.id).await.unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(mime, "audio/wav");
    }

    #[tokio::test]
    async fn test_provider_mime_mapping() {
        let store = AudioStore::new(Duration::from_secs(60), 10);
        let stored = store.put(vec![0u8], "elevenlabs").await;
        assert_eq!(stored.mime, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_expired_entry_reports_not_found() {
        let store = AudioStore::new(Duration::from_millis(20), 10);
        let stored = store.put(vec![9u8], "fish").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(&stored.id).await.is_none());
        // Lazily removed on read.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_first() {
        let store = AudioStore::new(Duration::from_secs(60), 3);
        let first = store.put(vec![1], "fish").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.put(vec![2], "fish").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = store.put(vec![3], "fish").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fourth = store.put(vec![4], "fish").await;

        assert_eq!(store.len().await, 3);
        assert!(store.get(&first.id).await.is_none());
        assert!(store.get(&second.id).await.is_some());
        assert!(store.get(&third.id).await.is_some());
        assert!(store.get(&fourth.id).await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let store = AudioStore::new(Duration::from_secs(60), 10);
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = AudioStore::new(Duration::from_secs(60), 100);
        let a = store.put(vec![1], "fish").await;
        let b = store.put(vec![1], "fish").await;
        assert_ne!(a.id, b.id);
    }
}
