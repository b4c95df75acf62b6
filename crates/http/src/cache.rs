use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::executor::HttpResponse;

struct Entry {
    response: HttpResponse,
    expires_at: Instant,
    seq: u64,
}

/// TTL cache bounded by entry count. When full, expired entries go first,
/// then the oldest insertion.
pub struct ResponseCache {
    entries: HashMap<String, Entry>,
    max_entries: usize,
    seq: u64,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            seq: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<HttpResponse> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.response.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: String, response: HttpResponse, ttl: Duration) {
        if self.max_entries == 0 || ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.entries.retain(|_, e| e.expires_at > now);
            if self.entries.len() >= self.max_entries {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.seq += 1;
        self.entries.insert(
            key,
            Entry {
                response,
                expires_at: now + ttl,
                seq: self.seq,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let mut cache = ResponseCache::new(4);
        cache.insert("a".into(), ok("1"), Duration::from_millis(100));
        assert_eq!(cache.get("a"), Some(ok("1")));
        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let mut cache = ResponseCache::new(2);
        cache.insert("a".into(), ok("1"), Duration::from_secs(60));
        cache.insert("b".into(), ok("2"), Duration::from_secs(60));
        cache.insert("c".into(), ok("3"), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_expired_eviction() {
        let mut cache = ResponseCache::new(2);
        cache.insert("old".into(), ok("1"), Duration::from_secs(60));
        cache.insert("short".into(), ok("2"), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;
        cache.insert("new".into(), ok("3"), Duration::from_secs(60));
        assert!(cache.get("old").is_some());
        assert!(cache.get("new").is_some());
    }
}
