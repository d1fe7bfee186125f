use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Analytics responses keyed by query, valid for exactly one graph revision.
#[derive(Clone)]
pub struct AnalyticsCache {
    responses: Arc<DashMap<String, (u64, Value)>>,
    max_entries: usize,
}

impl AnalyticsCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            responses: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn get(&self, revision: u64, query: &str) -> Option<Value> {
        let key = self.hash_query(query);
        let entry = self.responses.get(&key)?;
        let (cached_revision, value) = entry.value();
        (*cached_revision == revision).then(|| value.clone())
    }

    pub fn set(&self, revision: u64, query: &str, response: Value) {
        if self.max_entries == 0 {
            return;
        }
        if self.responses.len() >= self.max_entries {
            // Stale revisions go first, then a quarter of what is left
            self.responses.retain(|_, (cached_revision, _)| *cached_revision == revision);
            if self.responses.len() >= self.max_entries {
                let to_remove: Vec<_> = self
                    .responses
                    .iter()
                    .take((self.max_entries / 4).max(1))
                    .map(|r| r.key().clone())
                    .collect();
                for key in to_remove {
                    self.responses.remove(&key);
                }
            }
        }
        let key = self.hash_query(query);
        self.responses.insert(key, (revision, response));
    }

    fn hash_query(&self, query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            responses_cached: self.responses.len(),
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub responses_cached: usize,
    pub max_entries: usize,
}
