use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::modules::error::RustBulkResult;
use crate::modules::queue::QueueBackend;

/// In-process queue backend with Redis list/hash semantics, including
/// negative index handling for `LRANGE`/`LTRIM`. TTLs are accepted and
/// ignored; an embedded queue dies with the process anyway.
#[derive(Default)]
pub struct MemoryQueueBackend {
    lists: DashMap<String, Vec<String>>,
    hashes: DashMap<String, HashMap<String, String>>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a possibly-negative Redis index against a list length,
/// clamped into `[0, len]`.
fn resolve_index(index: i64, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs() as usize)
    } else {
        (index as usize).min(len)
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn rpush(&self, key: &str, value: String) -> RustBulkResult<()> {
        self.lists.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    async fn lpop(&self, key: &str) -> RustBulkResult<Option<String>> {
        Ok(self.lists.get_mut(key).and_then(|mut list| {
            if list.is_empty() {
                None
            } else {
                Some(list.remove(0))
            }
        }))
    }

    async fn llen(&self, key: &str) -> RustBulkResult<i64> {
        Ok(self.lists.get(key).map(|list| list.len() as i64).unwrap_or(0))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<Vec<String>> {
        Ok(self
            .lists
            .get(key)
            .map(|list| {
                let len = list.len();
                let start = resolve_index(start, len);
                let stop_inclusive = if stop < 0 {
                    resolve_index(stop, len)
                } else {
                    (stop as usize).min(len.saturating_sub(1))
                };
                if start > stop_inclusive || len == 0 {
                    vec![]
                } else {
                    list[start..=stop_inclusive.min(len - 1)].to_vec()
                }
            })
            .unwrap_or_default())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<()> {
        if let Some(mut list) = self.lists.get_mut(key) {
            let len = list.len();
            let start = resolve_index(start, len);
            let stop_inclusive = if stop < 0 {
                resolve_index(stop, len)
            } else {
                (stop as usize).min(len.saturating_sub(1))
            };
            if start > stop_inclusive || len == 0 {
                list.clear();
            } else {
                let kept: Vec<String> = list[start..=stop_inclusive.min(len - 1)].to_vec();
                *list = kept;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> RustBulkResult<()> {
        self.lists.remove(key);
        self.hashes.remove(key);
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> RustBulkResult<()> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> RustBulkResult<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|hash| hash.clone()).unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> RustBulkResult<i64> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, _key: &str, _seconds: u64) -> RustBulkResult<()> {
        Ok(())
    }
}
