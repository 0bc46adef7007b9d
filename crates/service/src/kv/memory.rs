//! In-process fallback store.
//!
//! Same operation surface as the durable backend, held in plain maps behind
//! async locks. State lives for the process only and resets on restart;
//! that ephemerality is the documented contract of memory mode, not a
//! defect. When a durable backend is active this store doubles as its
//! write-through mirror so reads stay warm if the backend later drops out.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::KvBackend;

#[derive(Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.values.write().await.insert(key.to_string(), value.to_string());
    }

    pub async fn fetch(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> bool {
        let from_values = self.values.write().await.remove(key).is_some();
        let from_sets = self.sets.write().await.remove(key).is_some();
        from_values || from_sets
    }

    pub async fn set_add(&self, key: &str, members: &[String]) {
        let mut sets = self.sets.write().await;
        let bucket = sets.entry(key.to_string()).or_default();
        bucket.extend(members.iter().cloned());
    }

    pub async fn set_remove(&self, key: &str, members: &[String]) {
        let mut sets = self.sets.write().await;
        if let Some(bucket) = sets.get_mut(key) {
            for member in members {
                bucket.remove(member);
            }
            if bucket.is_empty() {
                sets.remove(key);
            }
        }
    }

    /// Members in lexical order, which keeps memory-mode listings stable.
    pub async fn set_members(&self, key: &str) -> Vec<String> {
        self.sets
            .read()
            .await
            .get(key)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.put(key, value).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.fetch(key).await)
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.remove(key).await)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        self.set_add(key, members).await;
        Ok(())
    }

    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        self.set_remove(key, members).await;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.set_members(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn value_crud_cycle() {
        let store = MemoryBackend::new();
        assert_eq!(store.fetch("k").await, None);
        store.put("k", "v1").await;
        store.put("k", "v2").await;
        assert_eq!(store.fetch("k").await.as_deref(), Some("v2"));
        assert!(store.remove("k").await);
        assert!(!store.remove("k").await);
    }

    #[tokio::test]
    async fn set_membership_and_ordering() {
        let store = MemoryBackend::new();
        store.set_add("idx", &["/b".into(), "/a".into(), "/a".into()]).await;
        assert_eq!(store.set_members("idx").await, vec!["/a", "/b"]);
        store.set_remove("idx", &["/a".into()]).await;
        assert_eq!(store.set_members("idx").await, vec!["/b"]);
        store.set_remove("idx", &["/b".into()]).await;
        assert!(store.set_members("idx").await.is_empty());
    }

    #[tokio::test]
    async fn del_clears_both_shapes() {
        let store = MemoryBackend::new();
        store.put("k", "v").await;
        store.set_add("k", &["m".into()]).await;
        assert!(store.remove("k").await);
        assert_eq!(store.fetch("k").await, None);
        assert!(store.set_members("k").await.is_empty());
    }
}
