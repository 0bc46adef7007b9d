#![cfg(test)]
//! Shared test doubles for the KV seam.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::kv::memory::MemoryBackend;
use crate::kv::KvBackend;

/// A backend that can be told to misbehave: accept writes without storing
/// them (to trip write-verification) or fail reads outright.
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryBackend,
    swallow_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes report success but nothing is stored.
    pub fn swallow_writes(&self) {
        self.swallow_writes.store(true, Ordering::SeqCst);
    }

    /// Reads start failing with a simulated outage.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvBackend for FlakyKv {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.swallow_writes.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("simulated read outage");
        }
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.del(key).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        self.inner.srem(key, members).await
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.inner.smembers(key).await
    }
}
