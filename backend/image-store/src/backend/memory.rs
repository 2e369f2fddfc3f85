/// In-memory object storage
///
/// Counts every call so tests can assert how much remote traffic an
/// operation caused, and can be told to fail uploads or specific deletes.
use super::{ObjectBackend, ObjectHeaders};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub headers: ObjectHeaders,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: DashMap<String, StoredObject>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    heads: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
    fail_puts: AtomicBool,
    failing_deletes: DashSet<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without touching the counters
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, content_type: &str) {
        self.objects.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
                headers: ObjectHeaders::default(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|o| o.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        for counter in [&self.gets, &self.puts, &self.heads, &self.deletes, &self.lists] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Make every subsequent upload fail
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make deletes of `key` fail
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.failing_deletes.insert(key.into());
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        headers: &ObjectHeaders,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Remote(format!("PUT {key} rejected")));
        }
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                headers: headers.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.contains_key(key))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.contains(key) {
            return Err(StoreError::Remote(format!("DELETE {key} rejected")));
        }
        self.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "memory://{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}
