//! `InMemoryAdapter` — a minimal, fully in-memory `StorageAdapter`.
//!
//! This is reference/testing scaffolding, not a product feature (spec §1
//! scopes concrete adapter implementations out — applications bring their
//! own). It exists because the Coordinator and SyncManager are otherwise
//! untestable, and it is grounded directly in the teacher's
//! `MemoryMapped` backend: flat `collection -> (id -> record)` maps,
//! id-sorted pagination for deterministic scans ("HashMap iteration order
//! is arbitrary"), and `parking_lot::Mutex` interior mutability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::traits::StorageAdapter;
use crate::types::{Attachment, BulkFileResult, Payload};

#[derive(Default)]
struct Inner {
    stores: Mutex<HashMap<String, HashMap<String, Payload>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

/// Cheaply `Clone`-able: the underlying maps live behind an `Arc`, so a
/// clone taken before handing the adapter to a `Coordinator` (which takes
/// ownership) still observes and can manipulate the same storage — used by
/// tests that need to simulate storage failure underneath a running
/// Coordinator.
#[derive(Clone, Default)]
pub struct InMemoryAdapter {
    inner: Arc<Inner>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn read_store(
        &self,
        store: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<(String, Payload)>, bool)> {
        let stores = self.inner.stores.lock();
        let mut ids: Vec<&String> = match stores.get(store) {
            Some(map) => map.keys().collect(),
            None => return Ok((Vec::new(), false)),
        };
        ids.sort_unstable();

        let map = stores.get(store).unwrap();
        let total = ids.len();
        let start = offset.min(total);
        let end = match limit {
            Some(l) => (start + l).min(total),
            None => total,
        };

        let items: Vec<(String, Payload)> = ids[start..end]
            .iter()
            .map(|id| ((*id).clone(), map.get(*id).unwrap().clone()))
            .collect();
        let has_more = end < total;
        Ok((items, has_more))
    }

    async fn read_bulk(&self, store: &str, ids: &[String]) -> Result<Vec<(String, Payload)>> {
        let stores = self.inner.stores.lock();
        let Some(map) = stores.get(store) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }

    async fn put_bulk(
        &self,
        store: &str,
        items: Vec<(String, Payload)>,
    ) -> Result<Vec<(String, Payload)>> {
        let mut stores = self.inner.stores.lock();
        let map = stores.entry(store.to_string()).or_default();
        for (id, payload) in &items {
            map.insert(id.clone(), payload.clone());
        }
        Ok(items)
    }

    async fn delete_bulk(&self, store: &str, ids: &[String]) -> Result<()> {
        let mut stores = self.inner.stores.lock();
        if let Some(map) = stores.get_mut(store) {
            for id in ids {
                map.remove(id);
            }
        }
        Ok(())
    }

    async fn clear_store(&self, store: &str) -> Result<bool> {
        let mut stores = self.inner.stores.lock();
        Ok(stores.remove(store).is_some())
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        let stores = self.inner.stores.lock();
        Ok(stores
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn read_files(&self, ids: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        let blobs = self.inner.blobs.lock();
        Ok(ids
            .iter()
            .map(|id| (id.clone(), blobs.get(id).cloned()))
            .collect())
    }

    async fn save_files(
        &self,
        files: Vec<(String, Vec<u8>, Attachment)>,
    ) -> Result<Vec<Attachment>> {
        let mut blobs = self.inner.blobs.lock();
        let mut saved = Vec::with_capacity(files.len());
        for (id, bytes, attachment) in files {
            blobs.insert(id, bytes);
            saved.push(attachment);
        }
        Ok(saved)
    }

    async fn delete_files(&self, ids: &[String]) -> Result<BulkFileResult> {
        let mut blobs = self.inner.blobs.lock();
        let mut result = BulkFileResult::default();
        for id in ids {
            if blobs.remove(id).is_some() {
                result.deleted.push(id.clone());
            } else {
                result.failed.push((id.clone(), "blob not found".to_string()));
            }
        }
        Ok(result)
    }
}

/// Simulates storage failure for one store's blobs — used to exercise the
/// "missing attachment during sync" scenario (spec §8, scenario 4) without
/// a real filesystem.
impl InMemoryAdapter {
    pub fn corrupt_blob(&self, id: &str) {
        self.inner.blobs.lock().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_read() {
        let adapter = InMemoryAdapter::new();
        adapter
            .put_bulk("notes", vec![("a".into(), json!({"text": "hi"}))])
            .await
            .unwrap();
        let got = adapter.read_bulk("notes", &["a".into()]).await.unwrap();
        assert_eq!(got, vec![("a".to_string(), json!({"text": "hi"}))]);
    }

    #[tokio::test]
    async fn paginated_scan_is_stable() {
        let adapter = InMemoryAdapter::new();
        let items: Vec<_> = (0..150)
            .map(|i| (format!("page-{i}"), json!({"i": i})))
            .collect();
        adapter.put_bulk("notes", items).await.unwrap();

        let (first, has_more) = adapter.read_store("notes", Some(100), 0).await.unwrap();
        assert_eq!(first.len(), 100);
        assert!(has_more);

        let (second, has_more) = adapter.read_store("notes", Some(100), 100).await.unwrap();
        assert_eq!(second.len(), 50);
        assert!(!has_more);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let adapter = InMemoryAdapter::new();
        adapter.delete_bulk("notes", &["missing".into()]).await.unwrap();
        adapter.delete_bulk("notes", &["missing".into()]).await.unwrap();
    }

    #[tokio::test]
    async fn blob_roundtrip_and_missing() {
        let adapter = InMemoryAdapter::new();
        let attachment = Attachment {
            id: "b1".into(),
            filename: "f.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 3,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            metadata: None,
            missing_at: None,
        };
        adapter
            .save_files(vec![("b1".into(), vec![1, 2, 3], attachment)])
            .await
            .unwrap();
        let read = adapter.read_files(&["b1".into()]).await.unwrap();
        assert_eq!(read[0].1, Some(vec![1, 2, 3]));

        adapter.corrupt_blob("b1");
        let read = adapter.read_files(&["b1".into()]).await.unwrap();
        assert_eq!(read[0].1, None);
    }
}
