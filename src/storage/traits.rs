//! `StorageAdapter` — the contract an implementer satisfies to plug a
//! backing key-value store into DeltaSync (spec §4.1).
//!
//! Every method is `async`: adapter calls are the sync model's suspension
//! points (spec §5 — "any adapter call" may yield to the scheduler).
//! Failures are exception-like (`Result<T, Error>`); partial successes are
//! always encoded in the return value, never in the error channel.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Attachment, BulkFileResult, Payload};

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Paginated, order-stable scan of a store.
    async fn read_store(
        &self,
        store: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<(String, Payload)>, bool)>;

    /// Fetch by primary key. Missing ids are silently omitted.
    async fn read_bulk(&self, store: &str, ids: &[String]) -> Result<Vec<(String, Payload)>>;

    /// Upsert. Each item carries its own id. Returns the stored items.
    async fn put_bulk(&self, store: &str, items: Vec<(String, Payload)>) -> Result<Vec<(String, Payload)>>;

    /// Idempotent bulk delete. Deleting an absent id is a no-op.
    async fn delete_bulk(&self, store: &str, ids: &[String]) -> Result<()>;

    /// Remove all records in a store. Returns whether the store existed.
    async fn clear_store(&self, store: &str) -> Result<bool>;

    /// Enumerate existing namespaces.
    async fn list_stores(&self) -> Result<Vec<String>>;

    /// Bulk blob fetch. Missing blobs are `None` in the returned map.
    async fn read_files(&self, ids: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>>;

    /// Persist blobs. Returns one `Attachment` per successfully stored
    /// blob, in the same order; failures are omitted from the result.
    async fn save_files(&self, files: Vec<(String, Vec<u8>, Attachment)>) -> Result<Vec<Attachment>>;

    /// Bulk blob removal with per-id outcome.
    async fn delete_files(&self, ids: &[String]) -> Result<BulkFileResult>;
}

/// Lets a boxed trait object stand in for a concrete adapter, so the
/// Engine can hold an arbitrary remote adapter chosen at runtime
/// (`set_cloud_adapter`) behind the same `Coordinator<A>` machinery used
/// for a statically-typed local adapter.
#[async_trait]
impl StorageAdapter for Box<dyn StorageAdapter> {
    async fn read_store(
        &self,
        store: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<(String, Payload)>, bool)> {
        (**self).read_store(store, limit, offset).await
    }

    async fn read_bulk(&self, store: &str, ids: &[String]) -> Result<Vec<(String, Payload)>> {
        (**self).read_bulk(store, ids).await
    }

    async fn put_bulk(&self, store: &str, items: Vec<(String, Payload)>) -> Result<Vec<(String, Payload)>> {
        (**self).put_bulk(store, items).await
    }

    async fn delete_bulk(&self, store: &str, ids: &[String]) -> Result<()> {
        (**self).delete_bulk(store, ids).await
    }

    async fn clear_store(&self, store: &str) -> Result<bool> {
        (**self).clear_store(store).await
    }

    async fn list_stores(&self) -> Result<Vec<String>> {
        (**self).list_stores().await
    }

    async fn read_files(&self, ids: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        (**self).read_files(ids).await
    }

    async fn save_files(&self, files: Vec<(String, Vec<u8>, Attachment)>) -> Result<Vec<Attachment>> {
        (**self).save_files(files).await
    }

    async fn delete_files(&self, ids: &[String]) -> Result<BulkFileResult> {
        (**self).delete_files(ids).await
    }
}
