//! `SyncManager` — drives a bidirectional sync round between two
//! Coordinators (spec §4.4).
//!
//! Push and pull are symmetric: each diffs the two views, groups the
//! relevant side's items into record changes and attachment transfers, and
//! applies them to the other side. A round never runs concurrently with
//! itself (`AtomicBool` guard) and every adapter round-trip goes through a
//! bounded retry/timeout wrapper, since adapters may be backed by flaky
//! network storage.

pub mod types;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::timeout;

use crate::coordinator::{Coordinator, MutateOptions};
use crate::error::{Error, Result};
use crate::storage::StorageAdapter;
use crate::types::{DataChangeSet, SyncViewItem};
use crate::view::SyncView;
pub use types::{SyncOptions, SyncOutcome, TransferStats};

/// A listener invoked with the changeSet a push or pull round just applied
/// (spec §4.4 push step 6, "Emit the 'pushed' callback with the
/// changeSet"). A `Vec`, not a single slot, for the same reason
/// `Coordinator`'s data-changed listeners are: one overwritable callback
/// field silently drops earlier subscribers.
pub type ChangeSetListener = Arc<dyn Fn(&[DataChangeSet]) + Send + Sync>;

pub struct SyncManager<L: StorageAdapter, R: StorageAdapter> {
    local: Arc<Coordinator<L>>,
    remote: Arc<Coordinator<R>>,
    options: RwLock<SyncOptions>,
    syncing: AtomicBool,
    pushed_listeners: RwLock<Vec<ChangeSetListener>>,
    pulled_listeners: RwLock<Vec<ChangeSetListener>>,
}

impl<L: StorageAdapter, R: StorageAdapter> SyncManager<L, R> {
    pub fn new(local: Arc<Coordinator<L>>, remote: Arc<Coordinator<R>>, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            options: RwLock::new(options),
            syncing: AtomicBool::new(false),
            pushed_listeners: RwLock::new(Vec::new()),
            pulled_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn set_options(&self, options: SyncOptions) {
        *self.options.write() = options;
    }

    /// Register a listener fired with the changeSet after a push round
    /// persists it on the remote side (spec §6, `onChangePushed`).
    pub fn on_pushed(&self, listener: ChangeSetListener) {
        self.pushed_listeners.write().push(listener);
    }

    /// Register a listener fired with the changeSet after a pull round
    /// persists it locally (spec §6, `onChangePulled`).
    pub fn on_pulled(&self, listener: ChangeSetListener) {
        self.pulled_listeners.write().push(listener);
    }

    fn notify_pushed(&self, change_sets: &[DataChangeSet]) {
        for listener in self.pushed_listeners.read().iter() {
            listener(change_sets);
        }
    }

    fn notify_pulled(&self, change_sets: &[DataChangeSet]) {
        for listener in self.pulled_listeners.read().iter() {
            listener(change_sets);
        }
    }

    fn options(&self) -> SyncOptions {
        self.options.read().clone()
    }

    fn acquire(&self) -> Result<SyncGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::SyncInProgress)?;
        Ok(SyncGuard { flag: &self.syncing })
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = self.options();
        let mut attempt = 0;
        loop {
            match timeout(options.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempt + 1 < options.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "sync operation failed, retrying");
                    tokio::time::sleep(options.retry_delay).await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempt + 1 < options.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "sync operation timed out, retrying");
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(_) => {
                    return Err(Error::AdapterUnavailable(
                        "timed out waiting for adapter".to_string(),
                    ))
                }
            }
        }
    }

    /// Push local-ahead items to the remote side.
    pub async fn push(&self) -> Result<TransferStats> {
        let _guard = self.acquire()?;
        let local_view = self.local.view_snapshot();
        let remote_view = self.remote.view_snapshot();
        let diff = SyncView::diff(&local_view, &remote_view);
        let moved = self.transfer(&self.local, &self.remote, diff.to_upload).await?;
        self.notify_pushed(&moved.change_sets);
        Ok(TransferStats {
            records_sent: moved.records,
            attachments_sent: moved.attachments,
            attachments_missing: moved.attachments_missing,
            ..Default::default()
        })
    }

    /// Pull remote-ahead items down to the local side.
    pub async fn pull(&self) -> Result<TransferStats> {
        let _guard = self.acquire()?;
        let local_view = self.local.view_snapshot();
        let remote_view = self.remote.view_snapshot();
        let diff = SyncView::diff(&local_view, &remote_view);
        let moved = self.transfer(&self.remote, &self.local, diff.to_download).await?;
        self.notify_pulled(&moved.change_sets);
        Ok(TransferStats {
            records_received: moved.records,
            attachments_received: moved.attachments,
            attachments_missing: moved.attachments_missing,
            ..Default::default()
        })
    }

    /// A full round: pull, then push. Pulling first means the local side
    /// has the peer's latest state before it pushes anything back, so a
    /// push never clobbers a remote record with stale local data at an
    /// equal or lower version (spec §4.4). Each half still acquires the
    /// exclusion guard independently, so a round never overlaps with
    /// another `push`/`pull`/`sync` call (spec §5's single syncing flag).
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let pull = self.pull().await?;
        let push = self.push().await?;
        Ok(SyncOutcome { push, pull })
    }

    /// Move `items` (already known to be ahead) from `from` to `to`,
    /// splitting record changes from attachment blobs per spec §4.4.
    /// Direction-neutral: `push`/`pull` attribute the counts to
    /// `sent`/`received` on the way out, since the two directions share
    /// this one implementation.
    async fn transfer<A: StorageAdapter, B: StorageAdapter>(
        &self,
        from: &Arc<Coordinator<A>>,
        to: &Arc<Coordinator<B>>,
        items: Vec<SyncViewItem>,
    ) -> Result<MovedCounts> {
        let batch_size = self.options().batch_size;
        let mut stats = MovedCounts::default();
        let (attachment_items, mut record_items): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|i| i.is_attachment);

        let (deletes, puts): (Vec<_>, Vec<_>) = attachment_items.into_iter().partition(|i| i.deleted);

        if !deletes.is_empty() {
            let ids: Vec<String> = deletes.iter().map(|i| i.id.clone()).collect();
            self.with_retry(|| to.delete_files(&ids)).await?;
        }

        // Attachment puts run before the record push below: a blob that
        // turns out missing here must land in the record-items batch with
        // `missing_at` already stamped, so the peer never sees a record
        // whose attachment entry claims an intact blob (spec §4.4).
        let mut patched_owners = Vec::new();

        for chunk in puts.chunks(batch_size) {
            let ids: Vec<String> = chunk.iter().map(|i| i.id.clone()).collect();
            let blobs = from.download_files(&ids).await?;
            let metadata = from.attachment_metadata(&ids).await?;
            let metadata_map: std::collections::HashMap<String, crate::types::Attachment> =
                metadata.into_iter().collect();

            let mut files = Vec::with_capacity(blobs.len());
            let mut missing_ids = Vec::new();
            for (id, bytes) in blobs {
                let Some(attachment) = metadata_map.get(&id).cloned() else {
                    continue;
                };
                match bytes {
                    Some(bytes) => files.push((id, bytes, attachment)),
                    None => {
                        tracing::warn!(attachment_id = %id, "attachment blob missing during sync");
                        stats.attachments_missing += 1;
                        missing_ids.push(id);
                    }
                }
            }

            if !missing_ids.is_empty() {
                let touched = from.mark_attachments_missing(&missing_ids).await?;
                patched_owners.extend(touched);
            }

            if !files.is_empty() {
                let count = files.len();
                self.with_retry(|| {
                    let files = files.clone();
                    async move {
                        to.adopt_attachments(files).await
                    }
                })
                .await?;
                stats.attachments += count;
            }
        }

        if !patched_owners.is_empty() {
            // `mark_attachments_missing` bumps the owning record to a fresh
            // version, so even an already-queued entry needs its stale
            // pre-bump `SyncViewItem` swapped out rather than left in place.
            let from_view = from.view_snapshot();
            for (store, id) in patched_owners {
                let Some(item) = from_view.get(&store, &id) else {
                    continue;
                };
                match record_items
                    .iter_mut()
                    .find(|existing| existing.store == store && existing.id == id)
                {
                    Some(existing) => *existing = item.clone(),
                    None => record_items.push(item.clone()),
                }
            }
        }

        for chunk in record_items.chunks(batch_size) {
            let change_sets = from.extract_changes(chunk).await?;
            let record_count: usize = change_sets.iter().map(|s| s.changes.len()).sum();
            self.with_retry(|| to.apply_changes(&change_sets, MutateOptions { silent: true }))
                .await?;
            stats.records += record_count;
            stats.change_sets.extend(change_sets);
        }

        Ok(stats)
    }
}

#[derive(Default)]
struct MovedCounts {
    records: usize,
    attachments: usize,
    attachments_missing: usize,
    change_sets: Vec<DataChangeSet>,
}

struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
