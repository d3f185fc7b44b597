//! Coordinator — the semantic gateway between application operations and
//! the underlying `StorageAdapter` (spec §4.3).
//!
//! Owns exactly one adapter and one `SyncView`, plus the reserved changes,
//! tombstone, attachment, and metadata namespaces. Every mutation mints a
//! fresh version, updates the view, journals a `DataChange`, and persists
//! the view before returning (spec §5: "callbacks fire after persistence").

pub mod version;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::StorageAdapter;
use crate::types::{
    Attachment, ChangeEvent, ChangeOp, DataChange, DataChangeSet, MaintenanceOptions, Page,
    Payload, QueryOptions, SyncViewItem, ATTACHMENTS_STORE, CHANGES_STORE, TOMBSTONES_STORE,
    VERSION_COUNTER_KEY, VIEW_SNAPSHOT_KEY,
};
use crate::view::SyncView;
use version::VersionSource;

/// Reserved store that holds the persisted view snapshot and version
/// counter. Distinct from `CHANGES_STORE`/`TOMBSTONES_STORE`/
/// `ATTACHMENTS_STORE` so a full `list_stores()` scan can skip all
/// reserved namespaces by a simple prefix check.
const META_STORE: &str = "__delta_sync_meta";

fn is_reserved(store: &str) -> bool {
    store.starts_with("__delta_sync_")
}

/// Per-call mutation options. `silent` suppresses the data-changed
/// callback — used when applying remote changes so the local application
/// does not see its own sync round echoed as a local edit (spec §4.3,
/// "Event contract").
#[derive(Debug, Clone, Copy, Default)]
pub struct MutateOptions {
    pub silent: bool,
}

pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type VersionListener = Arc<dyn Fn(u64) + Send + Sync>;

pub struct Coordinator<A: StorageAdapter> {
    adapter: A,
    view: RwLock<SyncView>,
    version: VersionSource,
    listeners: RwLock<Vec<Listener>>,
    version_listeners: RwLock<Vec<VersionListener>>,
}

impl<A: StorageAdapter> Coordinator<A> {
    /// Open a Coordinator over `adapter`, loading the persisted view if
    /// present and intact, or rebuilding it from scratch otherwise (spec
    /// §7, "View corruption... triggers rebuild_view; not an error
    /// surfaced to the caller").
    pub async fn open(adapter: A) -> Result<Self> {
        let meta = adapter
            .read_bulk(META_STORE, &[VIEW_SNAPSHOT_KEY.to_string(), VERSION_COUNTER_KEY.to_string()])
            .await?;
        let meta: HashMap<String, Value> = meta.into_iter().collect();

        let persisted_counter = meta
            .get(VERSION_COUNTER_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let coordinator = Coordinator {
            adapter,
            view: RwLock::new(SyncView::new()),
            version: VersionSource::new(persisted_counter),
            listeners: RwLock::new(Vec::new()),
            version_listeners: RwLock::new(Vec::new()),
        };

        match meta.get(VIEW_SNAPSHOT_KEY) {
            Some(snapshot) => match serde_json::from_value::<Vec<SyncViewItem>>(snapshot.clone()) {
                Ok(items) => {
                    coordinator.view.write().upsert_batch(items);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "persisted sync view is corrupt, rebuilding");
                    coordinator.rebuild_view().await?;
                }
            },
            None => {
                coordinator.rebuild_view().await?;
            }
        }

        Ok(coordinator)
    }

    /// A point-in-time snapshot of this Coordinator's view, for diffing
    /// against a peer (spec §4.4, "Snapshot local.view and remote.view").
    pub fn view_snapshot(&self) -> SyncView {
        self.view.read().clone()
    }

    pub fn register_listener(&self, listener: Listener) {
        self.listeners.write().push(listener);
    }

    /// The version watermark this Coordinator's next mutation will exceed.
    pub fn current_version(&self) -> u64 {
        self.version.current()
    }

    /// Fold in a version observed elsewhere, raising this Coordinator's
    /// version floor so its next mutation is guaranteed to exceed it. Used
    /// internally by `apply_changes`; exposed so a peer can be made to
    /// issue a strictly higher version than another independent
    /// `VersionSource` without relying on wall-clock ordering.
    pub fn observe_version(&self, version: u64) {
        self.version.observe(version);
    }

    /// Register a listener fired with the current version watermark
    /// whenever a mutation mints or observes a new one (spec §6,
    /// `onVersionUpdate`). Unlike the data-changed listener this fires
    /// regardless of `silent`, since a silently-applied remote change still
    /// moves this Coordinator's version floor.
    pub fn register_version_listener(&self, listener: VersionListener) {
        self.version_listeners.write().push(listener);
    }

    fn notify(&self, event: ChangeEvent, silent: bool) {
        if silent {
            return;
        }
        for listener in self.listeners.read().iter() {
            listener(&event);
        }
    }

    fn notify_version(&self) {
        let current = self.version.current();
        for listener in self.version_listeners.read().iter() {
            listener(current);
        }
    }

    async fn persist_state(&self) -> Result<()> {
        let items: Vec<SyncViewItem> = {
            let view = self.view.read();
            view.all_items()
        };
        let snapshot = serde_json::to_value(&items)?;
        let counter = Value::from(self.version.current());
        self.adapter
            .put_bulk(
                META_STORE,
                vec![
                    (VIEW_SNAPSHOT_KEY.to_string(), snapshot),
                    (VERSION_COUNTER_KEY.to_string(), counter),
                ],
            )
            .await?;
        Ok(())
    }

    async fn journal(&self, entries: Vec<DataChange>) -> Result<()> {
        let items: Vec<(String, Payload)> = entries
            .into_iter()
            .map(|change| {
                let id = format!("{}:{}:{}", change.store, change.id, change.version);
                (id, serde_json::to_value(&change).unwrap_or(Value::Null))
            })
            .collect();
        if !items.is_empty() {
            self.adapter.put_bulk(CHANGES_STORE, items).await?;
        }
        Ok(())
    }

    fn attachments_of(payload: &Payload) -> Vec<Attachment> {
        payload
            .get("attachments")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn put_bulk(
        &self,
        store: &str,
        items: Vec<(String, Payload)>,
        opts: MutateOptions,
    ) -> Result<Vec<(String, Payload)>> {
        if is_reserved(store) {
            return Err(Error::Adapter(format!("\"{store}\" is a reserved store name")));
        }

        let versions: Vec<u64> = items.iter().map(|_| self.version.next()).collect();
        let saved = self.adapter.put_bulk(store, items.clone()).await?;

        let mut changes = Vec::with_capacity(items.len());
        {
            let mut view = self.view.write();
            for ((id, payload), version) in items.iter().zip(&versions) {
                view.upsert(SyncViewItem {
                    store: store.to_string(),
                    id: id.clone(),
                    version: *version,
                    deleted: false,
                    is_attachment: false,
                });
                changes.push(DataChange {
                    id: id.clone(),
                    store: store.to_string(),
                    version: *version,
                    operation: ChangeOp::Put,
                    data: Some(payload.clone()),
                });
            }
        }

        self.journal(changes).await?;
        self.persist_state().await?;
        self.notify_version();

        let ids: Vec<String> = items.into_iter().map(|(id, _)| id).collect();
        self.notify(
            ChangeEvent::Put {
                store: store.to_string(),
                ids,
            },
            opts.silent,
        );

        Ok(saved)
    }

    pub async fn delete_bulk(&self, store: &str, ids: &[String], opts: MutateOptions) -> Result<()> {
        if is_reserved(store) {
            return Err(Error::Adapter(format!("\"{store}\" is a reserved store name")));
        }

        // Read first to discover attachments for cascade deletion (spec §9:
        // cascade is explicit only here and in `detach_file`).
        let existing = self.adapter.read_bulk(store, ids).await?;
        let existing_map: HashMap<String, Payload> = existing.into_iter().collect();

        self.adapter.delete_bulk(store, ids).await?;

        let mut changes = Vec::with_capacity(ids.len());
        let mut tombstone_records = Vec::with_capacity(ids.len());
        let now = Utc::now();
        {
            let mut view = self.view.write();
            for id in ids {
                let version = self.version.next();
                view.upsert(SyncViewItem {
                    store: store.to_string(),
                    id: id.clone(),
                    version,
                    deleted: true,
                    is_attachment: false,
                });
                changes.push(DataChange {
                    id: id.clone(),
                    store: store.to_string(),
                    version,
                    operation: ChangeOp::Delete,
                    data: None,
                });
                tombstone_records.push((
                    format!("{store}:{id}"),
                    serde_json::json!({
                        "store": store,
                        "id": id,
                        "version": version,
                        "deleted_at": now,
                    }),
                ));
            }
        }

        if !tombstone_records.is_empty() {
            self.adapter.put_bulk(TOMBSTONES_STORE, tombstone_records).await?;
        }
        self.journal(changes).await?;
        self.persist_state().await?;
        self.notify_version();

        // Cascade: drop blobs for any attachments the deleted records referenced.
        for id in ids {
            if let Some(payload) = existing_map.get(id) {
                let attachments = Self::attachments_of(payload);
                if !attachments.is_empty() {
                    let attachment_ids: Vec<String> = attachments.into_iter().map(|a| a.id).collect();
                    self.delete_files(&attachment_ids).await?;
                }
            }
        }

        self.notify(
            ChangeEvent::Delete {
                store: store.to_string(),
                ids: ids.to_vec(),
            },
            opts.silent,
        );

        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn read_bulk(&self, store: &str, ids: &[String]) -> Result<Vec<(String, Payload)>> {
        self.adapter.read_bulk(store, ids).await
    }

    pub async fn query(&self, store: &str, opts: QueryOptions) -> Result<Page<(String, Payload)>> {
        let mut items: Vec<SyncViewItem> = {
            let view = self.view.read();
            view.by_store(store, 0, None)
        };
        items.retain(|item| !item.deleted);
        if let Some(since) = opts.since {
            items.retain(|item| item.version > since);
        }
        if opts.descending {
            items.sort_by(|a, b| b.id.cmp(&a.id));
        }

        let total = items.len();
        let offset = opts.offset.unwrap_or(0).min(total);
        let end = match opts.limit {
            Some(limit) => (offset + limit).min(total),
            None => total,
        };
        let page_ids: Vec<String> = items[offset..end].iter().map(|i| i.id.clone()).collect();

        let records = self.adapter.read_bulk(store, &page_ids).await?;
        let by_id: HashMap<String, Payload> = records.into_iter().collect();
        let ordered: Vec<(String, Payload)> = page_ids
            .into_iter()
            .filter_map(|id| by_id.get(&id).map(|p| (id.clone(), p.clone())))
            .collect();

        Ok(Page {
            items: ordered,
            has_more: end < total,
        })
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    pub async fn upload_files(
        &self,
        files: Vec<(String, Vec<u8>, String, Option<Value>)>,
    ) -> Result<Vec<Attachment>> {
        let now = Utc::now();
        let prepared: Vec<(String, Vec<u8>, Attachment)> = files
            .into_iter()
            .map(|(filename, bytes, mime_type, metadata)| {
                let id = uuid::Uuid::new_v4().to_string();
                let attachment = Attachment {
                    id: id.clone(),
                    filename,
                    mime_type,
                    size: bytes.len() as u64,
                    created_at: now,
                    updated_at: now,
                    metadata,
                    missing_at: None,
                    owner_store: None,
                    owner_id: None,
                };
                (id, bytes, attachment)
            })
            .collect();

        let saved = self.adapter.save_files(prepared).await?;

        // Persist attachment metadata as an ordinary record too, separate
        // from the opaque blob itself, so it can be scanned back (rebuild)
        // or read by id (sync transfer) without assuming anything about how
        // the adapter stores blobs.
        let metadata_records: Vec<(String, Payload)> = saved
            .iter()
            .map(|a| (a.id.clone(), serde_json::to_value(a).unwrap_or(Value::Null)))
            .collect();
        if !metadata_records.is_empty() {
            self.adapter.put_bulk(ATTACHMENTS_STORE, metadata_records).await?;
        }

        {
            let mut view = self.view.write();
            for attachment in &saved {
                view.upsert(SyncViewItem {
                    store: ATTACHMENTS_STORE.to_string(),
                    id: attachment.id.clone(),
                    version: attachment.updated_at.timestamp_millis().max(0) as u64,
                    deleted: false,
                    is_attachment: true,
                });
            }
        }
        self.persist_state().await?;
        Ok(saved)
    }

    pub async fn download_files(&self, ids: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        self.adapter.read_files(ids).await
    }

    pub async fn delete_files(&self, ids: &[String]) -> Result<crate::types::BulkFileResult> {
        let result = self.adapter.delete_files(ids).await?;
        if !result.deleted.is_empty() {
            self.adapter.delete_bulk(ATTACHMENTS_STORE, &result.deleted).await?;
        }
        {
            let mut view = self.view.write();
            for id in &result.deleted {
                view.delete(ATTACHMENTS_STORE, id);
            }
        }
        self.persist_state().await?;
        Ok(result)
    }

    /// Adopt attachments transferred from a peer, preserving their id and
    /// version rather than minting fresh ones (spec §4.4's attachment
    /// protocol: the receiving side must not reassign identity).
    pub async fn adopt_attachments(&self, files: Vec<(String, Vec<u8>, Attachment)>) -> Result<()> {
        let mut metadata_records = Vec::with_capacity(files.len());
        let mut view_items = Vec::with_capacity(files.len());
        for (id, _, attachment) in &files {
            metadata_records.push((id.clone(), serde_json::to_value(attachment)?));
            view_items.push(SyncViewItem {
                store: ATTACHMENTS_STORE.to_string(),
                id: id.clone(),
                version: attachment.updated_at.timestamp_millis().max(0) as u64,
                deleted: false,
                is_attachment: true,
            });
        }

        self.adapter.save_files(files).await?;
        self.adapter.put_bulk(ATTACHMENTS_STORE, metadata_records).await?;
        {
            let mut view = self.view.write();
            for item in view_items {
                view.upsert(item);
            }
        }
        self.persist_state().await?;
        Ok(())
    }

    /// Read attachment metadata records by id, for sync transfer or display
    /// (spec §4.4's attachment protocol needs filename/mime alongside bytes).
    pub async fn attachment_metadata(&self, ids: &[String]) -> Result<Vec<(String, Attachment)>> {
        let records = self.adapter.read_bulk(ATTACHMENTS_STORE, ids).await?;
        Ok(records
            .into_iter()
            .filter_map(|(id, payload)| serde_json::from_value(payload).ok().map(|a| (id, a)))
            .collect())
    }

    /// Stamp `missing_at` on attachment metadata whose blob could not be
    /// read at transfer time, and on the same attachment's entry inside its
    /// owning record's `attachments` list, so the record itself carries the
    /// gap when it is pushed to a peer (spec §4.4: "Failed attachment ids on
    /// push are marked missingAt=now on the enclosing record's attachment
    /// list before the corresponding record changes are pushed"). Returns
    /// the `(store, id)` of every owning record patched this way, so the
    /// caller can fold them into the record changes it is about to push.
    pub async fn mark_attachments_missing(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut records = self.attachment_metadata(ids).await?;
        for (_, attachment) in &mut records {
            attachment.missing_at = Some(now);
        }

        let mut owners: HashMap<(String, String), Vec<Attachment>> = HashMap::new();
        for (_, attachment) in &records {
            if let (Some(store), Some(id)) = (&attachment.owner_store, &attachment.owner_id) {
                owners
                    .entry((store.clone(), id.clone()))
                    .or_default()
                    .push(attachment.clone());
            }
        }

        let mut touched = Vec::with_capacity(owners.len());
        for ((store, model_id), missing) in owners {
            let existing = self.adapter.read_bulk(&store, &[model_id.clone()]).await?;
            let Some((_, mut payload)) = existing.into_iter().next() else {
                continue;
            };
            let mut attachments = Self::attachments_of(&payload);
            for entry in &mut attachments {
                if missing.iter().any(|a| a.id == entry.id) {
                    entry.missing_at = Some(now);
                }
            }
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("attachments".to_string(), serde_json::to_value(&attachments)?);
            }
            // Go through `put_bulk` rather than a raw adapter write: the
            // owning record needs a fresh version and a view entry so this
            // same sync round's diff picks it up as something to push.
            self.put_bulk(&store, vec![(model_id.clone(), payload)], MutateOptions { silent: true })
                .await?;
            touched.push((store, model_id));
        }

        let updated: Vec<(String, Payload)> = records
            .into_iter()
            .map(|(id, a)| (id, serde_json::to_value(&a).unwrap_or(Value::Null)))
            .collect();
        if !updated.is_empty() {
            self.adapter.put_bulk(ATTACHMENTS_STORE, updated).await?;
        }
        Ok(touched)
    }

    /// Upload a blob and append it to `model_id`'s `attachments` list,
    /// re-saving the model under a new version (spec §4.3).
    pub async fn attach_file(
        &self,
        store: &str,
        model_id: &str,
        blob: Vec<u8>,
        filename: String,
        mime_type: String,
        metadata: Option<Value>,
    ) -> Result<Attachment> {
        let existing = self
            .adapter
            .read_bulk(store, &[model_id.to_string()])
            .await?;
        let (_, mut payload) = existing
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound {
                store: store.to_string(),
                id: model_id.to_string(),
            })?;

        let mut saved = self
            .upload_files(vec![(filename, blob, mime_type, metadata)])
            .await?;
        let mut attachment = saved.remove(0);
        attachment.owner_store = Some(store.to_string());
        attachment.owner_id = Some(model_id.to_string());
        self.adapter
            .put_bulk(
                ATTACHMENTS_STORE,
                vec![(attachment.id.clone(), serde_json::to_value(&attachment)?)],
            )
            .await?;

        let mut attachments = Self::attachments_of(&payload);
        attachments.push(attachment.clone());
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("attachments".to_string(), serde_json::to_value(&attachments)?);
        }

        self.put_bulk(
            store,
            vec![(model_id.to_string(), payload)],
            MutateOptions::default(),
        )
        .await?;

        Ok(attachment)
    }

    /// Remove an attachment from `model_id`'s list and delete its blob,
    /// re-saving the model under a new version.
    pub async fn detach_file(
        &self,
        store: &str,
        model_id: &str,
        attachment_id: &str,
    ) -> Result<Payload> {
        let existing = self
            .adapter
            .read_bulk(store, &[model_id.to_string()])
            .await?;
        let (_, mut payload) = existing
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound {
                store: store.to_string(),
                id: model_id.to_string(),
            })?;

        let attachments: Vec<Attachment> = Self::attachments_of(&payload)
            .into_iter()
            .filter(|a| a.id != attachment_id)
            .collect();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("attachments".to_string(), serde_json::to_value(&attachments)?);
        }

        self.delete_files(&[attachment_id.to_string()]).await?;

        let saved = self
            .put_bulk(
                store,
                vec![(model_id.to_string(), payload)],
                MutateOptions::default(),
            )
            .await?;

        Ok(saved.into_iter().next().map(|(_, p)| p).unwrap_or(Value::Null))
    }

    // ========================================================================
    // Sync-facing operations
    // ========================================================================

    /// Group SyncViewItems by store and produce a `DataChangeSet` per store,
    /// reading full payloads for puts from the adapter (spec §4.3).
    pub async fn extract_changes(&self, items: &[SyncViewItem]) -> Result<Vec<DataChangeSet>> {
        let mut by_store: HashMap<String, Vec<&SyncViewItem>> = HashMap::new();
        for item in items {
            if item.is_attachment {
                continue; // attachments move through SyncManager's blob transfer, not DataChangeSets
            }
            by_store.entry(item.store.clone()).or_default().push(item);
        }

        let mut sets = Vec::with_capacity(by_store.len());
        for (store, items) in by_store {
            let live_ids: Vec<String> = items
                .iter()
                .filter(|i| !i.deleted)
                .map(|i| i.id.clone())
                .collect();
            let payloads = self.adapter.read_bulk(&store, &live_ids).await?;
            let payload_map: HashMap<String, Payload> = payloads.into_iter().collect();

            let changes = items
                .into_iter()
                .map(|item| DataChange {
                    id: item.id.clone(),
                    store: store.clone(),
                    version: item.version,
                    operation: if item.deleted { ChangeOp::Delete } else { ChangeOp::Put },
                    data: if item.deleted {
                        None
                    } else {
                        payload_map.get(&item.id).cloned()
                    },
                })
                .collect();

            sets.push(DataChangeSet { store, changes });
        }
        Ok(sets)
    }

    /// Apply a peer's `DataChangeSet`s: writes deletes (with tombstones) and
    /// puts into the adapter, observing incoming versions so this
    /// Coordinator's own future versions stay ahead of anything it has seen
    /// (spec §4.3). Idempotent: applying the same set twice converges to
    /// the same state.
    pub async fn apply_changes(&self, change_sets: &[DataChangeSet], opts: MutateOptions) -> Result<()> {
        for set in change_sets {
            let store = &set.store;
            let mut puts = Vec::new();
            let mut deletes = Vec::new();

            for change in &set.changes {
                self.version.observe(change.version);
                match change.operation {
                    ChangeOp::Put => {
                        if let Some(data) = &change.data {
                            puts.push((change.id.clone(), data.clone()));
                        }
                    }
                    ChangeOp::Delete => deletes.push(change.id.clone()),
                }
            }

            if !puts.is_empty() {
                self.adapter.put_bulk(store, puts).await?;
            }
            if !deletes.is_empty() {
                self.adapter.delete_bulk(store, &deletes).await?;
            }

            let now = Utc::now();
            let mut tombstones = Vec::new();
            {
                let mut view = self.view.write();
                for change in &set.changes {
                    view.upsert(SyncViewItem {
                        store: store.clone(),
                        id: change.id.clone(),
                        version: change.version,
                        deleted: change.operation == ChangeOp::Delete,
                        is_attachment: false,
                    });
                    if change.operation == ChangeOp::Delete {
                        tombstones.push((
                            format!("{store}:{}", change.id),
                            serde_json::json!({
                                "store": store,
                                "id": change.id,
                                "version": change.version,
                                "deleted_at": now,
                            }),
                        ));
                    }
                }
            }
            if !tombstones.is_empty() {
                self.adapter.put_bulk(TOMBSTONES_STORE, tombstones).await?;
            }
            self.journal(set.changes.clone()).await?;
        }

        self.persist_state().await?;
        self.notify_version();

        for set in change_sets {
            let ids: Vec<String> = set.changes.iter().map(|c| c.id.clone()).collect();
            self.notify(
                ChangeEvent::Remote {
                    store: set.store.clone(),
                    ids,
                },
                opts.silent,
            );
        }
        Ok(())
    }

    /// Reconstruct the SyncView from scratch: every non-reserved store,
    /// the attachment store, and the tombstone store (spec §4.3). Used at
    /// startup when a persisted view is absent or corrupt.
    pub async fn rebuild_view(&self) -> Result<()> {
        let mut latest_change: HashMap<(String, String), DataChange> = HashMap::new();
        {
            let mut offset = 0usize;
            loop {
                let (page, has_more) = self.adapter.read_store(CHANGES_STORE, Some(500), offset).await?;
                for (_, payload) in &page {
                    if let Ok(change) = serde_json::from_value::<DataChange>(payload.clone()) {
                        let key = (change.store.clone(), change.id.clone());
                        let replace = match latest_change.get(&key) {
                            Some(existing) => change.version > existing.version,
                            None => true,
                        };
                        if replace {
                            latest_change.insert(key, change);
                        }
                    }
                }
                offset += page.len();
                if !has_more || page.is_empty() {
                    break;
                }
            }
        }

        let mut new_view = SyncView::new();

        {
            let mut offset = 0usize;
            loop {
                let (page, has_more) = self.adapter.read_store(TOMBSTONES_STORE, Some(500), offset).await?;
                for (_, payload) in &page {
                    let store = payload.get("store").and_then(|v| v.as_str()).unwrap_or_default();
                    let id = payload.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                    let version = payload.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
                    if !store.is_empty() && !id.is_empty() {
                        new_view.upsert(SyncViewItem {
                            store: store.to_string(),
                            id: id.to_string(),
                            version,
                            deleted: true,
                            is_attachment: false,
                        });
                    }
                }
                offset += page.len();
                if !has_more || page.is_empty() {
                    break;
                }
            }
        }

        for store in self.adapter.list_stores().await? {
            if is_reserved(&store) {
                continue;
            }
            let mut offset = 0usize;
            loop {
                let (page, has_more) = self.adapter.read_store(&store, Some(500), offset).await?;
                for (id, _) in &page {
                    let key = (store.clone(), id.clone());
                    let version = latest_change
                        .get(&key)
                        .map(|c| c.version)
                        .unwrap_or_else(|| self.version.next());
                    new_view.upsert(SyncViewItem {
                        store: store.clone(),
                        id: id.clone(),
                        version,
                        deleted: false,
                        is_attachment: false,
                    });
                }
                offset += page.len();
                if !has_more || page.is_empty() {
                    break;
                }
            }
        }

        {
            let mut offset = 0usize;
            loop {
                let (page, has_more) = self.adapter.read_store(ATTACHMENTS_STORE, Some(500), offset).await?;
                for (id, payload) in &page {
                    let version = payload
                        .get("updated_at")
                        .and_then(|v| v.as_str())
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.timestamp_millis().max(0) as u64)
                        .unwrap_or_else(|| self.version.next());
                    new_view.upsert(SyncViewItem {
                        store: ATTACHMENTS_STORE.to_string(),
                        id: id.clone(),
                        version,
                        deleted: false,
                        is_attachment: true,
                    });
                }
                offset += page.len();
                if !has_more || page.is_empty() {
                    break;
                }
            }
        }

        *self.view.write() = new_view;
        self.persist_state().await?;
        Ok(())
    }

    /// Walk the changes journal in batches, dropping entries whose
    /// referenced record no longer exists (a prior tombstone orphaned it);
    /// drop tombstones older than the retention window (spec §4.3, §8).
    pub async fn maintenance(&self, opts: MaintenanceOptions) -> Result<()> {
        let mut offset = 0usize;
        loop {
            let (page, has_more) = self
                .adapter
                .read_store(CHANGES_STORE, Some(opts.batch_size), offset)
                .await?;
            let mut stale = Vec::new();
            for (id, payload) in &page {
                if let Ok(change) = serde_json::from_value::<DataChange>(payload.clone()) {
                    let current = self.view.read().get(&change.store, &change.id).cloned();
                    let orphaned = match current {
                        None => true,
                        Some(item) => item.deleted,
                    };
                    if orphaned {
                        stale.push(id.clone());
                    }
                }
            }
            if !stale.is_empty() {
                self.adapter.delete_bulk(CHANGES_STORE, &stale).await?;
            }
            offset += page.len();
            if !has_more || page.is_empty() {
                break;
            }
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(opts.retention_secs);
        let mut offset = 0usize;
        loop {
            let (page, has_more) = self
                .adapter
                .read_store(TOMBSTONES_STORE, Some(opts.batch_size), offset)
                .await?;
            let mut expired_keys = Vec::new();
            let mut expired_view_keys = Vec::new();
            for (id, payload) in &page {
                let deleted_at = payload
                    .get("deleted_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                if deleted_at.map(|dt| dt < cutoff).unwrap_or(false) {
                    expired_keys.push(id.clone());
                    if let (Some(store), Some(record_id)) = (
                        payload.get("store").and_then(|v| v.as_str()),
                        payload.get("id").and_then(|v| v.as_str()),
                    ) {
                        expired_view_keys.push((store.to_string(), record_id.to_string()));
                    }
                }
            }
            if !expired_keys.is_empty() {
                self.adapter.delete_bulk(TOMBSTONES_STORE, &expired_keys).await?;
                let mut view = self.view.write();
                for (store, id) in expired_view_keys {
                    view.delete(&store, &id);
                }
            }
            offset += page.len();
            if !has_more || page.is_empty() {
                break;
            }
        }

        self.persist_state().await?;
        Ok(())
    }
}
