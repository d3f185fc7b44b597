//! `Engine` — the thin outer API surface (spec §6).
//!
//! Wraps one local `Coordinator` and, once `set_cloud_adapter` is called,
//! a remote `Coordinator` plus the `SyncManager` that orchestrates between
//! the two. Kept minimal by design — this is glue over the Coordinator and
//! SyncManager, not new logic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::coordinator::{Coordinator, MutateOptions};
use crate::error::{Error, Result};
use crate::storage::StorageAdapter;
use crate::sync::{ChangeSetListener, SyncManager, SyncOptions, SyncOutcome};
use crate::types::{Attachment, ChangeEvent, DataChangeSet, Page, Payload, QueryOptions, Status};

type DynAdapter = Box<dyn StorageAdapter>;

struct RemoteHandle<L: StorageAdapter> {
    #[allow(dead_code)]
    coordinator: Arc<Coordinator<DynAdapter>>,
    manager: Arc<SyncManager<L, DynAdapter>>,
}

pub struct Engine<L: StorageAdapter> {
    local: Arc<Coordinator<L>>,
    remote: RwLock<Option<RemoteHandle<L>>>,
    sync_options: RwLock<SyncOptions>,
    status: RwLock<Status>,
    status_listeners: RwLock<Vec<Arc<dyn Fn(Status) + Send + Sync>>>,
    pushed_listeners: RwLock<Vec<ChangeSetListener>>,
    pulled_listeners: RwLock<Vec<ChangeSetListener>>,
    auto_sync: RwLock<Option<JoinHandle<()>>>,
}

impl<L: StorageAdapter + 'static> Engine<L> {
    pub async fn new(local_adapter: L) -> Result<Arc<Self>> {
        let local = Arc::new(Coordinator::open(local_adapter).await?);
        Ok(Arc::new(Self {
            local,
            remote: RwLock::new(None),
            sync_options: RwLock::new(SyncOptions::default()),
            status: RwLock::new(Status::Idle),
            status_listeners: RwLock::new(Vec::new()),
            pushed_listeners: RwLock::new(Vec::new()),
            pulled_listeners: RwLock::new(Vec::new()),
            auto_sync: RwLock::new(None),
        }))
    }

    pub fn status(&self) -> Status {
        *self.status.read()
    }

    pub fn on_status_update(&self, listener: Arc<dyn Fn(Status) + Send + Sync>) {
        self.status_listeners.write().push(listener);
    }

    pub fn on_change(&self, listener: Arc<dyn Fn(&ChangeEvent) + Send + Sync>) {
        self.local.register_listener(listener);
    }

    /// Recognized callback (spec §6, `onVersionUpdate`): fires with the
    /// local Coordinator's version watermark after any mutation mints or
    /// observes a new one.
    pub fn on_version_update(&self, listener: Arc<dyn Fn(u64) + Send + Sync>) {
        self.local.register_version_listener(listener);
    }

    /// Recognized callback (spec §6, `onChangePushed`): fires with the
    /// changeSet a push round just persisted on the remote side. Stored on
    /// the `Engine` rather than the `SyncManager` so registrations survive
    /// `disconnect_cloud`/`set_cloud_adapter` swapping the manager out.
    pub fn on_change_pushed(&self, listener: ChangeSetListener) {
        self.pushed_listeners.write().push(listener);
    }

    /// Recognized callback (spec §6, `onChangePulled`): fires with the
    /// changeSet a pull round just persisted locally.
    pub fn on_change_pulled(&self, listener: ChangeSetListener) {
        self.pulled_listeners.write().push(listener);
    }

    fn fire_pushed(&self, change_sets: &[DataChangeSet]) {
        for listener in self.pushed_listeners.read().iter() {
            listener(change_sets);
        }
    }

    fn fire_pulled(&self, change_sets: &[DataChangeSet]) {
        for listener in self.pulled_listeners.read().iter() {
            listener(change_sets);
        }
    }

    fn set_status(&self, status: Status) {
        *self.status.write() = status;
        for listener in self.status_listeners.read().iter() {
            listener(status);
        }
    }

    // ========================================================================
    // Record operations
    // ========================================================================

    pub async fn save(&self, store: &str, items: Vec<(String, Payload)>) -> Result<Vec<(String, Payload)>> {
        self.local.put_bulk(store, items, MutateOptions::default()).await
    }

    pub async fn delete(&self, store: &str, ids: &[String]) -> Result<()> {
        self.local.delete_bulk(store, ids, MutateOptions::default()).await
    }

    pub async fn query(&self, store: &str, options: QueryOptions) -> Result<Page<(String, Payload)>> {
        self.local.query(store, options).await
    }

    pub async fn attach(
        &self,
        store: &str,
        model_id: &str,
        blob: Vec<u8>,
        filename: String,
        mime_type: String,
        metadata: Option<Value>,
    ) -> Result<Attachment> {
        self.local
            .attach_file(store, model_id, blob, filename, mime_type, metadata)
            .await
    }

    pub async fn detach(&self, store: &str, model_id: &str, attachment_id: &str) -> Result<Payload> {
        self.local.detach_file(store, model_id, attachment_id).await
    }

    pub async fn read_file(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let mut results = self.local.download_files(&[id.to_string()]).await?;
        Ok(results.pop().and_then(|(_, blob)| blob))
    }

    // ========================================================================
    // Cloud wiring
    // ========================================================================

    pub async fn set_cloud_adapter(self: &Arc<Self>, adapter: impl StorageAdapter + 'static) -> Result<()> {
        let boxed: DynAdapter = Box::new(adapter);
        let coordinator = Arc::new(Coordinator::open(boxed).await?);
        let manager = Arc::new(SyncManager::new(
            Arc::clone(&self.local),
            Arc::clone(&coordinator),
            self.sync_options.read().clone(),
        ));

        let engine = Arc::clone(self);
        manager.on_pushed(Arc::new(move |sets: &[DataChangeSet]| engine.fire_pushed(sets)));
        let engine = Arc::clone(self);
        manager.on_pulled(Arc::new(move |sets: &[DataChangeSet]| engine.fire_pulled(sets)));

        *self.remote.write() = Some(RemoteHandle { coordinator, manager });
        self.set_status(Status::Idle);
        Ok(())
    }

    pub fn disconnect_cloud(&self) {
        self.disable_auto_sync();
        *self.remote.write() = None;
        self.set_status(Status::Offline);
    }

    pub fn update_sync_options(&self, options: SyncOptions) {
        if let Some(handle) = self.remote.read().as_ref() {
            handle.manager.set_options(options.clone());
        }
        *self.sync_options.write() = options;
    }

    // ========================================================================
    // Sync
    // ========================================================================

    pub async fn sync(&self) -> Result<SyncOutcome> {
        let manager = self.require_manager()?;
        self.set_status(Status::Operating);
        let result = manager.sync().await;
        self.finish_sync(&result);
        result
    }

    pub async fn push(&self) -> Result<crate::sync::TransferStats> {
        let manager = self.require_manager()?;
        self.set_status(Status::Uploading);
        let result = manager.push().await;
        self.finish_sync(&result);
        result
    }

    pub async fn pull(&self) -> Result<crate::sync::TransferStats> {
        let manager = self.require_manager()?;
        self.set_status(Status::Downloading);
        let result = manager.pull().await;
        self.finish_sync(&result);
        result
    }

    fn finish_sync<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.set_status(Status::Idle),
            Err(Error::SyncInProgress) => {}
            Err(e) => {
                tracing::warn!(error = %e, "sync round failed");
                self.set_status(Status::Error);
            }
        }
    }

    /// Clones the manager handle out from behind the lock so the caller
    /// never holds a `parking_lot` guard across an `.await` point.
    fn require_manager(&self) -> Result<Arc<SyncManager<L, DynAdapter>>> {
        self.remote
            .read()
            .as_ref()
            .map(|handle| Arc::clone(&handle.manager))
            .ok_or_else(|| Error::AdapterUnavailable("no cloud adapter set".to_string()))
    }

    /// Run periodic `sync()` calls on `interval` until `disable_auto_sync`
    /// is called. Spec §5: auto-sync reschedules itself after success or a
    /// retry delay; this reference scheduler just re-sleeps `interval`
    /// either way and relies on `SyncManager`'s own retry/timeout policy
    /// for individual failures.
    pub fn enable_auto_sync(self: &Arc<Self>, interval: Duration) {
        self.disable_auto_sync();
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if engine.remote.read().is_none() {
                    continue;
                }
                if let Err(e) = engine.sync().await {
                    tracing::warn!(error = %e, "auto-sync round failed");
                }
            }
        });
        *self.auto_sync.write() = Some(handle);
    }

    pub fn disable_auto_sync(&self) {
        if let Some(handle) = self.auto_sync.write().take() {
            handle.abort();
        }
    }
}
