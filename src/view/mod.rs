//! `SyncView` — the in-memory index summarizing every known `(store, id)`
//! with its current version and deletion state (spec §4.2).
//!
//! Stored flat (not per-store maps within maps) with a secondary
//! `store -> sorted ids` index, per the spec's explicit sizing note so
//! that `store_size` stays O(1) rather than iterating the whole view.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{SyncKey, SyncViewItem, ATTACHMENTS_STORE};

#[derive(Debug, Default, Clone)]
pub struct SyncView {
    items: HashMap<SyncKey, SyncViewItem>,
    by_store: HashMap<String, BTreeSet<String>>,
}

/// Diff result: items the local side should upload, and items it should
/// download, ordered deterministically by `(store, id)` (spec §4.2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub to_upload: Vec<SyncViewItem>,
    pub to_download: Vec<SyncViewItem>,
}

/// Wire format for `serialize`/`deserialize` — a flat list keeps ordering
/// reproducible independent of `HashMap` iteration order.
#[derive(Serialize, Deserialize)]
struct Wire {
    items: Vec<SyncViewItem>,
}

impl SyncView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, item: SyncViewItem) {
        let key = item.key();
        self.by_store
            .entry(key.store.clone())
            .or_default()
            .insert(key.id.clone());
        self.items.insert(key, item);
    }

    pub fn upsert_batch(&mut self, items: impl IntoIterator<Item = SyncViewItem>) {
        for item in items {
            self.upsert(item);
        }
    }

    pub fn get(&self, store: &str, id: &str) -> Option<&SyncViewItem> {
        self.items.get(&SyncKey {
            store: store.to_string(),
            id: id.to_string(),
        })
    }

    /// Removes the entry outright. Not the same as tombstoning — a delete
    /// that should be visible to peers must `upsert` a `deleted: true`
    /// item instead (spec §4.2, "Tombstones inside SyncView").
    pub fn delete(&mut self, store: &str, id: &str) {
        let key = SyncKey {
            store: store.to_string(),
            id: id.to_string(),
        };
        self.items.remove(&key);
        if let Some(ids) = self.by_store.get_mut(store) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_store.remove(store);
            }
        }
    }

    /// Paginated, stable-order iteration of a single store.
    pub fn by_store(&self, store: &str, offset: usize, limit: Option<usize>) -> Vec<SyncViewItem> {
        let Some(ids) = self.by_store.get(store) else {
            return Vec::new();
        };
        let iter = ids.iter().skip(offset);
        let items: Vec<SyncViewItem> = match limit {
            Some(l) => iter.take(l).map(|id| self.get(store, id).unwrap().clone()).collect(),
            None => iter.map(|id| self.get(store, id).unwrap().clone()).collect(),
        };
        items
    }

    /// Every item in the view, reserved stores included — used when
    /// persisting a full snapshot.
    pub fn all_items(&self) -> Vec<SyncViewItem> {
        self.items.values().cloned().collect()
    }

    /// Names of all non-reserved stores with at least one entry.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_store
            .iter()
            .filter(|(name, ids)| name.as_str() != ATTACHMENTS_STORE && !ids.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn store_size(&self, store: &str) -> usize {
        self.by_store.get(store).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut items: Vec<SyncViewItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| (a.store.as_str(), a.id.as_str()).cmp(&(b.store.as_str(), b.id.as_str())));
        Ok(serde_json::to_vec(&Wire { items })?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = serde_json::from_slice(bytes)?;
        let mut view = Self::new();
        view.upsert_batch(wire.items);
        Ok(view)
    }

    /// Diff two views. For every key present in either: only-local means
    /// upload; only-remote means download; present in both compares
    /// versions; equal versions need no action (spec §4.2).
    ///
    /// O(|local| + |remote|); output is sorted by `(store, id)` so tests
    /// are deterministic.
    pub fn diff(local: &SyncView, remote: &SyncView) -> DiffResult {
        let mut to_upload = Vec::new();
        let mut to_download = Vec::new();

        for (key, local_item) in &local.items {
            match remote.items.get(key) {
                None => to_upload.push(local_item.clone()),
                Some(remote_item) => {
                    if local_item.version > remote_item.version {
                        to_upload.push(local_item.clone());
                    } else if local_item.version < remote_item.version {
                        to_download.push(remote_item.clone());
                    }
                }
            }
        }
        for (key, remote_item) in &remote.items {
            if !local.items.contains_key(key) {
                to_download.push(remote_item.clone());
            }
        }

        let order = |a: &SyncViewItem, b: &SyncViewItem| {
            (a.store.as_str(), a.id.as_str()).cmp(&(b.store.as_str(), b.id.as_str()))
        };
        to_upload.sort_by(order);
        to_download.sort_by(order);

        DiffResult { to_upload, to_download }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(store: &str, id: &str, version: u64, deleted: bool) -> SyncViewItem {
        SyncViewItem {
            store: store.to_string(),
            id: id.to_string(),
            version,
            deleted,
            is_attachment: false,
        }
    }

    #[test]
    fn upsert_and_get() {
        let mut view = SyncView::new();
        view.upsert(item("notes", "a", 1, false));
        assert_eq!(view.get("notes", "a").unwrap().version, 1);
        assert_eq!(view.size(), 1);
        assert_eq!(view.store_size("notes"), 1);
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let mut view = SyncView::new();
        view.upsert(item("notes", "a", 1, false));
        view.delete("notes", "a");
        assert!(view.get("notes", "a").is_none());
        assert_eq!(view.store_size("notes"), 0);
        assert!(view.stores().is_empty());
    }

    #[test]
    fn stores_excludes_attachment_store() {
        let mut view = SyncView::new();
        view.upsert(item("notes", "a", 1, false));
        view.upsert(item(ATTACHMENTS_STORE, "blob-1", 1, false));
        assert_eq!(view.stores(), vec!["notes".to_string()]);
    }

    #[test]
    fn by_store_paginates_in_stable_order() {
        let mut view = SyncView::new();
        for i in 0..5 {
            view.upsert(item("notes", &format!("id-{i}"), 1, false));
        }
        let page = view.by_store("notes", 0, Some(3));
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, "id-0");
        let page2 = view.by_store("notes", 3, Some(3));
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].id, "id-3");
    }

    #[test]
    fn round_trip_serialize() {
        let mut view = SyncView::new();
        view.upsert(item("notes", "a", 1, false));
        view.upsert(item("notes", "b", 2, true));
        let bytes = view.serialize().unwrap();
        let restored = SyncView::deserialize(&bytes).unwrap();
        assert_eq!(restored.size(), view.size());
        assert_eq!(restored.get("notes", "a"), view.get("notes", "a"));
        assert_eq!(restored.by_store("notes", 0, None), view.by_store("notes", 0, None));
        assert_eq!(restored.stores(), view.stores());
    }

    #[test]
    fn diff_only_local_uploads() {
        let mut local = SyncView::new();
        local.upsert(item("notes", "a", 1, false));
        let remote = SyncView::new();
        let d = SyncView::diff(&local, &remote);
        assert_eq!(d.to_upload.len(), 1);
        assert!(d.to_download.is_empty());
    }

    #[test]
    fn diff_only_remote_downloads() {
        let local = SyncView::new();
        let mut remote = SyncView::new();
        remote.upsert(item("notes", "a", 1, false));
        let d = SyncView::diff(&local, &remote);
        assert!(d.to_upload.is_empty());
        assert_eq!(d.to_download.len(), 1);
    }

    #[test]
    fn diff_prefers_higher_version() {
        let mut local = SyncView::new();
        local.upsert(item("notes", "a", 2, false));
        let mut remote = SyncView::new();
        remote.upsert(item("notes", "a", 1, false));
        let d = SyncView::diff(&local, &remote);
        assert_eq!(d.to_upload.len(), 1);
        assert!(d.to_download.is_empty());

        let d2 = SyncView::diff(&remote, &local);
        assert!(d2.to_upload.is_empty());
        assert_eq!(d2.to_download.len(), 1);
    }

    #[test]
    fn diff_equal_versions_no_action() {
        let mut local = SyncView::new();
        local.upsert(item("notes", "a", 1, false));
        let mut remote = SyncView::new();
        remote.upsert(item("notes", "a", 1, false));
        let d = SyncView::diff(&local, &remote);
        assert!(d.to_upload.is_empty());
        assert!(d.to_download.is_empty());
    }

    #[test]
    fn diff_is_symmetric_as_multisets() {
        let mut local = SyncView::new();
        local.upsert(item("notes", "a", 3, false));
        local.upsert(item("notes", "c", 1, false));
        let mut remote = SyncView::new();
        remote.upsert(item("notes", "b", 1, false));
        remote.upsert(item("notes", "c", 1, false));

        let fwd = SyncView::diff(&local, &remote);
        let rev = SyncView::diff(&remote, &local);
        assert_eq!(fwd.to_upload, rev.to_download);
        assert_eq!(fwd.to_download, rev.to_upload);
    }
}
