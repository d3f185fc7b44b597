use std::sync::Arc;

use delta_sync::{Attachment, Coordinator, InMemoryAdapter, MutateOptions, SyncManager, SyncOptions};
use serde_json::json;

#[tokio::test]
async fn attachment_transfer_reports_missing_blob() {
    // Keep a handle to the same underlying storage before it's moved into
    // the Coordinator, so the test can corrupt a blob out from under it.
    let local_adapter = InMemoryAdapter::new();
    let local_adapter_handle = local_adapter.clone();

    let local = Arc::new(Coordinator::open(local_adapter).await.unwrap());
    let remote = Arc::new(Coordinator::open(InMemoryAdapter::new()).await.unwrap());
    let manager = SyncManager::new(Arc::clone(&local), Arc::clone(&remote), SyncOptions::default());

    local
        .put_bulk(
            "notes",
            vec![("m".to_string(), json!({ "text": "hi" }))],
            MutateOptions::default(),
        )
        .await
        .unwrap();

    let attachment = local
        .attach_file(
            "notes",
            "m",
            vec![1, 2, 3],
            "f.bin".to_string(),
            "application/octet-stream".to_string(),
            None,
        )
        .await
        .unwrap();

    local_adapter_handle.corrupt_blob(&attachment.id);

    let stats = manager.push().await.unwrap();
    assert_eq!(stats.attachments_missing, 1);
    assert_eq!(stats.attachments_sent, 0);

    let remote_blob = remote.download_files(&[attachment.id.clone()]).await.unwrap();
    assert_eq!(remote_blob[0].1, None);

    let local_metadata = local.attachment_metadata(&[attachment.id.clone()]).await.unwrap();
    assert!(local_metadata[0].1.missing_at.is_some());

    // Spec scenario 4: the pushed record's own attachment entry must show
    // missingAt > 0, not just the sender's side metadata store, so the
    // peer learns the blob is gone without a second round trip.
    let remote_record = remote.read_bulk("notes", &["m".to_string()]).await.unwrap();
    let remote_attachments: Vec<Attachment> =
        serde_json::from_value(remote_record[0].1["attachments"].clone()).unwrap();
    assert_eq!(remote_attachments.len(), 1);
    assert!(remote_attachments[0].missing_at.is_some());
}
