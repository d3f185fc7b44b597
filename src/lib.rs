//! DeltaSync — an offline-first, bidirectional key-value synchronization
//! core. Applications own their storage adapter and wire it through
//! [`Engine`]; DeltaSync tracks every mutation with monotonic versions,
//! keeps a local [`view::SyncView`] summary, and reconciles a local and a
//! remote [`coordinator::Coordinator`] through [`sync::SyncManager`].

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod storage;
pub mod sync;
pub mod types;
pub mod view;

pub use coordinator::{Coordinator, MutateOptions};
pub use engine::Engine;
pub use error::{Error, Result};
pub use storage::{InMemoryAdapter, StorageAdapter};
pub use sync::{ChangeSetListener, SyncManager, SyncOptions, SyncOutcome, TransferStats};
pub use types::{
    Attachment, ChangeEvent, ChangeOp, DataChange, DataChangeSet, MaintenanceOptions, Page,
    Payload, QueryOptions, Status, SyncKey, SyncViewItem,
};
pub use view::SyncView;
