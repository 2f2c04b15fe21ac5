mod kind;
mod memory;
mod updates;

pub use kind::DataKind;
pub use memory::MemoryStore;
pub use updates::{StoreUpdates, Update};

use eval::{Flag, Segment};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One stored value: a flag or a segment, shared immutably. The store
/// retains exclusive ownership of the item graph; readers get cheap
/// clones of the `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Flag(Arc<Flag>),
    Segment(Arc<Segment>),
}

impl Item {
    pub fn kind(&self) -> DataKind {
        match self {
            Item::Flag(_) => DataKind::Features,
            Item::Segment(_) => DataKind::Segments,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Item::Flag(flag) => &flag.key,
            Item::Segment(segment) => &segment.key,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Item::Flag(flag) => flag.version,
            Item::Segment(segment) => segment.version,
        }
    }

    /// True if the wire record was a tombstone (`deleted: true`).
    pub fn is_deleted(&self) -> bool {
        match self {
            Item::Flag(flag) => flag.deleted,
            Item::Segment(segment) => segment.deleted,
        }
    }

    /// Parses a wire record of the given kind.
    pub fn from_json(kind: DataKind, data: serde_json::Value) -> serde_json::Result<Item> {
        Ok(match kind {
            DataKind::Features => Item::Flag(Arc::new(serde_json::from_value(data)?)),
            DataKind::Segments => Item::Segment(Arc::new(serde_json::from_value(data)?)),
        })
    }
}

impl From<Flag> for Item {
    fn from(flag: Flag) -> Self {
        Item::Flag(Arc::new(flag))
    }
}

impl From<Segment> for Item {
    fn from(segment: Segment) -> Self {
        Item::Segment(Arc::new(segment))
    }
}

/// A full rule-data snapshot, as carried by the stream `put` event and the
/// polling endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AllData {
    #[serde(default)]
    pub flags: HashMap<String, Flag>,
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
}

/// The versioned `(kind, key)` cache that evaluation reads from.
///
/// All operations are synchronous and non-blocking; implementations
/// serialise reads and writes internally. `upsert` and `delete` are
/// atomic read-compare-write with a strict `>` version gate, and report
/// whether they won it. Tombstones retain their version for comparisons
/// but are invisible to `get` and `all`.
pub trait Store: Send + Sync {
    /// Atomically replaces all contents and marks the store initialized.
    fn init(&self, data: AllData);

    fn get(&self, kind: DataKind, key: &str) -> Option<Item>;

    /// All live (non-tombstoned) items of a kind.
    fn all(&self, kind: DataKind) -> HashMap<String, Item>;

    fn upsert(&self, item: Item) -> bool;

    fn delete(&self, kind: DataKind, key: &str, version: u64) -> bool;

    /// True once `init` has been called at least once.
    fn initialized(&self) -> bool;

    /// Releases held resources. A no-op for the in-memory store.
    fn close(&self);
}
