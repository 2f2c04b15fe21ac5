use crate::{AllData, DataKind, Item, Store};
use std::collections::HashMap;
use std::sync::Mutex;

/// A slot holds the highest version ever observed for a key. `item` is
/// `None` for a tombstone.
#[derive(Clone, Debug)]
struct Slot {
    version: u64,
    item: Option<Item>,
}

impl Slot {
    fn live(item: Item) -> Self {
        Slot {
            version: item.version(),
            item: Some(item),
        }
    }

    fn tombstone(version: u64) -> Self {
        Slot {
            version,
            item: None,
        }
    }
}

/// The in-memory [`Store`]. One mutex serialises every read and write;
/// reads clone out, so no lock is held while callers use the result.
pub struct MemoryStore {
    inner: Mutex<Shard>,
}

#[derive(Default)]
struct Shard {
    features: HashMap<String, Slot>,
    segments: HashMap<String, Slot>,
    initialized: bool,
}

impl Shard {
    fn namespace(&mut self, kind: DataKind) -> &mut HashMap<String, Slot> {
        match kind {
            DataKind::Features => &mut self.features,
            DataKind::Segments => &mut self.segments,
        }
    }

    fn namespace_ref(&self, kind: DataKind) -> &HashMap<String, Slot> {
        match kind {
            DataKind::Features => &self.features,
            DataKind::Segments => &self.segments,
        }
    }

    /// Strict `>`: downgrades and ties are silent no-ops, including a
    /// non-tombstone trying to overwrite a newer tombstone.
    fn apply(&mut self, kind: DataKind, key: &str, slot: Slot) -> bool {
        let namespace = self.namespace(kind);
        match namespace.get(key) {
            Some(stored) if slot.version <= stored.version => false,
            _ => {
                namespace.insert(key.to_string(), slot);
                true
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(Shard::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shard> {
        // A poisoned mutex means a panic mid-write; the store's state is
        // still versioned-consistent, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn init(&self, data: AllData) {
        let into_slot = |item: Item| {
            if item.is_deleted() {
                Slot::tombstone(item.version())
            } else {
                Slot::live(item)
            }
        };

        let features = data
            .flags
            .into_iter()
            .map(|(key, flag)| (key, into_slot(flag.into())))
            .collect();
        let segments = data
            .segments
            .into_iter()
            .map(|(key, segment)| (key, into_slot(segment.into())))
            .collect();

        let mut shard = self.lock();
        shard.features = features;
        shard.segments = segments;
        shard.initialized = true;
    }

    fn get(&self, kind: DataKind, key: &str) -> Option<Item> {
        let shard = self.lock();
        shard
            .namespace_ref(kind)
            .get(key)
            .and_then(|slot| slot.item.clone())
    }

    fn all(&self, kind: DataKind) -> HashMap<String, Item> {
        let shard = self.lock();
        shard
            .namespace_ref(kind)
            .iter()
            .filter_map(|(key, slot)| Some((key.clone(), slot.item.clone()?)))
            .collect()
    }

    fn upsert(&self, item: Item) -> bool {
        let kind = item.kind();
        let key = item.key().to_string();
        let slot = if item.is_deleted() {
            Slot::tombstone(item.version())
        } else {
            Slot::live(item)
        };
        self.lock().apply(kind, &key, slot)
    }

    fn delete(&self, kind: DataKind, key: &str, version: u64) -> bool {
        self.lock().apply(kind, key, Slot::tombstone(version))
    }

    fn initialized(&self) -> bool {
        self.lock().initialized
    }

    fn close(&self) {}
}

impl eval::Lookup for MemoryStore {
    fn flag(&self, key: &str) -> Option<std::sync::Arc<eval::Flag>> {
        match self.get(DataKind::Features, key) {
            Some(Item::Flag(flag)) => Some(flag),
            _ => None,
        }
    }

    fn segment(&self, key: &str) -> Option<std::sync::Arc<eval::Segment>> {
        match self.get(DataKind::Segments, key) {
            Some(Item::Segment(segment)) => Some(segment),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval::Flag;

    fn flag(key: &str, version: u64) -> Flag {
        Flag {
            key: key.to_string(),
            version,
            ..Flag::default()
        }
    }

    fn init_data(flags: Vec<Flag>) -> AllData {
        AllData {
            flags: flags.into_iter().map(|f| (f.key.clone(), f)).collect(),
            segments: HashMap::new(),
        }
    }

    #[test]
    fn not_initialized_until_init() {
        let store = MemoryStore::new();
        assert!(!store.initialized());
        store.init(AllData::default());
        assert!(store.initialized());
    }

    #[test]
    fn init_replaces_all_contents() {
        let store = MemoryStore::new();
        store.init(init_data(vec![flag("a", 1), flag("b", 1)]));
        store.init(init_data(vec![flag("b", 2)]));

        assert!(store.get(DataKind::Features, "a").is_none());
        let all = store.all(DataKind::Features);
        assert_eq!(all.len(), 1);
        assert_eq!(all["b"].version(), 2);
    }

    #[test]
    fn upsert_never_lowers_a_version() {
        let store = MemoryStore::new();
        assert!(store.upsert(flag("f", 5).into()));
        assert!(!store.upsert(flag("f", 4).into()));
        assert!(!store.upsert(flag("f", 5).into())); // ties lose too
        assert!(store.upsert(flag("f", 6).into()));
        assert_eq!(store.get(DataKind::Features, "f").unwrap().version(), 6);
    }

    #[test]
    fn tombstones_are_invisible_but_hold_their_version() {
        let store = MemoryStore::new();
        store.upsert(flag("f", 5).into());
        assert!(store.delete(DataKind::Features, "f", 7));

        assert!(store.get(DataKind::Features, "f").is_none());
        assert!(store.all(DataKind::Features).is_empty());

        // §8.2: an upsert at or below the tombstone's version is a no-op.
        assert!(!store.upsert(flag("f", 7).into()));
        assert!(store.get(DataKind::Features, "f").is_none());

        assert!(store.upsert(flag("f", 8).into()));
        assert_eq!(store.get(DataKind::Features, "f").unwrap().version(), 8);
    }

    #[test]
    fn delete_of_unknown_key_installs_a_tombstone() {
        let store = MemoryStore::new();
        assert!(store.delete(DataKind::Features, "ghost", 3));
        assert!(!store.upsert(flag("ghost", 2).into()));
        assert!(store.get(DataKind::Features, "ghost").is_none());
    }

    #[test]
    fn deleted_wire_records_act_as_tombstones() {
        let store = MemoryStore::new();
        let mut dead = flag("f", 9);
        dead.deleted = true;
        assert!(store.upsert(dead.into()));
        assert!(store.get(DataKind::Features, "f").is_none());
        assert!(!store.upsert(flag("f", 8).into()));
    }

    #[test]
    fn init_honours_deleted_records() {
        let store = MemoryStore::new();
        let mut dead = flag("gone", 3);
        dead.deleted = true;
        store.init(init_data(vec![flag("live", 1), dead]));

        assert!(store.get(DataKind::Features, "gone").is_none());
        assert_eq!(store.all(DataKind::Features).len(), 1);
        // The tombstone still wins version comparisons.
        assert!(!store.upsert(flag("gone", 2).into()));
    }

    #[test]
    fn version_is_max_of_observed_under_interleaving() {
        let store = MemoryStore::new();
        for version in [3_u64, 9, 1, 7, 9, 2] {
            store.upsert(flag("f", version).into());
        }
        assert_eq!(store.get(DataKind::Features, "f").unwrap().version(), 9);
    }

    #[test]
    fn lookup_views_flags_and_segments() {
        use eval::Lookup;

        let store = MemoryStore::new();
        store.upsert(flag("f", 1).into());
        store.upsert(
            eval::Segment {
                key: "s".into(),
                version: 1,
                ..eval::Segment::default()
            }
            .into(),
        );

        assert_eq!(store.flag("f").unwrap().key, "f");
        assert_eq!(store.segment("s").unwrap().key, "s");
        assert!(store.flag("s").is_none());
    }
}
