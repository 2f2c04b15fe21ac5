use crate::{AllData, DataKind, Item, Store};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Notification that the item under `(kind, key)` changed: created,
/// replaced by a newer version, or deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub kind: DataKind,
    pub key: String,
}

/// Decorates a [`Store`] with change notifications.
///
/// Every operation forwards to the inner store. After a change commits —
/// an `init` that alters visible contents, or an `upsert`/`delete` that
/// wins its version check — one [`Update`] per affected key is published.
/// Losing writes publish nothing.
pub struct StoreUpdates<S> {
    inner: S,
    tx: broadcast::Sender<Update>,
}

impl<S: Store> StoreUpdates<S> {
    pub fn new(inner: S) -> Self {
        let (tx, _) = broadcast::channel(256);
        StoreUpdates { inner, tx }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The full update feed.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.tx.subscribe()
    }

    /// The update feed narrowed to a single key.
    pub fn subscribe_key(
        &self,
        kind: DataKind,
        key: impl Into<String>,
    ) -> impl futures::Stream<Item = Update> {
        use futures::StreamExt;

        let key = key.into();
        tokio_stream::wrappers::BroadcastStream::new(self.tx.subscribe()).filter_map(
            move |update| {
                let keep = match &update {
                    Ok(update) => update.kind == kind && update.key == key,
                    // A lagged receiver dropped updates; nothing to replay.
                    Err(_) => false,
                };
                futures::future::ready(keep.then(|| update.ok()).flatten())
            },
        )
    }

    fn publish(&self, kind: DataKind, key: &str) {
        // Send fails only when nobody is subscribed.
        let _ = self.tx.send(Update {
            kind,
            key: key.to_string(),
        });
    }
}

impl<S: Store> Store for StoreUpdates<S> {
    fn init(&self, data: AllData) {
        let previous: Vec<(DataKind, HashMap<String, Item>)> = DataKind::ALL
            .iter()
            .map(|kind| (*kind, self.inner.all(*kind)))
            .collect();

        self.inner.init(data);

        // Diff visible contents and publish one update per difference.
        let mut published = 0usize;
        for (kind, old) in previous {
            let new = self.inner.all(kind);
            for (key, item) in &new {
                match old.get(key) {
                    Some(previous) if previous.version() == item.version() => {}
                    _ => {
                        self.publish(kind, key);
                        published += 1;
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    self.publish(kind, key);
                    published += 1;
                }
            }
        }
        tracing::debug!(published, "store replaced by init");
    }

    fn get(&self, kind: DataKind, key: &str) -> Option<Item> {
        self.inner.get(kind, key)
    }

    fn all(&self, kind: DataKind) -> HashMap<String, Item> {
        self.inner.all(kind)
    }

    fn upsert(&self, item: Item) -> bool {
        let kind = item.kind();
        let key = item.key().to_string();
        let applied = self.inner.upsert(item);
        if applied {
            self.publish(kind, &key);
        }
        applied
    }

    fn delete(&self, kind: DataKind, key: &str, version: u64) -> bool {
        let applied = self.inner.delete(kind, key, version);
        if applied {
            self.publish(kind, key);
        }
        applied
    }

    fn initialized(&self) -> bool {
        self.inner.initialized()
    }

    fn close(&self) {
        self.inner.close()
    }
}

impl<S: Store> eval::Lookup for StoreUpdates<S> {
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
    use crate::MemoryStore;
    use eval::Flag;

    fn flag(key: &str, version: u64) -> Flag {
        Flag {
            key: key.to_string(),
            version,
            ..Flag::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Update>) -> Vec<Update> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    #[test]
    fn winning_upserts_publish_and_losers_do_not() {
        let store = StoreUpdates::new(MemoryStore::new());
        let mut rx = store.subscribe();

        assert!(store.upsert(flag("f", 2).into()));
        assert!(!store.upsert(flag("f", 1).into()));
        assert!(!store.upsert(flag("f", 2).into()));
        assert!(store.upsert(flag("f", 3).into()));

        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 2);
        assert!(updates
            .iter()
            .all(|u| u.kind == DataKind::Features && u.key == "f"));
    }

    #[test]
    fn delete_publishes_once_and_downgrades_are_silent() {
        let store = StoreUpdates::new(MemoryStore::new());
        store.upsert(flag("f", 2).into());
        let mut rx = store.subscribe();

        assert!(store.delete(DataKind::Features, "f", 5));
        assert!(!store.delete(DataKind::Features, "f", 4));
        assert!(!store.upsert(flag("f", 5).into()));

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn init_publishes_the_difference() {
        let store = StoreUpdates::new(MemoryStore::new());
        store.init(AllData {
            flags: [
                ("kept".to_string(), flag("kept", 1)),
                ("changed".to_string(), flag("changed", 1)),
                ("removed".to_string(), flag("removed", 1)),
            ]
            .into(),
            segments: HashMap::new(),
        });

        let mut rx = store.subscribe();
        store.init(AllData {
            flags: [
                ("kept".to_string(), flag("kept", 1)),
                ("changed".to_string(), flag("changed", 2)),
                ("added".to_string(), flag("added", 1)),
            ]
            .into(),
            segments: HashMap::new(),
        });

        let mut keys: Vec<String> = drain(&mut rx).into_iter().map(|u| u.key).collect();
        keys.sort();
        assert_eq!(keys, ["added", "changed", "removed"]);
    }

    #[tokio::test]
    async fn subscribe_key_filters_the_feed() {
        use futures::StreamExt;

        let store = StoreUpdates::new(MemoryStore::new());
        let mut watched = Box::pin(store.subscribe_key(DataKind::Features, "wanted"));

        store.upsert(flag("noise", 1).into());
        store.upsert(flag("wanted", 1).into());
        store.upsert(flag("noise", 2).into());

        let update = watched.next().await.unwrap();
        assert_eq!(update.key, "wanted");
    }

    #[test]
    fn reads_pass_through() {
        let store = StoreUpdates::new(MemoryStore::new());
        assert!(!store.initialized());
        store.upsert(flag("f", 1).into());
        assert_eq!(store.get(DataKind::Features, "f").unwrap().version(), 1);
        assert_eq!(store.all(DataKind::Features).len(), 1);
    }
}
