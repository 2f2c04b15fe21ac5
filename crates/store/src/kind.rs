/// The registry of data kinds the client caches. Each kind owns a
/// namespace in the store and a stream path prefix used to route `patch`
/// and `delete` events.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    Features,
    Segments,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Features, DataKind::Segments];

    pub fn namespace(self) -> &'static str {
        match self {
            DataKind::Features => "features",
            DataKind::Segments => "segments",
        }
    }

    pub fn stream_api_path(self) -> &'static str {
        match self {
            DataKind::Features => "/flags/",
            DataKind::Segments => "/segments/",
        }
    }

    /// Routes an event path like `/flags/my-flag` to its kind and key.
    pub fn for_path(path: &str) -> Option<(DataKind, &str)> {
        Self::ALL.iter().find_map(|kind| {
            path.strip_prefix(kind.stream_api_path())
                .map(|key| (*kind, key))
        })
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}
