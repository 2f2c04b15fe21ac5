use eval::{Detail, Flag, Reason};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Options for [`crate::Client::all_flags_state`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FlagsStateOptions {
    /// Restrict the snapshot to flags marked for client-side use.
    pub client_side_only: bool,
    /// Include evaluation reasons in the per-flag metadata.
    pub with_reasons: bool,
    /// Only include version and reason for flags with event tracking on.
    pub details_only_for_tracked_flags: bool,
}

/// A point-in-time snapshot of every flag's value and evaluation metadata
/// for one user, in the wire form consumed by client-side bootstrapping:
///
/// ```json
/// {"flag-a": true, "$flagsState": {"flag-a": {"version": 3, ...}}, "$valid": true}
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlagsState {
    valid: bool,
    values: BTreeMap<String, Value>,
    metadata: BTreeMap<String, FlagMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlagMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub track_events: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<u64>,
}

impl FlagsState {
    pub(crate) fn new() -> Self {
        FlagsState {
            valid: true,
            ..FlagsState::default()
        }
    }

    /// The state returned when the client has no usable flag data.
    pub(crate) fn invalid() -> Self {
        FlagsState::default()
    }

    pub(crate) fn add(&mut self, flag: &Flag, detail: &Detail, options: &FlagsStateOptions) {
        let tracked = flag.track_events || flag.debug_events_until_date.is_some();
        let include_details = !options.details_only_for_tracked_flags || tracked;

        self.values.insert(
            flag.key.clone(),
            detail.value.clone().unwrap_or(Value::Null),
        );
        self.metadata.insert(
            flag.key.clone(),
            FlagMetadata {
                version: include_details.then_some(flag.version),
                variation: detail.variation_index,
                reason: (options.with_reasons && include_details)
                    .then(|| detail.reason.clone()),
                track_events: flag.track_events,
                debug_events_until_date: flag.debug_events_until_date,
            },
        );
    }

    /// Whether the snapshot was produced from initialized flag data.
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn metadata(&self, key: &str) -> Option<&FlagMetadata> {
        self.metadata.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl Serialize for FlagsState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 2))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("$flagsState", &self.metadata)?;
        map.serialize_entry("$valid", &self.valid)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FlagsState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = serde_json::Map::deserialize(deserializer)?;

        let valid = matches!(raw.remove("$valid"), Some(Value::Bool(true)));
        let metadata = match raw.remove("$flagsState") {
            Some(value) => serde_json::from_value(value).map_err(serde::de::Error::custom)?,
            None => BTreeMap::new(),
        };

        Ok(FlagsState {
            valid,
            values: raw.into_iter().collect(),
            metadata,
        })
    }
}
