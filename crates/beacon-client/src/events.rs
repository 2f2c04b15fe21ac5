use eval::{PrerequisiteEvent, Reason, User};
use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// An analytics event emitted by the client. Batching and delivery are
/// the sink's concern.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename = "feature", rename_all = "camelCase")]
    FeatureRequest {
        creation_date: u64,
        key: String,
        user: User,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variation: Option<usize>,
        default: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prereq_of: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        track_events: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug_events_until_date: Option<u64>,
    },
}

impl Event {
    pub(crate) fn feature_request(
        key: impl Into<String>,
        user: User,
        value: Option<Value>,
        variation: Option<usize>,
        default: Value,
        version: Option<u64>,
        reason: Option<Reason>,
        track_events: bool,
        debug_events_until_date: Option<u64>,
    ) -> Self {
        Event::FeatureRequest {
            creation_date: now_millis(),
            key: key.into(),
            user,
            value,
            variation,
            default,
            version,
            prereq_of: None,
            reason,
            track_events,
            debug_events_until_date,
        }
    }

    /// Wraps an engine prerequisite event for the sink.
    pub(crate) fn from_prerequisite(event: PrerequisiteEvent, with_reason: bool) -> Self {
        Event::FeatureRequest {
            creation_date: now_millis(),
            key: event.key,
            user: event.user,
            value: event.value,
            variation: event.variation_index,
            default: Value::Null,
            version: Some(event.version),
            prereq_of: Some(event.prereq_of),
            reason: with_reason.then_some(event.reason),
            track_events: false,
            debug_events_until_date: None,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The analytics boundary. The core hands events over and never blocks on
/// their delivery.
pub trait EventSink: Send + Sync {
    fn send_event(&self, event: Event);
    fn flush(&self);
    fn close(&self);
}

/// Discards everything. Used when `send_events` is off.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send_event(&self, _event: Event) {}
    fn flush(&self) {}
    fn close(&self) {}
}
