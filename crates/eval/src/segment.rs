use crate::{is_false, ops::Clause};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named set of users: explicit inclusion/exclusion lists plus rules.
/// Referenced from flag clauses via the `segmentMatch` operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Segment {
    pub key: String,
    pub version: u64,
    pub salt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SegmentRule>,
    #[serde(skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// A segment rule. Without `weight` the rule matches whenever its clauses
/// do; with `weight` membership is additionally gated on the user's bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentRule {
    pub clauses: Vec<Clause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
}
