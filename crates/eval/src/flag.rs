use crate::{is_false, ops::Clause};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A feature flag as delivered on the wire.
///
/// Unknown fields are retained in `extra` so that stored items round-trip
/// without being stripped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Flag {
    pub key: String,
    pub version: u64,
    pub on: bool,
    pub variations: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub off_variation: Option<usize>,
    pub fallthrough: VariationOrRollout,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<FlagRule>,
    pub salt: String,
    #[serde(skip_serializing_if = "is_false")]
    pub track_events: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<u64>,
    #[serde(skip_serializing_if = "is_false")]
    pub client_side: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// Another flag which must be on and serving a specific variation for the
/// referencing flag's non-off paths to apply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// An explicit list of user keys pinned to one variation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Target {
    pub variation: usize,
    pub values: Vec<String>,
}

/// An ordered rule: all clauses must match, and the first matching rule
/// selects its variation or rollout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlagRule {
    pub id: String,
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
}

/// Either a fixed variation index or a weighted rollout over variations.
/// Both fields absent is the malformed case.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariationOrRollout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<Rollout>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rollout {
    pub variations: Vec<WeightedVariation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
}

/// One band of a rollout. `weight` is in units of 1/100,000.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeightedVariation {
    pub variation: usize,
    pub weight: i64,
}

impl VariationOrRollout {
    pub fn variation(variation: usize) -> Self {
        Self {
            variation: Some(variation),
            rollout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flag_parses_with_defaults() {
        let flag: Flag = serde_json::from_value(json!({
            "key": "f",
            "version": 3,
        }))
        .unwrap();
        assert_eq!(flag.key, "f");
        assert_eq!(flag.version, 3);
        assert!(!flag.on);
        assert!(flag.variations.is_empty());
        assert_eq!(flag.off_variation, None);
        assert!(flag.prerequisites.is_empty());
    }

    #[test]
    fn rule_flattens_variation_or_rollout() {
        let rule: FlagRule = serde_json::from_value(json!({
            "id": "r1",
            "clauses": [],
            "variation": 2,
        }))
        .unwrap();
        assert_eq!(rule.variation_or_rollout.variation, Some(2));

        let rule: FlagRule = serde_json::from_value(json!({
            "id": "r2",
            "clauses": [],
            "rollout": {"variations": [{"variation": 0, "weight": 100000}]},
        }))
        .unwrap();
        let rollout = rule.variation_or_rollout.rollout.unwrap();
        assert_eq!(rollout.variations[0].weight, 100000);
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "key": "f",
            "version": 1,
            "on": true,
            "variations": [true, false],
            "offVariation": 1,
            "fallthrough": {"variation": 0},
            "salt": "abc",
            "futureField": {"nested": [1, 2, 3]},
        });
        let flag: Flag = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(flag.extra.get("futureField"), Some(&json!({"nested": [1, 2, 3]})));
        assert_eq!(serde_json::to_value(&flag).unwrap(), raw);
    }
}
