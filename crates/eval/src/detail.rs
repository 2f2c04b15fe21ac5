use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an evaluation chose its variation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Off,
    Fallthrough,
    TargetMatch,
    #[serde(rename_all = "camelCase")]
    RuleMatch { rule_index: usize, rule_id: String },
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    #[serde(rename_all = "camelCase")]
    Error { error_kind: ErrorKind },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ClientNotReady,
    FlagNotFound,
    UserNotSpecified,
    MalformedFlag,
    WrongType,
    Exception,
}

/// The complete result of one evaluation: the variation value, its index
/// in the flag's variation list, and the reason it was chosen. `value` is
/// `None` when no variation applies (e.g. off with no `offVariation`, or
/// an error); callers substitute their default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_index: Option<usize>,
    pub reason: Reason,
}

impl Detail {
    pub fn error(kind: ErrorKind) -> Self {
        Self {
            value: None,
            variation_index: None,
            reason: Reason::Error { error_kind: kind },
        }
    }

    /// Substitutes `default` for an absent value, leaving the reason as-is.
    pub fn or_default(mut self, default: &Value) -> Self {
        if self.value.is_none() && !default.is_null() {
            self.value = Some(default.clone());
        }
        self
    }
}
