use crate::is_false;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A single test applied to one user attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Clause {
    pub attribute: String,
    pub op: Op,
    pub values: Vec<Value>,
    #[serde(skip_serializing_if = "is_false")]
    pub negate: bool,
}

/// Clause operators. Operators this implementation does not recognize
/// deserialize as `Unknown` and match nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    In,
    EndsWith,
    StartsWith,
    Matches,
    Contains,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    SegmentMatch,
    #[serde(other)]
    #[default]
    Unknown,
}

impl Clause {
    /// Tests the clause against a resolved attribute value. `segmentMatch`
    /// is not dispatched here; in this context it matches nothing.
    pub(crate) fn matches_value(&self, user_value: &Value) -> bool {
        let matched = match user_value {
            Value::Array(elements) => elements.iter().any(|e| self.matches_scalar(e)),
            single => self.matches_scalar(single),
        };
        self.maybe_negate(matched)
    }

    fn matches_scalar(&self, user_value: &Value) -> bool {
        self.values.iter().any(|cv| apply(self.op, user_value, cv))
    }

    pub(crate) fn maybe_negate(&self, matched: bool) -> bool {
        matched != self.negate
    }
}

/// The operator table: `(user value, clause value) -> bool`.
///
/// Coercion is strict per operator. String operators require strings on
/// both sides, numeric operators numbers, and so on; a type mismatch (or
/// an unparsable regex, date, or version) matches nothing rather than
/// erroring.
pub(crate) fn apply(op: Op, user_value: &Value, clause_value: &Value) -> bool {
    match op {
        Op::In => strict_equal(user_value, clause_value),
        Op::StartsWith => str_op(user_value, clause_value, |u, c| u.starts_with(c)),
        Op::EndsWith => str_op(user_value, clause_value, |u, c| u.ends_with(c)),
        Op::Contains => str_op(user_value, clause_value, |u, c| u.contains(c)),
        Op::Matches => str_op(user_value, clause_value, |u, c| {
            regex::Regex::new(c).map(|re| re.is_match(u)).unwrap_or(false)
        }),
        Op::LessThan => num_op(user_value, clause_value, |u, c| u < c),
        Op::LessThanOrEqual => num_op(user_value, clause_value, |u, c| u <= c),
        Op::GreaterThan => num_op(user_value, clause_value, |u, c| u > c),
        Op::GreaterThanOrEqual => num_op(user_value, clause_value, |u, c| u >= c),
        Op::Before => time_op(user_value, clause_value, |u, c| u < c),
        Op::After => time_op(user_value, clause_value, |u, c| u > c),
        Op::SemVerEqual => semver_op(user_value, clause_value, Ordering::Equal),
        Op::SemVerLessThan => semver_op(user_value, clause_value, Ordering::Less),
        Op::SemVerGreaterThan => semver_op(user_value, clause_value, Ordering::Greater),
        // segmentMatch is routed by the evaluator, never through the table.
        Op::SegmentMatch | Op::Unknown => false,
    }
}

/// Equality for `in`: strict on type, numeric on value. `99` and `99.0`
/// are the same number; `"99"` and `99` are not equal.
fn strict_equal(u: &Value, c: &Value) -> bool {
    match (u, c) {
        (Value::Number(u), Value::Number(c)) => u.as_f64() == c.as_f64(),
        _ => u == c,
    }
}

fn str_op(u: &Value, c: &Value, f: impl Fn(&str, &str) -> bool) -> bool {
    match (u.as_str(), c.as_str()) {
        (Some(u), Some(c)) => f(u, c),
        _ => false,
    }
}

fn num_op(u: &Value, c: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    match (u.as_f64(), c.as_f64()) {
        (Some(u), Some(c)) => f(u, c),
        _ => false,
    }
}

fn time_op(u: &Value, c: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    match (parse_time(u), parse_time(c)) {
        (Some(u), Some(c)) => f(u, c),
        _ => false,
    }
}

/// Timestamps are RFC 3339 strings or numeric epoch milliseconds.
fn parse_time(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}

fn semver_op(u: &Value, c: &Value, ord: Ordering) -> bool {
    match (parse_semver(u), parse_semver(c)) {
        (Some(u), Some(c)) => u.cmp_precedence(&c) == ord,
        _ => false,
    }
}

/// Parses a version, zero-filling a missing minor or patch component so
/// that "2" and "2.5" compare as "2.0.0" and "2.5.0".
fn parse_semver(v: &Value) -> Option<semver::Version> {
    let s = v.as_str()?;
    if let Ok(version) = semver::Version::parse(s) {
        return Some(version);
    }
    let core_end = s
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(s.len());
    let (core, rest) = s.split_at(core_end);
    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}
