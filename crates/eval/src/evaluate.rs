use crate::{
    bucket::bucket_user,
    detail::{Detail, ErrorKind, Reason},
    flag::{Flag, FlagRule, VariationOrRollout},
    ops::{Clause, Op},
    segment::{Segment, SegmentRule},
    user::User,
    Error,
};
use serde_json::Value;
use std::sync::Arc;

/// Read access to the rule data an evaluation draws on.
///
/// The engine re-reads per prerequisite and per segment reference; it never
/// caches across lookups, so a store may be mutated concurrently and each
/// lookup still observes a consistent item.
pub trait Lookup {
    fn flag(&self, key: &str) -> Option<Arc<Flag>>;
    fn segment(&self, key: &str) -> Option<Arc<Segment>>;
}

/// Outcome of one [`evaluate`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    pub detail: Detail,
    /// Diagnostic fault, if the flag data was malformed. The detail already
    /// reflects it; this is for logging.
    pub error: Option<Error>,
    /// One event per prerequisite evaluation performed, in order.
    pub events: Vec<PrerequisiteEvent>,
}

/// Records that a prerequisite flag was evaluated while evaluating
/// `prereq_of`. Forwarded to the analytics pipeline by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct PrerequisiteEvent {
    pub key: String,
    pub version: u64,
    pub variation_index: Option<usize>,
    pub value: Option<Value>,
    pub prereq_of: String,
    pub user: User,
    pub reason: Reason,
}

/// Evaluates `flag` for `user` against the rule data in `store`.
///
/// Never panics and never fails: malformed data folds into an
/// `ERROR{MALFORMED_FLAG}` detail with the fault attached for logging.
/// Rule and clause iteration is loop-based; recursion happens only along
/// the prerequisite graph, where cycles are detected and terminated.
pub fn evaluate(flag: &Flag, user: &User, store: &dyn Lookup) -> EvalResult {
    let mut events = Vec::new();

    if user.key().is_empty() {
        return EvalResult {
            detail: Detail::error(ErrorKind::UserNotSpecified),
            error: None,
            events,
        };
    }

    let mut chain = Vec::new();
    let (detail, error) = eval_flag(flag, user, store, &mut chain, &mut events);
    EvalResult {
        detail,
        error,
        events,
    }
}

fn eval_flag(
    flag: &Flag,
    user: &User,
    store: &dyn Lookup,
    chain: &mut Vec<String>,
    events: &mut Vec<PrerequisiteEvent>,
) -> (Detail, Option<Error>) {
    if !flag.on {
        return off_detail(flag, Reason::Off);
    }

    // Prerequisites, in order; the first failure short-circuits to off.
    chain.push(flag.key.clone());
    let prereqs = check_prerequisites(flag, user, store, chain, events);
    chain.pop();
    if let Err((reason, error)) = prereqs {
        let (detail, off_error) = off_detail(flag, reason);
        return (detail, error.or(off_error));
    }

    // Individual user targeting.
    for target in &flag.targets {
        if target.values.iter().any(|v| v == user.key()) {
            return variation_detail(flag, target.variation, Reason::TargetMatch);
        }
    }

    // Rules: first match wins.
    for (rule_index, rule) in flag.rules.iter().enumerate() {
        if rule_matches(rule, user, store) {
            let reason = Reason::RuleMatch {
                rule_index,
                rule_id: rule.id.clone(),
            };
            return resolve_variation_or_rollout(flag, &rule.variation_or_rollout, user, reason);
        }
    }

    resolve_variation_or_rollout(flag, &flag.fallthrough, user, Reason::Fallthrough)
}

/// Ok if all prerequisites are satisfied; otherwise the failure reason and
/// any fault that bubbled out of a prerequisite's own evaluation.
fn check_prerequisites(
    flag: &Flag,
    user: &User,
    store: &dyn Lookup,
    chain: &mut Vec<String>,
    events: &mut Vec<PrerequisiteEvent>,
) -> Result<(), (Reason, Option<Error>)> {
    for p in &flag.prerequisites {
        let failed = Reason::PrerequisiteFailed {
            prerequisite_key: p.key.clone(),
        };

        if chain.iter().any(|k| k == &p.key) {
            tracing::warn!(flag = %flag.key, prerequisite = %p.key, "prerequisite cycle");
            return Err((failed, Some(Error::PrerequisiteCycle(p.key.clone()))));
        }

        // A missing prerequisite fails the flag and records no event.
        let Some(prereq_flag) = store.flag(&p.key) else {
            return Err((failed, None));
        };

        let (detail, error) = eval_flag(&prereq_flag, user, store, chain, events);

        events.push(PrerequisiteEvent {
            key: prereq_flag.key.clone(),
            version: prereq_flag.version,
            variation_index: detail.variation_index,
            value: detail.value.clone(),
            prereq_of: flag.key.clone(),
            user: user.clone(),
            reason: detail.reason.clone(),
        });

        let satisfied =
            error.is_none() && prereq_flag.on && detail.variation_index == Some(p.variation);
        if !satisfied {
            return Err((failed, error));
        }
    }
    Ok(())
}

fn off_detail(flag: &Flag, reason: Reason) -> (Detail, Option<Error>) {
    match flag.off_variation {
        Some(index) => variation_detail(flag, index, reason),
        None => (
            Detail {
                value: None,
                variation_index: None,
                reason,
            },
            None,
        ),
    }
}

fn variation_detail(flag: &Flag, index: usize, reason: Reason) -> (Detail, Option<Error>) {
    match flag.variations.get(index) {
        Some(value) => (
            Detail {
                value: Some(value.clone()),
                variation_index: Some(index),
                reason,
            },
            None,
        ),
        None => (
            Detail::error(ErrorKind::MalformedFlag),
            Some(Error::InvalidVariationIndex),
        ),
    }
}

fn resolve_variation_or_rollout(
    flag: &Flag,
    vr: &VariationOrRollout,
    user: &User,
    reason: Reason,
) -> (Detail, Option<Error>) {
    match variation_index_for(flag, vr, user) {
        Ok(index) => variation_detail(flag, index, reason),
        Err(error) => (Detail::error(ErrorKind::MalformedFlag), Some(error)),
    }
}

fn variation_index_for(flag: &Flag, vr: &VariationOrRollout, user: &User) -> Result<usize, Error> {
    if let Some(index) = vr.variation {
        return Ok(index);
    }
    let rollout = vr
        .rollout
        .as_ref()
        .filter(|r| !r.variations.is_empty())
        .ok_or(Error::MalformedVariationOrRollout)?;

    let bucket_by = rollout.bucket_by.as_deref().unwrap_or("key");
    let bucket = bucket_user(user, &flag.key, bucket_by, &flag.salt);

    let mut sum = 0.0;
    for wv in &rollout.variations {
        sum += wv.weight as f64 / 100_000.0;
        if bucket < sum {
            return Ok(wv.variation);
        }
    }
    // Rounding, or weights summing under 100%, can leave the bucket past
    // the final band; the last variation absorbs it.
    match rollout.variations.last() {
        Some(wv) => Ok(wv.variation),
        None => Err(Error::MalformedVariationOrRollout),
    }
}

/// A rule matches iff it has clauses and every clause matches.
fn rule_matches(rule: &FlagRule, user: &User, store: &dyn Lookup) -> bool {
    !rule.clauses.is_empty()
        && rule
            .clauses
            .iter()
            .all(|clause| clause_matches(clause, user, store))
}

fn clause_matches(clause: &Clause, user: &User, store: &dyn Lookup) -> bool {
    if clause.op == Op::SegmentMatch {
        let matched = clause.values.iter().any(|v| {
            v.as_str()
                .and_then(|key| store.segment(key))
                .map(|segment| segment_matches(&segment, user))
                .unwrap_or(false)
        });
        return clause.maybe_negate(matched);
    }

    match user.attribute(&clause.attribute) {
        Some(value) => clause.matches_value(&value),
        None => clause.maybe_negate(false),
    }
}

fn segment_matches(segment: &Segment, user: &User) -> bool {
    let key = user.key();
    // Inclusion wins over exclusion.
    if segment.included.iter().any(|k| k == key) {
        return true;
    }
    if segment.excluded.iter().any(|k| k == key) {
        return false;
    }
    segment
        .rules
        .iter()
        .any(|rule| segment_rule_matches(rule, user, segment))
}

fn segment_rule_matches(rule: &SegmentRule, user: &User, segment: &Segment) -> bool {
    // segmentMatch cannot nest; within a segment every clause is a plain
    // attribute test.
    let clauses_match = rule.clauses.iter().all(|clause| {
        if clause.op == Op::SegmentMatch {
            return clause.maybe_negate(false);
        }
        match user.attribute(&clause.attribute) {
            Some(value) => clause.matches_value(&value),
            None => clause.maybe_negate(false),
        }
    });
    if !clauses_match {
        return false;
    }

    match rule.weight {
        None => true,
        Some(weight) => {
            let bucket_by = rule.bucket_by.as_deref().unwrap_or("key");
            bucket_user(user, &segment.key, bucket_by, &segment.salt)
                < weight as f64 / 100_000.0
        }
    }
}
