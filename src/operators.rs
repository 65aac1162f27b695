use chrono::DateTime;
use log::warn;
use regex::Regex;
use serde::de::{self, value::StrDeserializer, IntoDeserializer};
use serde::{Deserialize, Serialize};

use crate::semantic_version::SemanticVersion;
use crate::AttributeValue;

/// A clause operator, decoded from its wire name.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    In,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SegmentMatch,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    /// Any operator name this library does not know. It never matches.
    #[serde(other)]
    Unrecognized,
}

impl Op {
    /// Looks up an operator by its wire name, e.g. "semVerLessThan".
    pub fn from_name(name: &str) -> Op {
        let deserializer: StrDeserializer<'_, de::value::Error> = name.into_deserializer();
        Op::deserialize(deserializer).unwrap_or(Op::Unrecognized)
    }

    /// Tests a context value against a single clause value. Type mismatches and unparseable
    /// operands are non-matches.
    ///
    /// [Op::SegmentMatch] is resolved by clause matching against segments and always returns
    /// false here.
    pub fn apply(&self, lhs: &AttributeValue, rhs: &AttributeValue) -> bool {
        match self {
            Op::In => lhs == rhs || loose_numbers(lhs, rhs).map_or(false, |(l, r)| l == r),

            Op::StartsWith => string_op(lhs, rhs, |l, r| l.starts_with(r)),
            Op::EndsWith => string_op(lhs, rhs, |l, r| l.ends_with(r)),
            Op::Contains => string_op(lhs, rhs, |l, r| l.contains(r)),
            Op::Matches => string_op(lhs, rhs, |l, r| match Regex::new(r) {
                Ok(re) => re.is_match(l),
                Err(e) => {
                    warn!("invalid regex for 'matches' operator ({}): {}", e, r);
                    false
                }
            }),

            Op::LessThan => numeric_op(lhs, rhs, |l, r| l < r),
            Op::LessThanOrEqual => numeric_op(lhs, rhs, |l, r| l <= r),
            Op::GreaterThan => numeric_op(lhs, rhs, |l, r| l > r),
            Op::GreaterThanOrEqual => numeric_op(lhs, rhs, |l, r| l >= r),

            Op::Before => time_op(lhs, rhs, |l, r| l < r),
            Op::After => time_op(lhs, rhs, |l, r| l > r),

            Op::SemVerEqual => semver_op(lhs, rhs, |l, r| l == r),
            Op::SemVerLessThan => semver_op(lhs, rhs, |l, r| l < r),
            Op::SemVerGreaterThan => semver_op(lhs, rhs, |l, r| l > r),

            Op::SegmentMatch | Op::Unrecognized => false,
        }
    }
}

/// Applies the operator named `name`. Unknown names never match.
pub fn apply(name: &str, lhs: &AttributeValue, rhs: &AttributeValue) -> bool {
    Op::from_name(name).apply(lhs, rhs)
}

// Numbers and numeric strings compare by value, whichever representation each side uses.
fn loose_numbers(lhs: &AttributeValue, rhs: &AttributeValue) -> Option<(f64, f64)> {
    let parse = |v: &AttributeValue| match v {
        AttributeValue::Number(f) => Some(*f),
        AttributeValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    };
    Some((parse(lhs)?, parse(rhs)?))
}

fn string_op<F: Fn(&str, &str) -> bool>(lhs: &AttributeValue, rhs: &AttributeValue, f: F) -> bool {
    match (lhs.as_str(), rhs.as_str()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn numeric_op<F: Fn(f64, f64) -> bool>(lhs: &AttributeValue, rhs: &AttributeValue, f: F) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn time_op<F: Fn(f64, f64) -> bool>(lhs: &AttributeValue, rhs: &AttributeValue, f: F) -> bool {
    match (epoch_millis(lhs), epoch_millis(rhs)) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn epoch_millis(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Number(millis) => Some(*millis),
        AttributeValue::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| {
            dt.timestamp_millis() as f64 + f64::from(dt.timestamp_subsec_nanos() % 1_000_000) / 1e6
        }),
        _ => None,
    }
}

fn semver_op<F: Fn(&SemanticVersion, &SemanticVersion) -> bool>(
    lhs: &AttributeValue,
    rhs: &AttributeValue,
    f: F,
) -> bool {
    let parse = |v: &AttributeValue| v.as_str().and_then(SemanticVersion::parse);
    match (parse(lhs), parse(rhs)) {
        (Some(l), Some(r)) => f(&l, &r),
        _ => false,
    }
}
