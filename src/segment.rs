use log::warn;
use serde::Deserialize;

use crate::bucketing::{bucket_context, BucketPrefix};
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::rule::Clause;

/// A reusable set of contexts, referenced from flag rules through `segmentMatch` clauses.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,

    /// User keys included regardless of rules.
    #[serde(default)]
    pub included: Vec<String>,
    /// User keys excluded unless also included.
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub included_contexts: Vec<SegmentTarget>,
    #[serde(default)]
    pub excluded_contexts: Vec<SegmentTarget>,

    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub salt: String,

    /// True for a Big Segment, whose membership lives in an external store.
    #[serde(default)]
    pub unbounded: bool,
    #[serde(default)]
    pub unbounded_context_kind: Option<Kind>,
    #[serde(default)]
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentTarget {
    pub context_kind: Kind,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    /// Fraction of matching contexts to include, in thousandths of a percent.
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub bucket_by: Option<String>,
    #[serde(default)]
    pub rollout_context_kind: Option<Kind>,
}

impl Segment {
    /// Matches a regular segment against `context`: explicit inclusion first, then explicit
    /// exclusion, then the rules in order.
    pub fn contains(&self, context: &Context) -> bool {
        self.explicit_membership(context)
            .unwrap_or_else(|| self.matches_rules(context))
    }

    fn explicit_membership(&self, context: &Context) -> Option<bool> {
        let user_key = context.as_kind(&Kind::user()).map(Context::key);
        let listed = |keys: &[String], key: Option<&str>| {
            key.map_or(false, |k| keys.iter().any(|v| v == k))
        };
        let targeted = |targets: &[SegmentTarget]| {
            targets.iter().any(|target| {
                let key = context.as_kind(&target.context_kind).map(Context::key);
                listed(&target.values, key)
            })
        };

        if listed(&self.included, user_key) || targeted(&self.included_contexts) {
            return Some(true);
        }
        if listed(&self.excluded, user_key) || targeted(&self.excluded_contexts) {
            return Some(false);
        }
        None
    }

    /// True if any rule matches. Used directly for Big Segments, whose explicit membership
    /// comes from the store instead of the include and exclude lists.
    pub(crate) fn matches_rules(&self, context: &Context) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(context, &self.key, &self.salt))
    }

    /// The membership map key for a Big Segment, or `None` if it has no generation.
    pub(crate) fn big_segment_ref(&self) -> Option<String> {
        self.generation.map(|g| format!("{}.g{}", self.key, g))
    }

    pub(crate) fn unbounded_context_kind(&self) -> Kind {
        self.unbounded_context_kind.clone().unwrap_or_default()
    }
}

impl SegmentRule {
    fn matches(&self, context: &Context, segment_key: &str, salt: &str) -> bool {
        for clause in &self.clauses {
            if clause.is_segment_match() {
                return false;
            }
            match clause.matches_non_segment(context) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!("rule '{}' of segment '{}' is invalid: {}", self.id, segment_key, e);
                    return false;
                }
            }
        }

        let Some(weight) = self.weight else {
            return true;
        };
        let bucket_by = match (&self.bucket_by, &self.rollout_context_kind) {
            (None, _) => Reference::new("key"),
            (Some(name), None) => Reference::from_literal(name),
            (Some(path), Some(_)) => Reference::new(path),
        };
        let kind = self.rollout_context_kind.clone().unwrap_or_default();
        match bucket_context(context, &kind, &bucket_by, BucketPrefix::KeyAndSalt(segment_key, salt)) {
            Ok(Some(bucket)) => bucket < weight / 100_000.0,
            Ok(None) => false,
            Err(e) => {
                warn!("rule '{}' of segment '{}' is invalid: {}", self.id, segment_key, e);
                false
            }
        }
    }
}
