use log::warn;
use serde::Deserialize;

use crate::contexts::context::{Context, Kind};
use crate::detail::{Detail, Error, EvalResult, Reason, ReasonKind};
use crate::eval::EvalError;
use crate::rule::FlagRule;
use crate::variation::{BucketResult, VariationIndex, VariationOrRollout};
use crate::AttributeValue;

/// A feature flag as delivered by the flag data source.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub key: String,
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub on: bool,

    #[serde(default)]
    pub variations: Vec<AttributeValue>,
    #[serde(default)]
    pub off_variation: Option<VariationIndex>,

    #[serde(default)]
    pub prerequisites: Vec<Prereq>,
    /// User-kind targets in the older format.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Targets for any context kind. A user-kind entry with no values stands in for the
    /// `targets` entry of the same variation and fixes its position in the scan order.
    #[serde(default)]
    pub context_targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<FlagRule>,
    #[serde(default = "missing_fallthrough")]
    pub fallthrough: VariationOrRollout,

    #[serde(default)]
    pub salt: String,

    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_events_fallthrough: bool,
    #[serde(default)]
    pub debug_events_until_date: Option<u64>,
    #[serde(default)]
    pub sampling_ratio: Option<u32>,
    #[serde(default)]
    pub exclude_from_summaries: bool,
}

fn missing_fallthrough() -> VariationOrRollout {
    VariationOrRollout::Malformed(serde_json::Value::Null)
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Prereq {
    pub key: String,
    pub variation: VariationIndex,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub context_kind: Kind,
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: VariationIndex,
}

impl FeatureFlag {
    /// The variation at `index` with the given reason, or a malformed-flag error if the flag
    /// has no such variation.
    pub fn variation(&self, index: VariationIndex, reason: Reason) -> Detail<AttributeValue> {
        match self.variations.get(index) {
            Some(value) => Detail {
                value: Some(value.clone()),
                variation_index: Some(index),
                reason,
            },
            None => {
                warn!(
                    "flag '{}' refers to variation {} but has only {}",
                    self.key,
                    index,
                    self.variations.len()
                );
                Detail::err(Error::MalformedFlag)
            }
        }
    }

    pub fn off_value(&self, reason: Reason) -> Detail<AttributeValue> {
        match self.off_variation {
            Some(index) => self.variation(index, reason),
            None => Detail::empty(reason),
        }
    }

    /// True if an evaluation with this reason has to be tracked with its reason: it landed in
    /// an experiment, or it matched a rule or fell through where the flag asks for tracking.
    pub fn is_experimentation_enabled(&self, reason: &Reason) -> bool {
        match &reason.kind {
            _ if reason.is_in_experiment() => true,
            ReasonKind::Fallthrough { .. } => self.track_events_fallthrough,
            ReasonKind::RuleMatch { rule_index, .. } => self
                .rules
                .get(*rule_index)
                .map(|rule| rule.track_events)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub(crate) fn resolve_variation_or_rollout(
        &self,
        vr: &VariationOrRollout,
        context: &Context,
    ) -> Result<BucketResult, EvalError> {
        vr.variation_index_for_context(context, &self.key, &self.salt)
    }

    pub(crate) fn result(&self, detail: Detail<AttributeValue>) -> EvalResult {
        let force_reason_tracking = self.is_experimentation_enabled(&detail.reason);
        EvalResult {
            detail,
            force_reason_tracking,
        }
    }
}
