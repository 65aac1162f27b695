use serde::Deserialize;

use crate::bucketing::{bucket_context, BucketPrefix};
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::EvalError;

pub type VariationIndex = usize;

/// The variation picked by a [VariationOrRollout] for one context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketResult {
    pub variation_index: VariationIndex,
    pub in_experiment: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    Experiment,
}

/// A weighted split of contexts across variations.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub kind: RolloutKind,
    #[serde(default)]
    pub context_kind: Option<Kind>,
    #[serde(default)]
    pub bucket_by: Option<String>,
    pub variations: Vec<WeightedVariation>,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl Rollout {
    // Rollouts without a context kind come from data that predates attribute paths, so their
    // bucketBy is a literal attribute name.
    fn bucket_by(&self) -> Reference {
        match (&self.bucket_by, &self.context_kind) {
            (None, _) => Reference::new("key"),
            (Some(name), None) => Reference::from_literal(name),
            (Some(path), Some(_)) => Reference::new(path),
        }
    }
}

/// One slice of a [Rollout]. Weights are in thousandths of a percent, 100000 being everyone.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WeightedVariation {
    pub variation: VariationIndex,
    pub weight: f64,
    #[serde(default)]
    pub untracked: bool,
}

// Flag data can arrive with neither a variation nor a rollout. That must still decode, and
// evaluating it reports a malformed flag. When both are present the variation wins.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariationOrRollout {
    Variation { variation: VariationIndex },
    Rollout { rollout: Rollout },
    Malformed(serde_json::Value),
}

impl VariationOrRollout {
    /// Picks the variation for `context`. Rollouts are hashed with their seed when they have
    /// one and with `flag_key` and `salt` otherwise.
    pub fn variation_index_for_context(
        &self,
        context: &Context,
        flag_key: &str,
        salt: &str,
    ) -> Result<BucketResult, EvalError> {
        let rollout = match self {
            VariationOrRollout::Variation { variation } => {
                return Ok(BucketResult {
                    variation_index: *variation,
                    in_experiment: false,
                })
            }
            VariationOrRollout::Rollout { rollout } => rollout,
            VariationOrRollout::Malformed(_) => return Err(EvalError::MalformedVariationOrRollout),
        };

        let last = rollout.variations.last().ok_or(EvalError::EmptyRollout)?;

        let prefix = match rollout.seed {
            Some(seed) => BucketPrefix::Seed(seed),
            None => BucketPrefix::KeyAndSalt(flag_key, salt),
        };
        let kind = rollout.context_kind.clone().unwrap_or_default();
        let bucket = bucket_context(context, &kind, &rollout.bucket_by(), prefix)?;
        let is_experiment = rollout.kind == RolloutKind::Experiment && bucket.is_some();
        let bucket = bucket.unwrap_or(0.0);

        let mut sum = 0.0;
        let selected = rollout
            .variations
            .iter()
            .find(|wv| {
                sum += wv.weight / 100_000.0;
                bucket < sum
            })
            .unwrap_or(last);

        Ok(BucketResult {
            variation_index: selected.variation,
            in_experiment: is_experiment && !selected.untracked,
        })
    }
}
