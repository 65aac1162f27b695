use serde::Deserialize;

use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::EvalError;
use crate::operators::Op;
use crate::variation::VariationOrRollout;
use crate::AttributeValue;

/// One condition of a flag or segment rule.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "ClauseRepr")]
pub struct Clause {
    pub context_kind: Kind,
    pub attribute: Reference,
    pub op: Op,
    pub values: Vec<AttributeValue>,
    pub negate: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClauseRepr {
    #[serde(default)]
    context_kind: Option<Kind>,
    #[serde(default)]
    attribute: String,
    op: Op,
    #[serde(default)]
    values: Vec<AttributeValue>,
    #[serde(default)]
    negate: bool,
}

impl From<ClauseRepr> for Clause {
    fn from(repr: ClauseRepr) -> Self {
        // Without a context kind the clause predates attribute paths and names its attribute
        // literally.
        let attribute = match repr.context_kind {
            Some(_) => Reference::new(&repr.attribute),
            None => Reference::from_literal(&repr.attribute),
        };
        Clause {
            context_kind: repr.context_kind.unwrap_or_default(),
            attribute,
            op: repr.op,
            values: repr.values,
            negate: repr.negate,
        }
    }
}

impl Clause {
    pub(crate) fn is_segment_match(&self) -> bool {
        self.op == Op::SegmentMatch
    }

    pub(crate) fn maybe_negate(&self, v: bool) -> bool {
        v != self.negate
    }

    /// Matches a clause whose operator is not `segmentMatch`.
    ///
    /// The clause reads its attribute from the individual context of its kind; a missing
    /// individual or attribute is a non-match, whatever `negate` says. A list attribute matches
    /// if any element does.
    pub(crate) fn matches_non_segment(&self, context: &Context) -> Result<bool, EvalError> {
        if !self.attribute.is_valid() {
            return Err(EvalError::InvalidReference(self.attribute.clone()));
        }
        if self.attribute.is_kind() {
            return Ok(self.matches_kind(context));
        }

        let value = match context
            .as_kind(&self.context_kind)
            .and_then(|individual| individual.get_value(&self.attribute))
        {
            Some(value) if !value.is_null() => value,
            _ => return Ok(false),
        };

        let any_match = value.find(|v| self.any_value_matches(v)).is_some();
        Ok(self.maybe_negate(any_match))
    }

    fn matches_kind(&self, context: &Context) -> bool {
        let any_match = context
            .kinds()
            .into_iter()
            .any(|kind| self.any_value_matches(&AttributeValue::String(kind.to_string())));
        self.maybe_negate(any_match)
    }

    fn any_value_matches(&self, context_value: &AttributeValue) -> bool {
        self.values
            .iter()
            .any(|clause_value| self.op.apply(context_value, clause_value))
    }
}

/// A flag targeting rule. It matches when all of its clauses match.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    #[serde(default)]
    pub track_events: bool,
}
