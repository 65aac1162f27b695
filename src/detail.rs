use serde::Serialize;

use crate::big_segments::BigSegmentsStatus;
use crate::variation::VariationIndex;
use crate::AttributeValue;

/// The outcome of evaluating a flag: the chosen value, its index among the flag's variations,
/// and why it was chosen.
#[derive(Clone, Debug, PartialEq)]
pub struct Detail<T> {
    /// `None` when the flag was off without an off variation or when evaluation failed.
    pub value: Option<T>,
    /// `None` whenever no variation was selected.
    pub variation_index: Option<VariationIndex>,
    pub reason: Reason,
}

impl<T> Detail<T> {
    pub fn empty(reason: Reason) -> Detail<T> {
        Detail {
            value: None,
            variation_index: None,
            reason,
        }
    }

    pub fn err(error: Error) -> Detail<T> {
        Detail::empty(Reason::error(error))
    }

    pub fn map<U, F>(self, f: F) -> Detail<U>
    where
        F: FnOnce(T) -> U,
    {
        Detail {
            value: self.value.map(f),
            variation_index: self.variation_index,
            reason: self.reason,
        }
    }

    /// Replaces the reason with `error` if there is no value.
    pub fn should_have_value(mut self, error: Error) -> Detail<T> {
        if self.value.is_none() {
            self.reason = Reason::error(error);
        }
        self
    }
}

/// The result of [crate::Evaluator::evaluate].
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    pub detail: Detail<AttributeValue>,
    /// True when the evaluation must be reported with its reason regardless of the flag's own
    /// event settings: the context landed in an experiment, or the matched rule (or the
    /// fallthrough) asks for tracking.
    pub force_reason_tracking: bool,
}

impl EvalResult {
    pub(crate) fn new(detail: Detail<AttributeValue>) -> Self {
        EvalResult {
            detail,
            force_reason_tracking: false,
        }
    }

    pub(crate) fn error(error: Error) -> Self {
        EvalResult::new(Detail::err(error))
    }
}

/// Why a flag evaluation produced its value.
///
/// Serializes to the flat JSON shape shared by every SDK, e.g.
/// `{"kind":"RULE_MATCH","ruleIndex":0,"ruleId":"r1","inExperiment":true}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reason {
    #[serde(flatten)]
    pub kind: ReasonKind,
    /// Present only if evaluation consulted a Big Segment.
    #[serde(rename = "bigSegmentsStatus", skip_serializing_if = "Option::is_none")]
    pub big_segments_status: Option<BigSegmentsStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum ReasonKind {
    /// The flag was off.
    Off,
    /// The context key was targeted individually.
    TargetMatch,
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        rule_index: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        rule_id: String,
        #[serde(skip_serializing_if = "crate::util::is_false")]
        in_experiment: bool,
    },
    /// A prerequisite was off, missing, or did not return its required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    /// The flag was on and nothing targeted the context.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        #[serde(skip_serializing_if = "crate::util::is_false")]
        in_experiment: bool,
    },
    Error {
        #[serde(rename = "errorKind")]
        error: Error,
    },
}

impl Reason {
    pub fn off() -> Self {
        ReasonKind::Off.into()
    }

    pub fn target_match() -> Self {
        ReasonKind::TargetMatch.into()
    }

    pub fn rule_match(rule_index: usize, rule_id: impl Into<String>, in_experiment: bool) -> Self {
        ReasonKind::RuleMatch {
            rule_index,
            rule_id: rule_id.into(),
            in_experiment,
        }
        .into()
    }

    pub fn prerequisite_failed(prerequisite_key: impl Into<String>) -> Self {
        ReasonKind::PrerequisiteFailed {
            prerequisite_key: prerequisite_key.into(),
        }
        .into()
    }

    pub fn fallthrough(in_experiment: bool) -> Self {
        ReasonKind::Fallthrough { in_experiment }.into()
    }

    pub fn error(error: Error) -> Self {
        ReasonKind::Error { error }.into()
    }

    pub fn with_big_segments_status(mut self, status: Option<BigSegmentsStatus>) -> Self {
        self.big_segments_status = status;
        self
    }

    /// True for a rule match or fallthrough that selected a tracked experiment variation.
    pub fn is_in_experiment(&self) -> bool {
        match self.kind {
            ReasonKind::RuleMatch { in_experiment, .. } => in_experiment,
            ReasonKind::Fallthrough { in_experiment } => in_experiment,
            _ => false,
        }
    }
}

impl From<ReasonKind> for Reason {
    fn from(kind: ReasonKind) -> Self {
        Reason {
            kind,
            big_segments_status: None,
        }
    }
}

/// The error kind reported by [ReasonKind::Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Error {
    /// The caller evaluated before flag data was available.
    ClientNotReady,
    /// No flag with the requested key exists.
    FlagNotFound,
    /// The flag data is inconsistent: a variation index out of range, an empty or missing
    /// rollout, an invalid attribute reference, or a prerequisite cycle.
    MalformedFlag,
    /// The value was not of the type the caller asked for.
    WrongType,
    /// Evaluation hit an unexpected failure.
    Exception,
}
