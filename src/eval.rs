use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::big_segments::{BigSegmentsStatus, MembershipResolver, MembershipResult};
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::Context;
use crate::detail::{Error, EvalResult, Reason};
use crate::flag::{FeatureFlag, Target};
use crate::requester::{FeatureRequester, RequesterError};
use crate::rule::{Clause, FlagRule};
use crate::segment::Segment;
use crate::variation::{BucketResult, VariationIndex};

/// Internal evaluation failures. [Evaluator::evaluate] turns all of them into a malformed-flag
/// result.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum EvalError {
    #[error("prerequisite cycle through flag '{0}'")]
    PrerequisiteCycle(String),
    #[error("invalid attribute reference '{0}'")]
    InvalidReference(Reference),
    #[error("rollout has no variations")]
    EmptyRollout,
    #[error("neither a variation nor a rollout was given")]
    MalformedVariationOrRollout,
}

/// The result of evaluating one prerequisite flag.
#[derive(Clone, Debug)]
pub struct PrerequisiteEvent {
    /// Key of the flag that declared the prerequisite.
    pub target_flag_key: String,
    pub prerequisite_flag: Arc<FeatureFlag>,
    pub result: EvalResult,
}

/// Notified once for every prerequisite evaluated, in evaluation order. Nested prerequisites
/// are reported before the flag that depends on them.
pub trait PrerequisiteSink {
    fn record(&self, event: PrerequisiteEvent);
}

impl<F> PrerequisiteSink for F
where
    F: Fn(PrerequisiteEvent),
{
    fn record(&self, event: PrerequisiteEvent) {
        self(event)
    }
}

// State of one top-level evaluation, shared with every prerequisite it evaluates.
struct EvalState<'s> {
    sink: Option<&'s dyn PrerequisiteSink>,
    prerequisite_chain: Vec<String>,
    memberships: HashMap<String, Option<MembershipResult>>,
    big_segments_status: Option<BigSegmentsStatus>,
}

impl<'s> EvalState<'s> {
    fn new(sink: Option<&'s dyn PrerequisiteSink>) -> Self {
        EvalState {
            sink,
            prerequisite_chain: Vec::new(),
            memberships: HashMap::new(),
            big_segments_status: None,
        }
    }

    fn record_status(&mut self, status: BigSegmentsStatus) {
        self.big_segments_status = Some(match self.big_segments_status {
            Some(previous) => previous.max(status),
            None => status,
        });
    }
}

/// Evaluates flags against contexts, fetching prerequisites and segments from a
/// [FeatureRequester] and Big Segment membership from an optional [MembershipResolver].
///
/// The evaluator knows nothing about analytics events. Callers that generate them can pass a
/// [PrerequisiteSink] to hear about the prerequisite evaluations done along the way.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    requester: &'a dyn FeatureRequester,
    big_segments: Option<&'a dyn MembershipResolver>,
}

impl<'a> Evaluator<'a> {
    pub fn new(requester: &'a dyn FeatureRequester) -> Self {
        Evaluator {
            requester,
            big_segments: None,
        }
    }

    pub fn with_big_segments(
        requester: &'a dyn FeatureRequester,
        big_segments: &'a dyn MembershipResolver,
    ) -> Self {
        Evaluator {
            requester,
            big_segments: Some(big_segments),
        }
    }

    /// Evaluates `flag` for `context`. This never fails: problems with the flag data are
    /// reported as an error reason inside the result.
    pub fn evaluate(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        sink: Option<&dyn PrerequisiteSink>,
    ) -> EvalResult {
        let mut state = EvalState::new(sink);
        let mut result = match self.evaluate_internal(flag, context, &mut state) {
            Ok(result) => result,
            Err(e) => {
                warn!("flag '{}' could not be evaluated: {}", flag.key, e);
                EvalResult::error(Error::MalformedFlag)
            }
        };
        result.detail.reason.big_segments_status = state.big_segments_status;
        result
    }

    /// Evaluates every flag the requester knows about, keyed by flag key.
    pub fn evaluate_all(
        &self,
        context: &Context,
    ) -> Result<HashMap<String, EvalResult>, RequesterError> {
        let flags = self.requester.get_all_features()?;
        Ok(flags
            .into_iter()
            .map(|(key, flag)| {
                let result = self.evaluate(&flag, context, None);
                (key, result)
            })
            .collect())
    }

    fn evaluate_internal(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> Result<EvalResult, EvalError> {
        if !flag.on {
            return Ok(flag.result(flag.off_value(Reason::off())));
        }

        if let Some(failed_key) = self.check_prerequisites(flag, context, state)? {
            let reason = Reason::prerequisite_failed(failed_key);
            return Ok(flag.result(flag.off_value(reason)));
        }

        if let Some(variation_index) = any_target_match_variation(context, flag) {
            return Ok(flag.result(flag.variation(variation_index, Reason::target_match())));
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if self.rule_matches(rule, context, state)? {
                let BucketResult {
                    variation_index,
                    in_experiment,
                } = flag.resolve_variation_or_rollout(&rule.variation_or_rollout, context)?;
                let reason = Reason::rule_match(rule_index, rule.id.clone(), in_experiment);
                return Ok(flag.result(flag.variation(variation_index, reason)));
            }
        }

        let BucketResult {
            variation_index,
            in_experiment,
        } = flag.resolve_variation_or_rollout(&flag.fallthrough, context)?;
        Ok(flag.result(flag.variation(variation_index, Reason::fallthrough(in_experiment))))
    }

    // Returns the key of the first prerequisite that is not satisfied.
    fn check_prerequisites(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> Result<Option<String>, EvalError> {
        if flag.prerequisites.is_empty() {
            return Ok(None);
        }
        state.prerequisite_chain.push(flag.key.clone());
        let outcome = self.check_prerequisites_on_chain(flag, context, state);
        state.prerequisite_chain.pop();
        outcome
    }

    fn check_prerequisites_on_chain(
        &self,
        flag: &FeatureFlag,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> Result<Option<String>, EvalError> {
        for prereq in &flag.prerequisites {
            if state.prerequisite_chain.contains(&prereq.key) {
                return Err(EvalError::PrerequisiteCycle(prereq.key.clone()));
            }

            let prereq_flag = match self.requester.get_feature(&prereq.key) {
                Ok(Some(prereq_flag)) => prereq_flag,
                Ok(None) => {
                    warn!(
                        "prerequisite flag '{}' of '{}' not found",
                        prereq.key, flag.key
                    );
                    return Ok(Some(prereq.key.clone()));
                }
                Err(e) => {
                    warn!(
                        "prerequisite flag '{}' of '{}' could not be fetched: {}",
                        prereq.key, flag.key, e
                    );
                    return Ok(Some(prereq.key.clone()));
                }
            };

            let result = match self.evaluate_internal(&prereq_flag, context, state) {
                Ok(result) => result,
                Err(e @ EvalError::PrerequisiteCycle(_)) => return Err(e),
                Err(e) => {
                    warn!("prerequisite flag '{}' could not be evaluated: {}", prereq.key, e);
                    EvalResult::error(Error::MalformedFlag)
                }
            };

            let satisfied =
                prereq_flag.on && result.detail.variation_index == Some(prereq.variation);

            if let Some(sink) = state.sink {
                sink.record(PrerequisiteEvent {
                    target_flag_key: flag.key.clone(),
                    prerequisite_flag: Arc::clone(&prereq_flag),
                    result,
                });
            }

            if !satisfied {
                return Ok(Some(prereq.key.clone()));
            }
        }
        Ok(None)
    }

    fn rule_matches(
        &self,
        rule: &FlagRule,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> Result<bool, EvalError> {
        for clause in &rule.clauses {
            if !self.clause_matches(clause, context, state)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn clause_matches(
        &self,
        clause: &Clause,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> Result<bool, EvalError> {
        if !clause.is_segment_match() {
            return clause.matches_non_segment(context);
        }

        let mut any_match = false;
        for segment_key in clause.values.iter().filter_map(|value| value.as_str()) {
            if self.segment_key_matches(segment_key, context, state) {
                any_match = true;
                break;
            }
        }
        Ok(clause.maybe_negate(any_match))
    }

    fn segment_key_matches(
        &self,
        segment_key: &str,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> bool {
        match self.requester.get_segment(segment_key) {
            Ok(Some(segment)) if segment.unbounded => {
                self.big_segment_matches(&segment, context, state)
            }
            Ok(Some(segment)) => segment.contains(context),
            Ok(None) => false,
            Err(e) => {
                warn!("segment '{}' could not be fetched: {}", segment_key, e);
                false
            }
        }
    }

    fn big_segment_matches(
        &self,
        segment: &Segment,
        context: &Context,
        state: &mut EvalState<'_>,
    ) -> bool {
        let segment_ref = match segment.big_segment_ref() {
            Some(segment_ref) => segment_ref,
            None => {
                state.record_status(BigSegmentsStatus::NotConfigured);
                return false;
            }
        };
        let key = match context.as_kind(&segment.unbounded_context_kind()) {
            Some(individual) => individual.key().to_string(),
            None => return false,
        };

        let resolver = self.big_segments;
        let (status, included) = match state
            .memberships
            .entry(key)
            .or_insert_with_key(|key| resolver.and_then(|r| r.context_membership(key)))
        {
            Some(result) => (
                result.status,
                result
                    .membership
                    .as_ref()
                    .and_then(|membership| membership.get(&segment_ref).copied()),
            ),
            None => (BigSegmentsStatus::NotConfigured, None),
        };
        state.record_status(status);

        included.unwrap_or_else(|| segment.matches_rules(context))
    }
}

fn any_target_match_variation(context: &Context, flag: &FeatureFlag) -> Option<VariationIndex> {
    if flag.context_targets.is_empty() {
        return flag
            .targets
            .iter()
            .find_map(|target| target_match_variation(context, target));
    }

    for context_target in &flag.context_targets {
        let found = if context_target.context_kind.is_user() && context_target.values.is_empty() {
            flag.targets
                .iter()
                .filter(|target| target.variation == context_target.variation)
                .find_map(|target| target_match_variation(context, target))
        } else {
            target_match_variation(context, context_target)
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

fn target_match_variation(context: &Context, target: &Target) -> Option<VariationIndex> {
    let key = context.as_kind(&target.context_kind)?.key();
    target
        .values
        .iter()
        .any(|value| value == key)
        .then_some(target.variation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{RecordingSink, StaticResolver, TestRequester};
    use crate::variation::VariationOrRollout;
    use crate::{AttributeValue, ContextBuilder, MultiContextBuilder};
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use std::cell::RefCell;
    use test_case::test_case;

    fn user(key: &str) -> Context {
        ContextBuilder::new(key).build().unwrap()
    }

    fn org(key: &str) -> Context {
        ContextBuilder::new(key).kind("org").build().unwrap()
    }

    fn on_team_a(key: &str) -> Context {
        ContextBuilder::new(key).set_string("team", "a").build().unwrap()
    }

    fn value(v: impl Into<AttributeValue>) -> Option<AttributeValue> {
        Some(v.into())
    }

    #[test]
    fn off_flag_returns_off_variation() {
        let requester = TestRequester::new();
        let evaluator = Evaluator::new(&requester);
        let mut flag = requester.flag("flagWithTarget");

        let result = evaluator.evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(result.detail.variation_index).contains_value(0);
        assert_that!(result.detail.reason).is_equal_to(Reason::off());
        assert_that!(result.force_reason_tracking).is_false();

        // targets are ignored while off
        assert_that!(evaluator.evaluate(&flag, &user("bob"), None)).is_equal_to(&result);

        flag.off_variation = None;
        let result = evaluator.evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_none();
        assert_that!(result.detail.variation_index).is_none();
        assert_that!(result.detail.reason).is_equal_to(Reason::off());
    }

    #[test]
    fn targets_and_fallthrough() {
        let requester = TestRequester::new();
        let evaluator = Evaluator::new(&requester);
        let mut flag = requester.flag("flagWithTarget");
        flag.on = true;

        let result = evaluator.evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(true));
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));

        let result = evaluator.evaluate(&flag, &user("bob"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(result.detail.variation_index).contains_value(0);
        assert_that!(result.detail.reason).is_equal_to(Reason::target_match());

        // the reason stays a target match when the fallthrough agrees
        flag.fallthrough = VariationOrRollout::Variation { variation: 0 };
        let result = evaluator.evaluate(&flag, &user("bob"), None);
        assert_that!(result.detail.reason).is_equal_to(Reason::target_match());

        // user targets need a user individual
        let result = evaluator.evaluate(&flag, &org("bob"), None);
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));
    }

    #[test]
    fn target_keys_are_case_sensitive() {
        let requester = TestRequester::new();
        let mut flag = requester.flag("flagWithTarget");
        flag.on = true;
        let result = Evaluator::new(&requester).evaluate(&flag, &user("Bob"), None);
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));
    }

    #[test_case(user("alice"), "alice-ish"; "user target referenced from context targets")]
    #[test_case(user("bob"), "bob-ish"; "scan order follows context targets")]
    #[test_case(org("acme"), "org"; "org target")]
    #[test_case(user("carol"), "nobody"; "no target")]
    #[test_case(org("alice"), "nobody"; "user key under another kind")]
    fn context_targets(context: Context, expected: &str) {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithContextTargets");
        let result = Evaluator::new(&requester).evaluate(&flag, &context, None);
        assert_that!(result.detail.value).is_equal_to(value(expected));
    }

    #[test]
    fn context_targets_check_kinds_in_target_order() {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithContextTargets");
        let multi = MultiContextBuilder::new()
            .add_context(user("alice"))
            .add_context(org("acme"))
            .build()
            .unwrap();
        let result = Evaluator::new(&requester).evaluate(&flag, &multi, None);
        assert_that!(result.detail.value).is_equal_to(value("org"));
        assert_that!(result.detail.reason).is_equal_to(Reason::target_match());
    }

    #[test]
    fn satisfied_prerequisite() {
        let requester = TestRequester::new();
        let sink = RecordingSink::default();
        let flag = requester.flag("flagWithSatisfiedPrereq");

        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), Some(&sink));
        assert_that!(result.detail.value).is_equal_to(value("on"));
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));

        assert_that!(sink.keys()).is_equal_to(vec![(
            "flagWithSatisfiedPrereq".to_string(),
            "prereq".to_string(),
        )]);
        let events = sink.events.borrow();
        assert_that!(events[0].result.detail.variation_index).contains_value(1);
    }

    #[test_case("flagWithUnsatisfiedPrereq", "prereq", 1; "wrong variation")]
    #[test_case("flagWithOffPrereq", "offPrereq", 1; "prerequisite off")]
    #[test_case("flagWithMissingPrereq", "badPrereq", 0; "prerequisite missing")]
    fn failed_prerequisite(flag_key: &str, prereq_key: &str, events: usize) {
        let requester = TestRequester::new();
        let sink = RecordingSink::default();
        let flag = requester.flag(flag_key);

        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), Some(&sink));
        assert_that!(result.detail.value).is_equal_to(value("off"));
        assert_that!(result.detail.variation_index).contains_value(0);
        assert_that!(result.detail.reason).is_equal_to(Reason::prerequisite_failed(prereq_key));
        assert_that!(*sink.events.borrow()).has_length(events);
    }

    #[test]
    fn prerequisite_lookup_failure_fails_the_prerequisite() {
        let mut requester = TestRequester::new();
        requester.fail("prereq");
        let flag = requester.flag("flagWithSatisfiedPrereq");
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.reason).is_equal_to(Reason::prerequisite_failed("prereq"));
    }

    #[test]
    fn nested_prerequisite_events_are_depth_first() {
        let requester = TestRequester::new();
        let sink = RecordingSink::default();
        let flag = requester.flag("flagWithNestedPrereq");

        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), Some(&sink));
        assert_that!(result.detail.reason).is_equal_to(Reason::prerequisite_failed("offPrereq"));
        assert_that!(sink.keys()).is_equal_to(vec![
            ("flagWithSatisfiedPrereq".to_string(), "prereq".to_string()),
            (
                "flagWithNestedPrereq".to_string(),
                "flagWithSatisfiedPrereq".to_string(),
            ),
            ("flagWithNestedPrereq".to_string(), "offPrereq".to_string()),
        ]);
    }

    #[test]
    fn closures_can_be_sinks() {
        let requester = TestRequester::new();
        let seen = RefCell::new(Vec::new());
        let sink = |event: PrerequisiteEvent| {
            seen.borrow_mut().push(event.prerequisite_flag.key.clone())
        };
        let flag = requester.flag("flagWithSatisfiedPrereq");

        Evaluator::new(&requester).evaluate(&flag, &user("alice"), Some(&sink));
        assert_that!(*seen.borrow()).is_equal_to(vec!["prereq".to_string()]);
    }

    fn prereq_flag(key: &str, prereqs: &[&str]) -> serde_json::Value {
        let prerequisites: Vec<_> = prereqs
            .iter()
            .map(|p| json!({"key": p, "variation": 0}))
            .collect();
        json!({
            "key": key,
            "on": true,
            "prerequisites": prerequisites,
            "fallthrough": {"variation": 0},
            "offVariation": 1,
            "variations": [true, false],
            "salt": "salty"
        })
    }

    #[test_case(json!({"flagA": prereq_flag("flagA", &["flagA"])}); "flag is its own prerequisite")]
    #[test_case(json!({
        "flagA": prereq_flag("flagA", &["flagB"]),
        "flagB": prereq_flag("flagB", &["flagA"])
    }); "two flags")]
    #[test_case(json!({
        "flagA": prereq_flag("flagA", &["flagB"]),
        "flagB": prereq_flag("flagB", &["flagC"]),
        "flagC": prereq_flag("flagC", &["flagA"])
    }); "three flags")]
    fn prerequisite_cycles_are_malformed(flags: serde_json::Value) {
        let requester = TestRequester::from_json(flags, json!({}));
        let flag = requester.flag("flagA");
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_none();
        assert_that!(result.detail.variation_index).is_none();
        assert_that!(result.detail.reason).is_equal_to(Reason::error(Error::MalformedFlag));
    }

    // Flag A
    //   Flag B
    //   Flag C
    //     Flag B
    #[test]
    fn shared_prerequisite_is_not_a_cycle() {
        let requester = TestRequester::from_json(
            json!({
                "flagA": prereq_flag("flagA", &["flagB", "flagC"]),
                "flagB": prereq_flag("flagB", &[]),
                "flagC": prereq_flag("flagC", &["flagB"])
            }),
            json!({}),
        );
        let flag = requester.flag("flagA");
        let sink = RecordingSink::default();
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), Some(&sink));
        assert_that!(result.detail.value).is_equal_to(value(true));
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));
        assert_that!(*sink.events.borrow()).has_length(3);
    }

    #[test]
    fn rules_match_in_order() {
        let requester = TestRequester::new();
        let evaluator = Evaluator::new(&requester);
        let flag = requester.flag("flagWithRules");

        let result = evaluator.evaluate(&flag, &on_team_a("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value("team"));
        assert_that!(result.detail.reason).is_equal_to(Reason::rule_match(0, "team-a", false));
        assert_that!(result.force_reason_tracking).is_true();

        let multi = MultiContextBuilder::new()
            .add_context(user("alice"))
            .add_context(org("acme"))
            .build()
            .unwrap();
        let result = evaluator.evaluate(&flag, &multi, None);
        assert_that!(result.detail.value).is_equal_to(value("org"));
        assert_that!(result.detail.reason).is_equal_to(Reason::rule_match(1, "org-acme", false));
        assert_that!(result.force_reason_tracking).is_false();

        let result = evaluator.evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value("default"));
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));
    }

    #[test_case("flagWithMalformedRule"; "rule without variation or rollout")]
    #[test_case("flagWithInvalidReference"; "invalid attribute reference")]
    fn malformed_rules(flag_key: &str) {
        let requester = TestRequester::new();
        let flag = requester.flag(flag_key);
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_none();
        assert_that!(result.detail.reason).is_equal_to(Reason::error(Error::MalformedFlag));
    }

    #[test]
    fn fallthrough_variation_out_of_range_is_malformed() {
        let requester = TestRequester::new();
        let mut flag = requester.flag("flagWithTarget");
        flag.on = true;
        flag.fallthrough = VariationOrRollout::Variation { variation: 9 };
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.variation_index).is_none();
        assert_that!(result.detail.reason).is_equal_to(Reason::error(Error::MalformedFlag));
    }

    #[test_case("userKeyA", "fall", 0, true; "bucket A in experiment")]
    #[test_case("userKeyB", "off", 1, true; "bucket B in experiment")]
    #[test_case("userKeyC", "fall", 0, false; "untracked bucket")]
    fn experiment_fallthrough(key: &str, expected: &str, index: usize, in_experiment: bool) {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithExperiment");
        let result = Evaluator::new(&requester).evaluate(&flag, &user(key), None);
        assert_that!(result.detail.value).is_equal_to(value(expected));
        assert_that!(result.detail.variation_index).contains_value(index);
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(in_experiment));
        assert_that!(result.force_reason_tracking).is_equal_to(in_experiment);
    }

    #[test_case("userKeyA", "low"; "bucket A low")]
    #[test_case("userKeyB", "high"; "bucket B high")]
    #[test_case("userKeyC", "low"; "bucket C low")]
    fn rollout_rule(key: &str, expected: &str) {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithRolloutRule");
        let result = Evaluator::new(&requester).evaluate(&flag, &user(key), None);
        assert_that!(result.detail.value).is_equal_to(value(expected));
        assert_that!(result.detail.reason).is_equal_to(Reason::rule_match(0, "rollout", false));
    }

    #[test_case(user("alice"), true; "included")]
    #[test_case(on_team_a("bob"), false; "excluded despite matching rule")]
    #[test_case(on_team_a("carol"), true; "segment rule")]
    #[test_case(user("dave"), false; "not in segment")]
    fn segment_match(context: Context, expected: bool) {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithSegmentMatch");
        let result = Evaluator::new(&requester).evaluate(&flag, &context, None);
        assert_that!(result.detail.value).is_equal_to(value(expected));
        assert_that!(result.detail.reason.big_segments_status).is_none();
    }

    #[test]
    fn negated_segment_match() {
        let requester = TestRequester::new();
        let evaluator = Evaluator::new(&requester);
        let flag = requester.flag("flagWithNegatedSegmentMatch");
        assert_that!(evaluator.evaluate(&flag, &user("alice"), None).detail.value)
            .is_equal_to(value(false));
        assert_that!(evaluator.evaluate(&flag, &user("dave"), None).detail.value)
            .is_equal_to(value(true));
    }

    #[test]
    fn segment_lookup_failure_is_a_non_match() {
        let mut requester = TestRequester::new();
        requester.fail("segment");
        let flag = requester.flag("flagWithSegmentMatch");
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(result.detail.reason).is_equal_to(Reason::fallthrough(false));
    }

    fn healthy_resolver() -> StaticResolver {
        StaticResolver::new(
            hashmap! {
                "alice".to_string() => hashmap! {"bigSegment.g1".to_string() => true},
                "carol".to_string() => hashmap! {"bigSegment.g1".to_string() => false},
            },
            BigSegmentsStatus::Healthy,
        )
    }

    #[test_case("alice", true; "explicitly included")]
    #[test_case("carol", false; "explicit exclusion beats rules")]
    #[test_case("dave", false; "no membership and no matching rule")]
    #[test_case("ignored", false; "include list is not consulted")]
    fn big_segment_membership(key: &str, expected: bool) {
        let requester = TestRequester::new();
        let resolver = healthy_resolver();
        let flag = requester.flag("flagWithBigSegmentMatch");
        let result =
            Evaluator::with_big_segments(&requester, &resolver).evaluate(&flag, &user(key), None);
        assert_that!(result.detail.value).is_equal_to(value(expected));
        assert_that!(result.detail.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::Healthy);
        assert_that!(resolver.queries()).is_equal_to(vec![key.to_string()]);
    }

    #[test]
    fn big_segment_rules_apply_without_membership_entry() {
        let requester = TestRequester::new();
        let resolver = StaticResolver::new(hashmap! {}, BigSegmentsStatus::Stale);
        let flag = requester.flag("flagWithBigSegmentMatch");
        let result = Evaluator::with_big_segments(&requester, &resolver)
            .evaluate(&flag, &user("carol"), None);
        assert_that!(result.detail.value).is_equal_to(value(true));
        assert_that!(result.detail.reason).is_equal_to(
            Reason::rule_match(0, "in-big-segment", false)
                .with_big_segments_status(Some(BigSegmentsStatus::Stale)),
        );
    }

    #[test_case(BigSegmentsStatus::StoreError; "store error")]
    #[test_case(BigSegmentsStatus::NotConfigured; "resolver not configured")]
    fn big_segment_without_membership_falls_back_to_rules(status: BigSegmentsStatus) {
        let requester = TestRequester::new();
        let resolver = StaticResolver::new(hashmap! {}, status);
        let flag = requester.flag("flagWithBigSegmentMatch");
        let evaluator = Evaluator::with_big_segments(&requester, &resolver);

        let result = evaluator.evaluate(&flag, &user("carol"), None);
        assert_that!(result.detail.value).is_equal_to(value(true));
        assert_that!(result.detail.reason.big_segments_status).contains_value(status);

        let result = evaluator.evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
    }

    #[test]
    fn big_segment_without_resolver_is_not_configured() {
        let requester = TestRequester::new();
        let flag = requester.flag("flagWithBigSegmentMatch");
        let result = Evaluator::new(&requester).evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(result.detail.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::NotConfigured);
    }

    #[test]
    fn big_segment_without_generation_never_matches() {
        let requester = TestRequester::new();
        let resolver = healthy_resolver();
        let flag = requester.flag("flagWithUnconfiguredBigSegment");
        let result = Evaluator::with_big_segments(&requester, &resolver)
            .evaluate(&flag, &user("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(result.detail.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::NotConfigured);
        assert_that!(resolver.queries()).is_empty();
    }

    #[test]
    fn big_segment_needs_an_individual_of_its_kind() {
        let requester = TestRequester::new();
        let resolver = healthy_resolver();
        let flag = requester.flag("flagWithBigSegmentMatch");
        let result = Evaluator::with_big_segments(&requester, &resolver)
            .evaluate(&flag, &org("alice"), None);
        assert_that!(result.detail.value).is_equal_to(value(false));
        assert_that!(resolver.queries()).is_empty();
    }

    #[test]
    fn membership_is_fetched_once_per_evaluation() {
        let requester = TestRequester::new();
        let resolver = healthy_resolver();
        let evaluator = Evaluator::with_big_segments(&requester, &resolver);
        let flag = requester.flag("flagWithTwoBigSegments");

        let result = evaluator.evaluate(&flag, &user("dave"), None);
        assert_that!(result.detail.reason).is_equal_to(
            Reason::fallthrough(false).with_big_segments_status(Some(BigSegmentsStatus::Healthy)),
        );
        assert_that!(resolver.queries()).is_equal_to(vec!["dave".to_string()]);

        evaluator.evaluate(&flag, &user("dave"), None);
        assert_that!(resolver.queries()).has_length(2);
    }

    #[test]
    fn worst_big_segments_status_wins() {
        let mut state = EvalState::new(None);
        state.record_status(BigSegmentsStatus::Stale);
        state.record_status(BigSegmentsStatus::Healthy);
        assert_that!(state.big_segments_status).contains_value(BigSegmentsStatus::Stale);
        state.record_status(BigSegmentsStatus::StoreError);
        state.record_status(BigSegmentsStatus::NotConfigured);
        assert_that!(state.big_segments_status).contains_value(BigSegmentsStatus::StoreError);
    }

    #[test]
    fn repeated_evaluation_is_identical() {
        let requester = TestRequester::new();
        let resolver = healthy_resolver();
        let evaluator = Evaluator::with_big_segments(&requester, &resolver);
        for key in ["flagWithExperiment", "flagWithBigSegmentMatch", "flagWithRules"] {
            let flag = requester.flag(key);
            let context = on_team_a("alice");
            let first = evaluator.evaluate(&flag, &context, None);
            assert_that!(evaluator.evaluate(&flag, &context, None)).is_equal_to(&first);
        }
    }

    #[test]
    fn evaluate_all_covers_every_flag() {
        let requester = TestRequester::from_json(
            json!({
                "on": prereq_flag("on", &[]),
                "dependent": prereq_flag("dependent", &["on"])
            }),
            json!({}),
        );
        let results = Evaluator::new(&requester)
            .evaluate_all(&user("alice"))
            .unwrap();
        assert_that!(results).has_length(2);
        assert_that!(results["on"].detail.value).is_equal_to(value(true));
        assert_that!(results["dependent"].detail.reason).is_equal_to(Reason::fallthrough(false));
    }
}
