#![cfg(test)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;

use crate::big_segments::{
    BigSegmentStore, BigSegmentStoreError, BigSegmentStoreMetadata, BigSegmentsStatus, Clock,
    Membership, MembershipCache, MembershipResolver, MembershipResult,
};
use crate::eval::{PrerequisiteEvent, PrerequisiteSink};
use crate::flag::FeatureFlag;
use crate::requester::{FeatureRequester, RequesterError};
use crate::segment::Segment;

pub struct TestRequester {
    flags: HashMap<String, Arc<FeatureFlag>>,
    segments: HashMap<String, Arc<Segment>>,
    failing: HashSet<String>,
}

impl TestRequester {
    pub fn new() -> Self {
        Self::from_json(
            json!({
                "flagWithTarget": {
                    "key": "flagWithTarget",
                    "version": 42,
                    "on": false,
                    "targets": [{"values": ["bob"], "variation": 0}],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithContextTargets": {
                    "key": "flagWithContextTargets",
                    "on": true,
                    "targets": [
                        {"values": ["alice"], "variation": 0},
                        {"values": ["bob"], "variation": 2}
                    ],
                    "contextTargets": [
                        {"contextKind": "org", "values": ["acme"], "variation": 1},
                        {"contextKind": "user", "values": [], "variation": 2},
                        {"contextKind": "user", "values": [], "variation": 0}
                    ],
                    "fallthrough": {"variation": 3},
                    "variations": ["alice-ish", "org", "bob-ish", "nobody"],
                    "salt": "salty"
                },
                "prereq": {
                    "key": "prereq",
                    "on": true,
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": [false, true],
                    "salt": "salty"
                },
                "offPrereq": {
                    "key": "offPrereq",
                    "on": false,
                    "fallthrough": {"variation": 1},
                    "offVariation": 1,
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithSatisfiedPrereq": {
                    "key": "flagWithSatisfiedPrereq",
                    "on": true,
                    "prerequisites": [{"key": "prereq", "variation": 1}],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": ["off", "on"],
                    "salt": "salty"
                },
                "flagWithUnsatisfiedPrereq": {
                    "key": "flagWithUnsatisfiedPrereq",
                    "on": true,
                    "prerequisites": [{"key": "prereq", "variation": 0}],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": ["off", "on"],
                    "salt": "salty"
                },
                "flagWithOffPrereq": {
                    "key": "flagWithOffPrereq",
                    "on": true,
                    "prerequisites": [{"key": "offPrereq", "variation": 1}],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": ["off", "on"],
                    "salt": "salty"
                },
                "flagWithMissingPrereq": {
                    "key": "flagWithMissingPrereq",
                    "on": true,
                    "prerequisites": [{"key": "badPrereq", "variation": 1}],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": ["off", "on"],
                    "salt": "salty"
                },
                "flagWithNestedPrereq": {
                    "key": "flagWithNestedPrereq",
                    "on": true,
                    "prerequisites": [
                        {"key": "flagWithSatisfiedPrereq", "variation": 1},
                        {"key": "offPrereq", "variation": 0}
                    ],
                    "fallthrough": {"variation": 1},
                    "offVariation": 0,
                    "variations": ["off", "on"],
                    "salt": "salty"
                },
                "flagWithRules": {
                    "key": "flagWithRules",
                    "on": true,
                    "rules": [
                        {
                            "id": "team-a",
                            "clauses": [{"attribute": "team", "op": "in", "values": ["a"]}],
                            "variation": 0,
                            "trackEvents": true
                        },
                        {
                            "id": "org-acme",
                            "clauses": [
                                {"contextKind": "org", "attribute": "key", "op": "in", "values": ["acme"]}
                            ],
                            "variation": 1
                        }
                    ],
                    "fallthrough": {"variation": 2},
                    "variations": ["team", "org", "default"],
                    "salt": "salty"
                },
                "flagWithMalformedRule": {
                    "key": "flagWithMalformedRule",
                    "on": true,
                    "rules": [{"id": "broken", "clauses": []}],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithInvalidReference": {
                    "key": "flagWithInvalidReference",
                    "on": true,
                    "rules": [{
                        "id": "bad-ref",
                        "clauses": [{"contextKind": "user", "attribute": "//", "op": "in", "values": ["x"]}],
                        "variation": 1
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithExperiment": {
                    "key": "hashKey",
                    "on": true,
                    "fallthrough": {"rollout": {
                        "kind": "experiment",
                        "seed": 61,
                        "variations": [
                            {"variation": 0, "weight": 10000},
                            {"variation": 1, "weight": 20000},
                            {"variation": 0, "weight": 70000, "untracked": true}
                        ]
                    }},
                    "variations": ["fall", "off", "on"],
                    "salt": "saltyA"
                },
                "flagWithRolloutRule": {
                    "key": "hashKey",
                    "on": true,
                    "rules": [{
                        "id": "rollout",
                        "clauses": [],
                        "rollout": {"variations": [
                            {"variation": 0, "weight": 50000},
                            {"variation": 1, "weight": 50000}
                        ]}
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": ["low", "high"],
                    "salt": "saltyA"
                },
                "flagWithSegmentMatch": {
                    "key": "flagWithSegmentMatch",
                    "on": true,
                    "rules": [{
                        "id": "in-segment",
                        "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["missingSegment", "segment"]}],
                        "variation": 1
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithNegatedSegmentMatch": {
                    "key": "flagWithNegatedSegmentMatch",
                    "on": true,
                    "rules": [{
                        "id": "not-in-segment",
                        "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["segment"], "negate": true}],
                        "variation": 1
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithBigSegmentMatch": {
                    "key": "flagWithBigSegmentMatch",
                    "on": true,
                    "rules": [{
                        "id": "in-big-segment",
                        "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["bigSegment"]}],
                        "variation": 1
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithTwoBigSegments": {
                    "key": "flagWithTwoBigSegments",
                    "on": true,
                    "rules": [
                        {
                            "id": "first",
                            "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["bigSegment"]}],
                            "variation": 1
                        },
                        {
                            "id": "second",
                            "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["otherBigSegment"]}],
                            "variation": 1
                        }
                    ],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                },
                "flagWithUnconfiguredBigSegment": {
                    "key": "flagWithUnconfiguredBigSegment",
                    "on": true,
                    "rules": [{
                        "id": "no-generation",
                        "clauses": [{"attribute": "", "op": "segmentMatch", "values": ["bigSegmentWithoutGeneration"]}],
                        "variation": 1
                    }],
                    "fallthrough": {"variation": 0},
                    "variations": [false, true],
                    "salt": "salty"
                }
            }),
            json!({
                "segment": {
                    "key": "segment",
                    "version": 1,
                    "included": ["alice"],
                    "excluded": ["bob"],
                    "rules": [{"clauses": [{"attribute": "team", "op": "in", "values": ["a"]}]}],
                    "salt": "salty"
                },
                "bigSegment": {
                    "key": "bigSegment",
                    "version": 1,
                    "included": ["ignored"],
                    "rules": [{"clauses": [{"attribute": "key", "op": "in", "values": ["carol"]}]}],
                    "salt": "salty",
                    "unbounded": true,
                    "generation": 1
                },
                "otherBigSegment": {
                    "key": "otherBigSegment",
                    "version": 1,
                    "salt": "salty",
                    "unbounded": true,
                    "generation": 3
                },
                "bigSegmentWithoutGeneration": {
                    "key": "bigSegmentWithoutGeneration",
                    "version": 1,
                    "rules": [{"clauses": []}],
                    "salt": "salty",
                    "unbounded": true
                }
            }),
        )
    }

    /// Builds a requester from JSON objects keyed by flag and segment key.
    pub fn from_json(flags: serde_json::Value, segments: serde_json::Value) -> Self {
        let flags: HashMap<String, FeatureFlag> = serde_json::from_value(flags).unwrap();
        let segments: HashMap<String, Segment> = serde_json::from_value(segments).unwrap();
        Self {
            flags: flags.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            segments: segments.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            failing: HashSet::new(),
        }
    }

    pub fn flag(&self, key: &str) -> FeatureFlag {
        self.flags[key].as_ref().clone()
    }

    /// Makes every lookup of `key`, flag or segment, fail.
    pub fn fail(&mut self, key: &str) {
        self.failing.insert(key.to_string());
    }

    fn check(&self, key: &str) -> Result<(), RequesterError> {
        if self.failing.contains(key) {
            return Err(RequesterError::Unavailable(format!("lookup of {} failed", key)));
        }
        Ok(())
    }
}

impl FeatureRequester for TestRequester {
    fn get_feature(&self, key: &str) -> Result<Option<Arc<FeatureFlag>>, RequesterError> {
        self.check(key)?;
        Ok(self.flags.get(key).cloned())
    }

    fn get_segment(&self, key: &str) -> Result<Option<Arc<Segment>>, RequesterError> {
        self.check(key)?;
        Ok(self.segments.get(key).cloned())
    }

    fn get_all_features(&self) -> Result<HashMap<String, Arc<FeatureFlag>>, RequesterError> {
        Ok(self.flags.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: RefCell<Vec<PrerequisiteEvent>>,
}

impl RecordingSink {
    /// `(target flag, prerequisite flag)` pairs in recording order.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.events
            .borrow()
            .iter()
            .map(|e| (e.target_flag_key.clone(), e.prerequisite_flag.key.clone()))
            .collect()
    }
}

impl PrerequisiteSink for RecordingSink {
    fn record(&self, event: PrerequisiteEvent) {
        self.events.borrow_mut().push(event);
    }
}

/// A resolver that answers every lookup with the same status, recording the keys it was
/// asked about.
pub struct StaticResolver {
    memberships: HashMap<String, Membership>,
    status: BigSegmentsStatus,
    queries: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn new(memberships: HashMap<String, Membership>, status: BigSegmentsStatus) -> Self {
        Self {
            memberships,
            status,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

impl MembershipResolver for StaticResolver {
    fn context_membership(&self, context_key: &str) -> Option<MembershipResult> {
        self.queries.lock().push(context_key.to_string());
        if self.status == BigSegmentsStatus::NotConfigured {
            return None;
        }
        let membership = match self.status {
            BigSegmentsStatus::StoreError => None,
            _ => Some(self.memberships.get(context_key).cloned().unwrap_or_default()),
        };
        Some(MembershipResult {
            membership,
            status: self.status,
        })
    }
}

#[derive(Default)]
struct FakeStoreState {
    last_up_to_date: Option<DateTime<Utc>>,
    memberships: HashMap<String, Membership>,
    fail_membership: bool,
    fail_metadata: bool,
    membership_queries: Vec<String>,
    metadata_queries: usize,
}

#[derive(Default)]
pub struct FakeBigSegmentStore {
    state: Mutex<FakeStoreState>,
}

impl FakeBigSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_up_to_date(&self, last_up_to_date: Option<DateTime<Utc>>) {
        self.state.lock().last_up_to_date = last_up_to_date;
    }

    pub fn set_membership(&self, hashed_key: &str, membership: Membership) {
        self.state
            .lock()
            .memberships
            .insert(hashed_key.to_string(), membership);
    }

    pub fn fail_membership(&self, fail: bool) {
        self.state.lock().fail_membership = fail;
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.state.lock().fail_metadata = fail;
    }

    pub fn membership_queries(&self) -> Vec<String> {
        self.state.lock().membership_queries.clone()
    }

    pub fn metadata_queries(&self) -> usize {
        self.state.lock().metadata_queries
    }
}

impl BigSegmentStore for FakeBigSegmentStore {
    fn get_metadata(&self) -> Result<BigSegmentStoreMetadata, BigSegmentStoreError> {
        let mut state = self.state.lock();
        state.metadata_queries += 1;
        if state.fail_metadata {
            return Err(BigSegmentStoreError::Unavailable("metadata".to_string()));
        }
        Ok(BigSegmentStoreMetadata {
            last_up_to_date: state.last_up_to_date,
        })
    }

    fn get_membership(
        &self,
        hashed_context_key: &str,
    ) -> Result<Option<Membership>, BigSegmentStoreError> {
        let mut state = self.state.lock();
        state.membership_queries.push(hashed_context_key.to_string());
        if state.fail_membership {
            return Err(BigSegmentStoreError::Unavailable("membership".to_string()));
        }
        Ok(state.memberships.get(hashed_context_key).cloned())
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A membership cache that expires entries by a [ManualClock].
pub struct ClockCache {
    clock: Arc<ManualClock>,
    entries: Mutex<HashMap<String, (Membership, DateTime<Utc>, Option<Duration>)>>,
}

impl ClockCache {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl MembershipCache for ClockCache {
    fn get(&self, context_key: &str) -> Option<Membership> {
        let mut entries = self.entries.lock();
        let now = self.clock.now();
        let expired = match entries.get(context_key) {
            None => return None,
            Some((_, set_at, Some(ttl))) => {
                (now - *set_at).num_milliseconds() as u128 >= ttl.as_millis()
            }
            Some((_, _, None)) => false,
        };
        if expired {
            entries.remove(context_key);
            return None;
        }
        entries.get(context_key).map(|(membership, _, _)| membership.clone())
    }

    fn set(&self, context_key: &str, membership: Membership, ttl: Option<Duration>) {
        let set_at = self.clock.now();
        self.entries
            .lock()
            .insert(context_key.to_string(), (membership, set_at, ttl));
    }
}
