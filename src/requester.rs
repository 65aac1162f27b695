use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::flag::FeatureFlag;
use crate::segment::Segment;

/// Failure reported by a [FeatureRequester]. Evaluation treats it the same as a missing item.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequesterError {
    #[error("flag data source unavailable: {0}")]
    Unavailable(String),
    #[error("invalid flag data: {0}")]
    InvalidData(String),
}

/// Supplies the flags and segments that evaluation refers to by key.
///
/// Lookups may block. The evaluator imposes no timeout or retry of its own.
pub trait FeatureRequester {
    fn get_feature(&self, key: &str) -> Result<Option<Arc<FeatureFlag>>, RequesterError>;

    fn get_segment(&self, key: &str) -> Result<Option<Arc<Segment>>, RequesterError>;

    fn get_all_features(&self) -> Result<HashMap<String, Arc<FeatureFlag>>, RequesterError>;
}
