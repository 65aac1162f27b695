//! Big Segments: segments whose membership is computed by an external system and read from a
//! store, with a local membership cache and throttled store health polling.

use std::collections::HashMap;

use serde::Serialize;

mod cache;
mod clock;
mod config;
mod manager;
mod status;
mod store;

pub use cache::{MembershipCache, MokaMembershipCache};
pub use clock::{Clock, SystemClock};
pub use config::BigSegmentsConfig;
pub use manager::{BigSegmentStoreManager, BigSegmentStoreManagerBuilder};
pub use status::{
    BigSegmentStatusListener, BigSegmentStoreStatus, BigSegmentStoreStatusProvider, ListenerId,
};
pub use store::{hash_context_key, BigSegmentStore, BigSegmentStoreError, BigSegmentStoreMetadata};

/// Segment reference (`"{key}.g{generation}"`) to explicit inclusion or exclusion.
pub type Membership = HashMap<String, bool>;

/// How trustworthy the Big Segment data behind an evaluation was.
///
/// Variants are declared from best to worst, so the maximum of several statuses is the one to
/// report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    Healthy,
    Stale,
    /// Big Segments were referenced but no store is configured, or the segment lacks a
    /// generation.
    NotConfigured,
    StoreError,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MembershipResult {
    /// `None` when the store lookup failed.
    pub membership: Option<Membership>,
    pub status: BigSegmentsStatus,
}

/// The seam through which evaluation reads Big Segment membership.
pub trait MembershipResolver: Send + Sync {
    /// `None` means Big Segments are not configured.
    fn context_membership(&self, context_key: &str) -> Option<MembershipResult>;
}
