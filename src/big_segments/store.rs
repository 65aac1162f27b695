use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::Membership;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BigSegmentStoreError {
    #[error("big segment store is unavailable: {0}")]
    Unavailable(String),
    #[error("big segment store returned invalid data: {0}")]
    InvalidData(String),
}

/// What the store knows about its own freshness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BigSegmentStoreMetadata {
    /// When the store was last fully synchronized. `None` means it never was.
    pub last_up_to_date: Option<DateTime<Utc>>,
}

/// Read access to externally populated Big Segment membership data.
///
/// Implementations must not cache metadata; every call should reflect the store's current
/// state.
pub trait BigSegmentStore: Send + Sync {
    fn get_metadata(&self) -> Result<BigSegmentStoreMetadata, BigSegmentStoreError>;

    /// Looks up membership by hashed context key (see [hash_context_key]). `Ok(None)` means the
    /// store has no record for the context.
    fn get_membership(
        &self,
        hashed_context_key: &str,
    ) -> Result<Option<Membership>, BigSegmentStoreError>;
}

/// The key under which a store indexes a context: base64 of the SHA-256 of its key.
pub fn hash_context_key(context_key: &str) -> String {
    STANDARD.encode(Sha256::digest(context_key.as_bytes()))
}
