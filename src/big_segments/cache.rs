use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;

use super::Membership;

/// Local cache of memberships, keyed by the unhashed context key.
pub trait MembershipCache: Send + Sync {
    fn get(&self, context_key: &str) -> Option<Membership>;

    /// Stores `membership`; `ttl` of `None` means no expiry.
    fn set(&self, context_key: &str, membership: Membership, ttl: Option<Duration>);
}

#[derive(Clone)]
struct Entry {
    membership: Membership,
    ttl: Option<Duration>,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// The default [MembershipCache]: a bounded moka cache with a TTL per entry.
pub struct MokaMembershipCache {
    cache: Cache<String, Entry>,
}

impl MokaMembershipCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }
}

impl MembershipCache for MokaMembershipCache {
    fn get(&self, context_key: &str) -> Option<Membership> {
        self.cache.get(context_key).map(|entry| entry.membership)
    }

    fn set(&self, context_key: &str, membership: Membership, ttl: Option<Duration>) {
        self.cache.insert(context_key.to_owned(), Entry { membership, ttl });
    }
}
