use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use parking_lot::Mutex;

use super::cache::{MembershipCache, MokaMembershipCache};
use super::clock::{Clock, SystemClock};
use super::config::BigSegmentsConfig;
use super::status::{BigSegmentStoreStatus, BigSegmentStoreStatusProvider};
use super::store::{hash_context_key, BigSegmentStore};
use super::{BigSegmentsStatus, MembershipResolver, MembershipResult};

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, duration: Duration) -> bool {
    let elapsed = (now - since).num_milliseconds();
    elapsed >= 0 && elapsed as u128 >= duration.as_millis()
}

// Everything needed to compute a fresh status. Shared with the status provider so that it can
// query the store directly.
struct StatusPoller {
    store: Arc<dyn BigSegmentStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl StatusPoller {
    fn poll(&self) -> BigSegmentStoreStatus {
        match self.store.get_metadata() {
            Ok(metadata) => {
                let stale = match metadata.last_up_to_date {
                    None => true,
                    Some(last) => elapsed_at_least(last, self.clock.now(), self.stale_after),
                };
                BigSegmentStoreStatus {
                    available: true,
                    stale,
                }
            }
            Err(e) => {
                error!("big segment store metadata query failed: {}", e);
                BigSegmentStoreStatus::UNAVAILABLE
            }
        }
    }
}

/// Resolves Big Segment membership for contexts, caching memberships locally and polling the
/// store's health no more often than the configured interval.
///
/// Without a store every lookup returns `None`.
pub struct BigSegmentStoreManager {
    poller: Option<Arc<StatusPoller>>,
    config: BigSegmentsConfig,
    clock: Arc<dyn Clock>,
    cache: Box<dyn MembershipCache>,
    last_status: Mutex<Option<(BigSegmentStoreStatus, DateTime<Utc>)>>,
    provider: Arc<BigSegmentStoreStatusProvider>,
}

impl BigSegmentStoreManager {
    pub fn builder() -> BigSegmentStoreManagerBuilder {
        BigSegmentStoreManagerBuilder::default()
    }

    pub fn status_provider(&self) -> Arc<BigSegmentStoreStatusProvider> {
        Arc::clone(&self.provider)
    }

    /// Looks up the membership of the context with key `context_key`.
    ///
    /// Store failures never surface as errors: the result then has no membership and a
    /// [BigSegmentsStatus::StoreError] status.
    pub fn context_membership(&self, context_key: &str) -> Option<MembershipResult> {
        let poller = self.poller.as_ref()?;

        let membership = match self.cache.get(context_key) {
            Some(membership) => Some(membership),
            None => {
                debug!("big segment membership cache miss for context {}", context_key);
                match poller.store.get_membership(&hash_context_key(context_key)) {
                    Ok(membership) => {
                        let membership = membership.unwrap_or_default();
                        self.cache.set(
                            context_key,
                            membership.clone(),
                            self.config.context_cache_time,
                        );
                        Some(membership)
                    }
                    Err(e) => {
                        error!("big segment store membership query failed: {}", e);
                        None
                    }
                }
            }
        };

        let store_status = self.status();
        let status = match membership {
            None => BigSegmentsStatus::StoreError,
            Some(_) if !store_status.available => BigSegmentsStatus::StoreError,
            Some(_) if store_status.stale => BigSegmentsStatus::Stale,
            Some(_) => BigSegmentsStatus::Healthy,
        };
        Some(MembershipResult { membership, status })
    }

    /// The last known store status, re-polled if the poll interval has passed since the last
    /// poll or if there has never been one.
    pub fn status(&self) -> BigSegmentStoreStatus {
        if self.poller.is_none() {
            return BigSegmentStoreStatus::UNAVAILABLE;
        }
        let now = self.clock.now();
        if let Some((status, polled_at)) = *self.last_status.lock() {
            if !elapsed_at_least(polled_at, now, self.config.status_poll_interval) {
                return status;
            }
        }
        self.poll_store_and_update_status()
    }

    /// Polls the store now, records the result, and passes it to the status provider.
    pub fn poll_store_and_update_status(&self) -> BigSegmentStoreStatus {
        let status = match &self.poller {
            Some(poller) => poller.poll(),
            None => BigSegmentStoreStatus::UNAVAILABLE,
        };
        *self.last_status.lock() = Some((status, self.clock.now()));
        self.provider.update_status(status);
        status
    }
}

impl MembershipResolver for BigSegmentStoreManager {
    fn context_membership(&self, context_key: &str) -> Option<MembershipResult> {
        BigSegmentStoreManager::context_membership(self, context_key)
    }
}

#[derive(Default)]
pub struct BigSegmentStoreManagerBuilder {
    store: Option<Arc<dyn BigSegmentStore>>,
    config: BigSegmentsConfig,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<Box<dyn MembershipCache>>,
}

impl BigSegmentStoreManagerBuilder {
    pub fn store(mut self, store: Arc<dyn BigSegmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: BigSegmentsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the default moka cache, which is sized from the config.
    pub fn cache(mut self, cache: Box<dyn MembershipCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> BigSegmentStoreManager {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = self.cache.unwrap_or_else(|| {
            Box::new(MokaMembershipCache::new(self.config.context_cache_size))
        });
        let poller = self.store.map(|store| {
            Arc::new(StatusPoller {
                store,
                clock: Arc::clone(&clock),
                stale_after: self.config.stale_after,
            })
        });

        let status_fn: Box<dyn Fn() -> BigSegmentStoreStatus + Send + Sync> = match &poller {
            Some(poller) => {
                let poller = Arc::clone(poller);
                Box::new(move || poller.poll())
            }
            None => Box::new(|| BigSegmentStoreStatus::UNAVAILABLE),
        };

        BigSegmentStoreManager {
            poller,
            config: self.config,
            clock,
            cache,
            last_status: Mutex::new(None),
            provider: Arc::new(BigSegmentStoreStatusProvider::new(status_fn)),
        }
    }
}
