//! Per-(user, family) cache of paginated reminder lists.
//!
//! The only component holding mutable shared state across concurrent
//! readers. Every entry mutation is replace-only (an `Arc` swap), so a
//! reader always sees either the old or the new complete entry, never a
//! partially updated one. The cache serializes nothing on the write path;
//! its sole job is staleness control on the read side, with the store as
//! the single source of truth.

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::{Reminder, ReminderPage};
use crate::store::{ChangeFilter, DocumentStore};
use crate::timing::timed;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Staleness bound: entries older than this are treated as misses.
    pub max_age_secs: i64,
    /// Page size used for store queries on cache misses.
    pub page_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 120,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    user_id: String,
    family_id: Option<String>,
    page: u32,
}

#[derive(Debug)]
struct CacheEntry {
    items: Vec<Reminder>,
    has_more: bool,
    total_count: u32,
    inserted_at: DateTime<Utc>,
}

struct CacheInner {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheInner {
    async fn fresh_entry(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?.clone();
        let age = self.clock.now() - entry.inserted_at;
        if age <= Duration::seconds(self.config.max_age_secs) {
            Some(entry)
        } else {
            None
        }
    }

    async fn insert(&self, key: CacheKey, page: &ReminderPage) {
        let entry = Arc::new(CacheEntry {
            items: page.items.clone(),
            has_more: page.has_more,
            total_count: page.total_count,
            inserted_at: self.clock.now(),
        });
        self.entries.write().await.insert(key, entry);
    }

    /// Wholesale replacement from a change-feed snapshot: page 0 is
    /// replaced, later pages dropped, last writer wins at the snapshot
    /// level.
    async fn apply_snapshot(&self, user_id: &str, family_id: Option<&str>, snapshot: &[Reminder]) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| {
            !(key.user_id == user_id && key.family_id.as_deref() == family_id)
        });
        entries.insert(
            CacheKey {
                user_id: user_id.to_string(),
                family_id: family_id.map(str::to_string),
                page: 0,
            },
            Arc::new(CacheEntry {
                items: snapshot.to_vec(),
                has_more: false,
                total_count: snapshot.len() as u32,
                inserted_at: self.clock.now(),
            }),
        );
    }
}

/// Handle for a cache change-feed subscription. Cancelling (or dropping)
/// unregisters the listener; resubscribe to observe further updates.
pub struct ChangeSubscription {
    receiver: mpsc::Receiver<Vec<Reminder>>,
    pump: JoinHandle<()>,
}

impl ChangeSubscription {
    pub async fn next_update(&mut self) -> Option<Vec<Reminder>> {
        self.receiver.recv().await
    }

    pub fn cancel(self) {
        self.pump.abort();
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Explicitly constructed, injectable reminder-list cache with a defined
/// lifecycle: built at session start, disposed at sign-out. Cloning shares
/// the same underlying cache.
#[derive(Clone)]
pub struct FamilyReminderCache {
    inner: Arc<CacheInner>,
}

impl FamilyReminderCache {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                store,
                clock,
                config,
            }),
        }
    }

    /// One page of the user's reminder list. A fresh cached entry is served
    /// as-is; otherwise the store is queried and the result cached under
    /// `(user, family, page)`, replacing whatever was there.
    pub async fn get(
        &self,
        user_id: &str,
        family_id: Option<&str>,
        page: u32,
        use_cache: bool,
    ) -> Result<ReminderPage, CoreError> {
        let key = CacheKey {
            user_id: user_id.to_string(),
            family_id: family_id.map(str::to_string),
            page,
        };

        if use_cache {
            if let Some(entry) = self.inner.fresh_entry(&key).await {
                debug!(user_id, page, "reminder cache hit");
                return Ok(ReminderPage {
                    items: entry.items.clone(),
                    has_more: entry.has_more,
                    total_count: entry.total_count,
                });
            }
        }

        debug!(user_id, page, "reminder cache miss");
        let (result, _elapsed) = timed(
            "reminder_page_query",
            self.inner
                .store
                .query_by_owner(user_id, page, self.inner.config.page_size),
        )
        .await;
        let fetched = result?;

        self.inner.insert(key, &fetched).await;
        Ok(fetched)
    }

    /// Drop every cached page for the user, across all family scopes:
    /// membership or permission changes can alter which items belong on any
    /// page, so partial invalidation is never safe.
    pub async fn invalidate(&self, user_id: &str) {
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.user_id != user_id);
        debug!(
            user_id,
            dropped = before - entries.len(),
            "reminder cache invalidated"
        );
    }

    /// Subscribe to updated reminder lists for the user. Snapshots from the
    /// store's change feed replace the cached pages wholesale before being
    /// forwarded to the subscriber.
    pub async fn on_change(
        &self,
        user_id: &str,
        family_id: Option<&str>,
    ) -> Result<ChangeSubscription, CoreError> {
        let mut store_sub = self
            .inner
            .store
            .subscribe(ChangeFilter {
                user_id: user_id.to_string(),
                family_id: family_id.map(str::to_string),
            })
            .await?;

        let (tx, rx) = mpsc::channel(16);
        let inner = self.inner.clone();
        let user = user_id.to_string();
        let family = family_id.map(str::to_string);

        let pump = tokio::spawn(async move {
            while let Some(snapshot) = store_sub.next_snapshot().await {
                inner.apply_snapshot(&user, family.as_deref(), &snapshot).await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        });

        Ok(ChangeSubscription { receiver: rx, pump })
    }

    /// Sign-out teardown: drop all cached entries. Outstanding
    /// subscriptions are cancelled by their holders.
    pub async fn dispose(&self) {
        self.inner.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{NotificationPolicy, ReminderStatus};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 10)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
                .and_utc(),
        ))
    }

    fn reminder(owner: &str, day: u32) -> Reminder {
        let now = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            .and_utc();
        Reminder {
            id: Uuid::now_v7(),
            owner_id: owner.to_string(),
            family_id: None,
            title: format!("Reminder {}", day),
            notes: None,
            due_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            due_time: None,
            timezone: "UTC".to_string(),
            anchor_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            recurrence: None,
            completed_occurrences: 0,
            status: ReminderStatus::Scheduled,
            notification_policy: NotificationPolicy::default(),
            assignment: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn cache_with_store(clock: Arc<FixedClock>) -> (FamilyReminderCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let cache = FamilyReminderCache::new(store.clone(), clock, CacheConfig::default());
        (cache, store)
    }

    #[tokio::test]
    async fn test_second_get_is_served_from_cache() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        store.create(&reminder("user-1", 5)).await.unwrap();

        let first = cache.get("user-1", None, 0, true).await.unwrap();
        assert_eq!(first.items.len(), 1);

        // A direct store write without invalidation is not yet visible:
        // the cached snapshot is served until it ages out.
        store.create(&reminder("user-1", 6)).await.unwrap();
        let second = cache.get("user-1", None, 0, true).await.unwrap();
        assert_eq!(second.items.len(), 1);

        let bypassed = cache.get("user-1", None, 0, false).await.unwrap();
        assert_eq!(bypassed.items.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_age_out() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        store.create(&reminder("user-1", 5)).await.unwrap();

        cache.get("user-1", None, 0, true).await.unwrap();
        store.create(&reminder("user-1", 6)).await.unwrap();

        clock.advance(Duration::seconds(CacheConfig::default().max_age_secs + 1));
        let refreshed = cache.get("user-1", None, 0, true).await.unwrap();
        assert_eq!(refreshed.items.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_then_get_returns_fresh_page_zero() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        store.create(&reminder("user-1", 5)).await.unwrap();

        cache.get("user-1", None, 0, true).await.unwrap();
        store.create(&reminder("user-1", 6)).await.unwrap();

        cache.invalidate("user-1").await;
        let fresh = cache.get("user-1", None, 0, true).await.unwrap();
        assert_eq!(fresh.items.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_every_page_for_the_user() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        for day in 1..=5 {
            store.create(&reminder("user-1", day)).await.unwrap();
        }
        store.create(&reminder("user-2", 1)).await.unwrap();

        cache.get("user-1", None, 0, true).await.unwrap();
        cache.get("user-1", None, 1, true).await.unwrap();
        cache.get("user-2", None, 0, true).await.unwrap();

        cache.invalidate("user-1").await;
        let entries = cache.inner.entries.read().await;
        assert!(entries.keys().all(|key| key.user_id != "user-1"));
        assert!(entries.keys().any(|key| key.user_id == "user-2"));
    }

    #[tokio::test]
    async fn test_change_feed_replaces_cache_wholesale() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        store.create(&reminder("user-1", 5)).await.unwrap();
        cache.get("user-1", None, 0, true).await.unwrap();

        let mut sub = cache.on_change("user-1", None).await.unwrap();
        store.create(&reminder("user-1", 6)).await.unwrap();

        let update = sub.next_update().await.unwrap();
        assert_eq!(update.len(), 2);

        // The cached page 0 was replaced by the snapshot, no explicit
        // invalidation needed.
        let page = cache.get("user-1", None, 0, true).await.unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_delivering() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        let sub = cache.on_change("user-1", None).await.unwrap();
        sub.cancel();

        store.create(&reminder("user-1", 5)).await.unwrap();
        // The pump is gone; nothing panics and the store write goes through.
        assert_eq!(store.query_by_owner("user-1", 0, 10).await.unwrap().total_count, 1);
    }

    #[tokio::test]
    async fn test_dispose_clears_entries() {
        let clock = fixed_clock();
        let (cache, store) = cache_with_store(clock.clone());
        store.create(&reminder("user-1", 5)).await.unwrap();
        cache.get("user-1", None, 0, true).await.unwrap();

        cache.dispose().await;
        assert!(cache.inner.entries.read().await.is_empty());
    }
}
