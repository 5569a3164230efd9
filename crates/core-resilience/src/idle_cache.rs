//! Keyed cache with idle-time eviction
//!
//! Entries not accessed for longer than the idle timeout are evicted lazily
//! on the next access to the cache, or explicitly through
//! [`IdleCache::evict_idle`]. An optional [`EvictionListener`] is notified for
//! every removed entry after the map lock has been released.
//!
//! An entry reported busy by the in-use check is never evicted; its idle
//! timer restarts instead.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Receives entries removed from an [`IdleCache`]
#[async_trait::async_trait]
pub trait EvictionListener<K, V>: Send + Sync {
    /// Called once per removed entry
    async fn on_evict(&self, key: K, value: V);
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            last_access: now,
        }
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_access) > idle_timeout
    }
}

/// Mutex-guarded map whose entries expire after a period without access
pub struct IdleCache<K, V> {
    idle_timeout: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
    in_use: Option<InUseCheck<V>>,
}

/// Reports whether a cached value is still held by a caller
pub type InUseCheck<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

impl<K, V> IdleCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache evicting entries idle longer than `idle_timeout`
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            entries: Mutex::new(HashMap::new()),
            listener: None,
            in_use: None,
        }
    }

    /// Attach a listener notified for every evicted or invalidated entry
    pub fn with_listener(mut self, listener: Arc<dyn EvictionListener<K, V>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Keep entries for which `check` returns true, whatever their idle time
    pub fn with_in_use_check(mut self, check: InUseCheck<V>) -> Self {
        self.in_use = Some(check);
        self
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Return the value for `key`, creating it with `create` if absent.
    ///
    /// Lookup and creation happen under one lock, so concurrent callers for
    /// the same key observe a single value. A failed creation leaves the
    /// cache without an entry for `key`.
    pub async fn get_or_try_insert_with<F, E>(&self, key: K, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let (result, expired) = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            let expired = self.drain_idle(&mut entries, now);

            let result = match entries.get_mut(&key) {
                Some(entry) => {
                    entry.last_access = now;
                    Ok(entry.value.clone())
                }
                None => create().map(|value| {
                    entries.insert(key, CacheEntry::new(value.clone(), now));
                    value
                }),
            };
            (result, expired)
        };

        self.notify(expired).await;
        result
    }

    /// Return the value for `key` if present and not idle
    pub async fn get(&self, key: &K) -> Option<V> {
        let (value, expired) = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            let expired = self.drain_idle(&mut entries, now);
            let value = entries.get_mut(key).map(|entry| {
                entry.last_access = now;
                entry.value.clone()
            });
            (value, expired)
        };

        self.notify(expired).await;
        value
    }

    /// Remove `key`, notifying the listener
    pub async fn invalidate(&self, key: &K) -> Option<V> {
        let removed = self.entries.lock().await.remove(key);
        let value = removed.as_ref().map(|entry| entry.value.clone());
        if let Some(entry) = removed {
            self.notify(vec![(key.clone(), entry.value)]).await;
        }
        value
    }

    /// Sweep all idle entries now; returns how many were evicted
    pub async fn evict_idle(&self) -> usize {
        let expired = {
            let mut entries = self.entries.lock().await;
            self.drain_idle(&mut entries, Instant::now())
        };
        let count = expired.len();
        self.notify(expired).await;
        count
    }

    /// Remove every entry, notifying the listener
    pub async fn clear(&self) {
        let drained: Vec<(K, V)> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(k, e)| (k, e.value)).collect()
        };
        self.notify(drained).await;
    }

    /// Number of entries, idle ones included until swept
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn drain_idle(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: Instant) -> Vec<(K, V)> {
        let mut idle = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !entry.is_idle(now, self.idle_timeout) {
                continue;
            }
            if self.in_use.as_ref().is_some_and(|check| check(&entry.value)) {
                entry.last_access = now;
            } else {
                idle.push(key.clone());
            }
        }

        idle.into_iter()
            .filter_map(|key| entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    async fn notify(&self, removed: Vec<(K, V)>) {
        if removed.is_empty() {
            return;
        }
        debug!(count = removed.len(), "Evicting cache entries");
        if let Some(listener) = &self.listener {
            for (key, value) in removed {
                listener.on_evict(key, value).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        evicted: std::sync::Mutex<Vec<(String, u32)>>,
    }

    #[async_trait::async_trait]
    impl EvictionListener<String, u32> for RecordingListener {
        async fn on_evict(&self, key: String, value: u32) {
            self.evicted.lock().unwrap().push((key, value));
        }
    }

    fn cache_with_listener(idle: Duration) -> (IdleCache<String, u32>, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let cache = IdleCache::new(idle).with_listener(listener.clone());
        (cache, listener)
    }

    #[tokio::test]
    async fn test_get_or_insert_creates_once() {
        let cache: IdleCache<String, u32> = IdleCache::new(Duration::from_secs(60));
        let mut calls = 0;

        let first = cache
            .get_or_try_insert_with("a".to_string(), || {
                calls += 1;
                Ok::<_, ()>(7)
            })
            .await
            .unwrap();
        let second = cache
            .get_or_try_insert_with("a".to_string(), || Ok::<_, ()>(99))
            .await
            .unwrap();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_no_entry() {
        let cache: IdleCache<String, u32> = IdleCache::new(Duration::from_secs(60));

        let result = cache
            .get_or_try_insert_with("a".to_string(), || Err::<u32, _>("boom"))
            .await;

        assert_eq!(result, Err("boom"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entries_evicted_lazily() {
        let (cache, listener) = cache_with_listener(Duration::from_secs(30 * 60));

        cache
            .get_or_try_insert_with("old".to_string(), || Ok::<_, ()>(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        cache
            .get_or_try_insert_with("new".to_string(), || Ok::<_, ()>(2))
            .await
            .unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&"old".to_string()).await, None);
        assert_eq!(
            *listener.evicted.lock().unwrap(),
            vec![("old".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_refreshes_idle_timer() {
        let (cache, listener) = cache_with_listener(Duration::from_secs(60));

        cache
            .get_or_try_insert_with("k".to_string(), || Ok::<_, ()>(5))
            .await
            .unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(45)).await;
            assert_eq!(cache.get(&"k".to_string()).await, Some(5));
        }

        assert_eq!(cache.evict_idle().await, 0);
        assert!(listener.evicted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_sweep() {
        let (cache, listener) = cache_with_listener(Duration::from_secs(60));

        cache
            .get_or_try_insert_with("a".to_string(), || Ok::<_, ()>(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        cache
            .get_or_try_insert_with("b".to_string(), || Ok::<_, ()>(2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(cache.evict_idle().await, 1);
        assert_eq!(cache.get(&"b".to_string()).await, Some(2));
        assert_eq!(listener.evicted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_entry_survives_idle_sweep() {
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = Arc::clone(&busy);
        let listener = Arc::new(RecordingListener::default());
        let cache: IdleCache<String, u32> = IdleCache::new(Duration::from_secs(60))
            .with_listener(listener.clone())
            .with_in_use_check(Arc::new(move |_: &u32| {
                flag.load(std::sync::atomic::Ordering::SeqCst)
            }));

        cache
            .get_or_try_insert_with("k".to_string(), || Ok::<_, ()>(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(cache.evict_idle().await, 0);
        assert_eq!(cache.len().await, 1);

        // The sweep restarted the idle timer
        busy.store(false, std::sync::atomic::Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.evict_idle().await, 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.evict_idle().await, 1);
        assert_eq!(
            *listener.evicted.lock().unwrap(),
            vec![("k".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_notify() {
        let (cache, listener) = cache_with_listener(Duration::from_secs(60));

        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            cache
                .get_or_try_insert_with(k.to_string(), || Ok::<_, ()>(v))
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate(&"a".to_string()).await, Some(1));
        assert_eq!(cache.invalidate(&"a".to_string()).await, None);
        assert_eq!(listener.evicted.lock().unwrap().len(), 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(listener.evicted.lock().unwrap().len(), 3);
    }
}
