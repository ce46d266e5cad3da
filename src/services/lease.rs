//! Per-title mutual exclusion
//!
//! Reconciliation is a check-then-act sequence and must not run concurrently
//! for the same logical title. A [`Lease`] is held for the whole
//! evaluate-and-apply step and released on every exit path when dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::db::TitleKey;
use crate::error::{ImportError, ImportResult};
use crate::services::text_utils::normalize_title;

/// Lease key of a logical title, insensitive to case and punctuation
pub fn title_lease_key(key: &TitleKey) -> String {
    match key {
        TitleKey::Movie { title, year } => format!("movie:{}:{}", normalize_title(title), year),
        TitleKey::Series { title } => format!("series:{}", normalize_title(title)),
    }
}

/// A held lease. Released when dropped or via [`Lease::release`].
pub struct Lease {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Lease {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!(key = %self.key, "Lease released");
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}

#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Wait up to `timeout` for the lease on `key`; `None` if still held
    async fn acquire(&self, key: &str, timeout: Duration) -> Option<Lease>;
}

/// Leases for every title in `keys`, taken in sorted order so that two
/// callers needing overlapping sets cannot deadlock
pub async fn acquire_titles(
    leases: &dyn LeaseManager,
    keys: &[&TitleKey],
    timeout: Duration,
) -> ImportResult<Vec<Lease>> {
    let mut lease_keys: Vec<String> = keys.iter().map(|k| title_lease_key(k)).collect();
    lease_keys.sort();
    lease_keys.dedup();

    let mut held = Vec::with_capacity(lease_keys.len());
    for key in lease_keys {
        match leases.acquire(&key, timeout).await {
            Some(lease) => held.push(lease),
            None => return Err(ImportError::LeaseUnavailable { key }),
        }
    }
    Ok(held)
}

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// In-process lease manager: one async mutex per key
#[derive(Clone, Default)]
pub struct LocalLeaseManager {
    locks: LockMap,
}

impl LocalLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with a holder or waiter
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Forget `key` once nobody holds or waits for it
    fn prune(locks: &LockMap, key: &str) {
        let mut map = locks.lock();
        if map.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(key);
        }
    }
}

#[async_trait]
impl LeaseManager for LocalLeaseManager {
    async fn acquire(&self, key: &str, timeout: Duration) -> Option<Lease> {
        let mutex = self.entry(key);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(key = %key, "Lease acquired");
                let locks = self.locks.clone();
                let owned_key = key.to_string();
                Some(Lease::new(key, move || {
                    drop(guard);
                    Self::prune(&locks, &owned_key);
                }))
            }
            Err(_) => {
                warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Lease unavailable");
                Self::prune(&self.locks, key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_title_lease_key_normalizes() {
        let a = TitleKey::Movie {
            title: "Alien".into(),
            year: 1979,
        };
        let b = TitleKey::Movie {
            title: "ALIEN".into(),
            year: 1979,
        };
        assert_eq!(title_lease_key(&a), title_lease_key(&b));
        assert_eq!(title_lease_key(&a), "movie:alien:1979");
        assert_eq!(
            title_lease_key(&TitleKey::Series { title: "Show".into() }),
            "series:show"
        );
    }

    #[tokio::test]
    async fn test_acquire_titles_dedups_equivalent_keys() {
        let leases = LocalLeaseManager::new();
        let a = TitleKey::Movie {
            title: "Se7en".into(),
            year: 1995,
        };
        let b = TitleKey::Movie {
            title: "SE7EN".into(),
            year: 1995,
        };
        let c = TitleKey::Movie {
            title: "Seven".into(),
            year: 1995,
        };
        let held = acquire_titles(&leases, &[&c, &a, &b], Duration::from_millis(50))
            .await
            .unwrap();
        let keys: Vec<_> = held.iter().map(|l| l.key().to_string()).collect();
        assert_eq!(keys, vec!["movie:se7en:1995", "movie:seven:1995"]);

        let blocked = acquire_titles(&leases, &[&a], Duration::from_millis(20)).await;
        assert!(matches!(
            blocked,
            Err(ImportError::LeaseUnavailable { key }) if key == "movie:se7en:1995"
        ));
        drop(held);
        assert_eq!(leases.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let leases = LocalLeaseManager::new();
        let held = leases.acquire("movie:alien:1979", Duration::from_millis(50)).await;
        assert!(held.is_some());
        let second = leases.acquire("movie:alien:1979", Duration::from_millis(50)).await;
        assert!(second.is_none());

        // Different keys do not contend
        assert!(leases.acquire("movie:heat:1995", Duration::from_millis(50)).await.is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_lease() {
        let leases = LocalLeaseManager::new();
        {
            let _lease = leases.acquire("k", Duration::from_millis(50)).await.unwrap();
        }
        assert!(leases.acquire("k", Duration::from_millis(50)).await.is_some());
    }

    #[tokio::test]
    async fn test_explicit_release_and_pruning() {
        let leases = LocalLeaseManager::new();
        let lease = leases.acquire("k", Duration::from_millis(50)).await.unwrap();
        assert_eq!(lease.key(), "k");
        assert_eq!(leases.active_keys(), 1);
        lease.release();
        assert_eq!(leases.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_waiter_gets_lease_after_release() {
        let leases = LocalLeaseManager::new();
        let lease = leases.acquire("k", Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.acquire("k", Duration::from_secs(5)).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_serializes_critical_sections() {
        let leases = LocalLeaseManager::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let leases = leases.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _lease = leases.acquire("k", Duration::from_secs(10)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(leases.active_keys(), 0);
    }
}
