//! Per-record write lock kept in the store.
//!
//! The lock key holds the expiry time of the current lease, in fractional
//! epoch seconds. To acquire:
//!
//! 1. `set_if_absent(lock, now + lease)`; success means the lock is ours.
//! 2. Otherwise read the lease. If it vanished meanwhile, retry at once.
//! 3. If it has not expired, sleep one poll interval and retry.
//! 4. If it has expired, `get_and_set` a fresh lease. Only the racer whose
//!    swap returned an expired (or missing) lease owns the lock; the others
//!    retry.
//!
//! Releasing deletes the key. Holders that crash stop blocking others once
//! their lease runs out.

use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use redmap_store::KvStore;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{ModelError, Result};

/// Seconds since the epoch, as a float.
fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Whether a stored lease has run out. Unreadable leases count as expired.
fn lease_expired(lease: &str, now: f64) -> bool {
    lease.trim().parse::<f64>().map_or(true, |expiry| expiry < now)
}

/// A held record lock. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    store: &'a dyn KvStore,
    key: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl<'a> LockGuard<'a> {
    /// Acquire the lock at `key`, blocking until it is free, its lease has
    /// expired, or `config.max_attempts` is exhausted.
    pub fn acquire(store: &'a dyn KvStore, key: String, config: &LockConfig) -> Result<Self> {
        let lease = config.lease.as_secs_f64();
        let mut attempts: u32 = 0;

        loop {
            if let Some(max) = config.max_attempts {
                if attempts >= max {
                    warn!(key = %key, attempts, "giving up on record lock");
                    return Err(ModelError::LockTimeout { key, attempts });
                }
            }
            attempts += 1;

            let expiry = format!("{:.6}", now_secs() + lease);
            if store.set_if_absent(&key, &expiry)? {
                debug!(key = %key, attempts, "lock acquired");
                return Ok(Self::held(store, key));
            }

            let Some(current) = store.get(&key)? else {
                continue;
            };

            if !lease_expired(&current, now_secs()) {
                debug!(key = %key, attempts, "lock busy; waiting");
                thread::sleep(config.poll_interval);
                continue;
            }

            let expiry = format!("{:.6}", now_secs() + lease);
            let stolen = store.get_and_set(&key, &expiry)?;
            if stolen.map_or(true, |prev| lease_expired(&prev, now_secs())) {
                debug!(key = %key, attempts, "expired lock taken over");
                return Ok(Self::held(store, key));
            }
        }
    }

    fn held(store: &'a dyn KvStore, key: String) -> Self {
        Self {
            store,
            key,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock, reporting store failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.delete(&self.key)?;
        debug!(key = %self.key, "lock released");
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.delete(&self.key) {
            warn!(key = %self.key, error = %e, "failed to release record lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redmap_store::InMemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn fast() -> LockConfig {
        LockConfig {
            lease: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            max_attempts: None,
        }
    }

    #[test]
    fn acquire_and_release() {
        let store = InMemoryStore::new();
        let guard = LockGuard::acquire(&store, "P:1:_lock".into(), &fast()).unwrap();
        assert!(store.exists("P:1:_lock").unwrap());
        guard.release().unwrap();
        assert!(!store.exists("P:1:_lock").unwrap());
    }

    #[test]
    fn drop_releases() {
        let store = InMemoryStore::new();
        {
            let _guard = LockGuard::acquire(&store, "P:1:_lock".into(), &fast()).unwrap();
        }
        assert!(!store.exists("P:1:_lock").unwrap());
    }

    #[test]
    fn expired_lease_is_stolen() {
        let store = InMemoryStore::new();
        let stale = format!("{:.6}", now_secs() - 10.0);
        store.set("P:1:_lock", &stale).unwrap();

        let guard = LockGuard::acquire(&store, "P:1:_lock".into(), &fast()).unwrap();
        let lease: f64 = store.get("P:1:_lock").unwrap().unwrap().parse().unwrap();
        assert!(lease > now_secs());
        guard.release().unwrap();
    }

    #[test]
    fn garbage_lease_counts_as_expired() {
        let store = InMemoryStore::new();
        store.set("P:1:_lock", "garbage").unwrap();
        let guard = LockGuard::acquire(&store, "P:1:_lock".into(), &fast()).unwrap();
        guard.release().unwrap();
    }

    #[test]
    fn live_lease_times_out_with_bounded_attempts() {
        let store = InMemoryStore::new();
        let live = format!("{:.6}", now_secs() + 60.0);
        store.set("P:1:_lock", &live).unwrap();

        let config = LockConfig {
            max_attempts: Some(3),
            ..fast()
        };
        let err = LockGuard::acquire(&store, "P:1:_lock".into(), &config).unwrap_err();
        assert!(matches!(err, ModelError::LockTimeout { attempts: 3, .. }));
        // The holder's lease is untouched.
        assert_eq!(store.get("P:1:_lock").unwrap().unwrap(), live);
    }

    #[test]
    fn second_holder_waits_for_release() {
        let store = Arc::new(InMemoryStore::new());
        let guard = LockGuard::acquire(&*store, "P:1:_lock".into(), &fast()).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let store = Arc::clone(&store);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let config = LockConfig {
                    lease: Duration::from_secs(30),
                    ..fast()
                };
                let g = LockGuard::acquire(&*store, "P:1:_lock".into(), &config).unwrap();
                acquired.store(true, Ordering::SeqCst);
                g.release().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        guard.release().unwrap();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn crashed_holder_expires() {
        let store = InMemoryStore::new();
        let config = LockConfig {
            lease: Duration::from_millis(50),
            ..fast()
        };
        let guard = LockGuard::acquire(&store, "P:1:_lock".into(), &config).unwrap();
        std::mem::forget(guard);

        let start = Instant::now();
        let guard = LockGuard::acquire(&store, "P:1:_lock".into(), &config).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        guard.release().unwrap();
    }

    #[test]
    fn lease_expiry_parsing() {
        assert!(lease_expired("1.0", 2.0));
        assert!(!lease_expired("3.0", 2.0));
        assert!(lease_expired("nope", 2.0));
    }
}
