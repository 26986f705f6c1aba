//! Expiring credential cache with single-flight acquisition
//!
//! At most one factory runs per key at a time. Concurrent callers for the
//! same key await the in-flight acquisition and all receive its result,
//! success or failure. Failures are never cached. Expired entries are
//! dropped lazily on the next lookup of their key.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::ActorToken;

/// Default refresh margin before expiry
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;

/// Values that carry their own expiry
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;
}

impl Expiring for ActorToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

type Acquisition<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    Ready(V),
    Pending(Acquisition<V>),
}

/// Key -> token cache
pub struct CredentialCache<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
    safety_margin: Duration,
}

impl<V> CredentialCache<V>
where
    V: Expiring + Clone + Send + Sync + 'static,
{
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            safety_margin,
        }
    }

    /// Whether `value` is still usable at `now`
    pub fn is_live(&self, value: &V, now: DateTime<Utc>) -> bool {
        value.expires_at() - self.safety_margin > now
    }

    /// Return the live entry for `key`, or run `factory` once to create it
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let acquisition = {
            let mut slots = self.lock()?;
            match slots.get(key) {
                Some(Slot::Ready(value)) if self.is_live(value, Utc::now()) => {
                    return Ok(value.clone());
                }
                Some(Slot::Pending(pending)) => pending.clone(),
                _ => {
                    tracing::debug!(key, "Starting credential acquisition");
                    let pending = factory().boxed().shared();
                    slots.insert(key.to_string(), Slot::Pending(pending.clone()));
                    pending
                }
            }
        };

        let handle = acquisition.clone();
        let result = acquisition.await;

        let mut slots = self.lock()?;
        let still_ours = matches!(
            slots.get(key),
            Some(Slot::Pending(pending)) if pending.ptr_eq(&handle)
        );
        if still_ours {
            match &result {
                Ok(value) => {
                    slots.insert(key.to_string(), Slot::Ready(value.clone()));
                }
                Err(_) => {
                    slots.remove(key);
                }
            }
        }

        result
    }

    /// Drop any entry for `key`
    pub fn invalidate(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    /// Number of keys holding a ready or pending entry
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot<V>>>> {
        self.slots
            .lock()
            .map_err(|_| AppError::Internal("credential cache lock poisoned".to_string()))
    }
}
