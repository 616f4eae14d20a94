//! Per-key async mutexes for the in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use stockyard_core::DomainError;
use stockyard_ledger::LockKey;

/// Guards for one acquired scope. Locks are released when this is dropped.
#[derive(Debug)]
pub struct LockGuards {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// One async mutex per lock key, created on first use.
///
/// The table itself is behind a short `std::sync::Mutex` that is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &LockKey) -> Result<Arc<AsyncMutex<()>>, DomainError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DomainError::invariant("lock table poisoned"))?;
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Acquire `keys` in the given order under one shared deadline.
    ///
    /// Callers must pass keys sorted (see `LockScope::lock_order`); that global
    /// order is what keeps concurrent scopes from deadlocking.
    pub async fn acquire(&self, keys: &[LockKey], timeout: Duration) -> Result<LockGuards, DomainError> {
        let deadline = Instant::now() + timeout;
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.mutex_for(key)?;
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    return Err(DomainError::busy(format!(
                        "timed out after {}ms waiting for {key:?}",
                        timeout.as_millis()
                    )));
                }
            }
        }
        Ok(LockGuards { guards })
    }

    /// Drop table entries nobody holds or waits on.
    pub fn prune(&self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|_, m| Arc::strong_count(m) > 1);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_core::AggregateId;

    #[tokio::test]
    async fn second_acquirer_times_out_as_busy() {
        let table = LockTable::new();
        let key = LockKey::Document(AggregateId::new());

        let held = table
            .acquire(std::slice::from_ref(&key), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(held.len(), 1);

        let err = table
            .acquire(std::slice::from_ref(&key), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Busy(_)));

        drop(held);
        assert!(table
            .acquire(&[key], Duration::from_millis(20))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn prune_forgets_released_keys() {
        let table = LockTable::new();
        let keys = [
            LockKey::Document(AggregateId::new()),
            LockKey::Document(AggregateId::new()),
        ];
        let guards = table.acquire(&keys, Duration::from_millis(50)).await.unwrap();
        table.prune();
        assert_eq!(table.len(), 2);
        drop(guards);
        table.prune();
        assert!(table.is_empty());
    }
}
