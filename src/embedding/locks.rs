use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per user id. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

pub struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    id: Uuid,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub async fn acquire(&self, id: Uuid) -> UserLockGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(id).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        UserLockGuard {
            locks: self,
            id,
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // map + self.lock
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.id);
        }
    }
}
