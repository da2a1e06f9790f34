//! Forwarder control-channel locks

use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Named mutual-exclusion token for one forwarder's control channel.
///
/// Clones share the same underlying lock.
#[derive(Clone)]
pub struct ForwarderLock {
    name: Arc<str>,
    inner: Arc<Mutex<()>>,
}

impl ForwarderLock {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the lock is free and take it
    pub async fn acquire(&self) -> LockGuard {
        trace!("Waiting for lock {}", self.name);
        let guard = self.inner.clone().lock_owned().await;
        trace!("Acquired lock {}", self.name);
        LockGuard {
            name: self.name.clone(),
            _guard: guard,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Whether both handles refer to the same lock
    pub fn same_as(&self, other: &ForwarderLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ForwarderLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Held lock; released when dropped
pub struct LockGuard {
    name: Arc<str>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        trace!("Released lock {}", self.name);
    }
}
