//! Per-volume single-flight registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = DashMap<String, Arc<Mutex<()>>>;

/// Serialises mutating operations on the same remote volume name while
/// letting different names proceed concurrently.
#[derive(Clone, Debug, Default)]
pub struct VolumeLocks {
    inner: Arc<Registry>,
}

impl VolumeLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `name` is alive.
    pub async fn acquire(&self, name: &str) -> VolumeGuard {
        let mutex = Arc::clone(self.inner.entry(name.to_owned()).or_default().value());
        let guard = mutex.lock_owned().await;
        VolumeGuard {
            name: name.to_owned(),
            registry: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Number of names with a live or pending guard.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no name is currently locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Holds the lock for one volume name; idle registry entries are pruned on
/// drop.
#[derive(Debug)]
pub struct VolumeGuard {
    name: String,
    registry: Arc<Registry>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_name_is_serialised() {
        let locks = VolumeLocks::new();
        let first = locks.acquire("docker-a").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move { contender.acquire("docker-a").await });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished(), "second guard acquired while first alive");

        drop(first);
        let second = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("second guard acquired after release")
            .expect("task joined");
        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = VolumeLocks::new();
        let _a = locks.acquire("docker-a").await;
        let b = timeout(Duration::from_millis(100), locks.acquire("docker-b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_names_are_pruned() {
        let locks = VolumeLocks::new();
        drop(locks.acquire("docker-a").await);
        assert_eq!(locks.len(), 0);
    }
}
