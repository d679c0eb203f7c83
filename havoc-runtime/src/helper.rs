//! Scoped helper containers.
//!
//! A helper exists only so commands can run inside a target's network
//! namespace or cgroup. Acquiring one yields a [`HelperGuard`]; releasing the
//! guard stops and removes the helper. If the guard is dropped without being
//! released (its owning future was cancelled), `Drop` spawns the release on
//! the current tokio runtime so the helper is still torn down.
//!
//! Release always runs on its own task, so cancelling whoever awaits it does
//! not interrupt teardown halfway.
//!
//! A helper that exits by itself with a failure is reported by
//! [`HelperGuard::release`] as [`RuntimeError::HelperFailed`], after the
//! helper has been removed. [`HelperGuard::exited`] lets callers stop waiting
//! as soon as the helper is gone.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// Backend-specific helper teardown.
#[async_trait]
pub(crate) trait HelperReaper: Send + Sync {
    /// Stop and remove the helper with the given ID.
    ///
    /// If the helper had already exited with a failure, teardown still
    /// completes and the failure is returned as `HelperFailed`.
    async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError>;

    /// Resolve once the helper is no longer running.
    async fn wait_exit(&self, helper_id: &str) -> Result<(), RuntimeError>;
}

/// Ownership of a running helper container.
pub struct HelperGuard {
    id: String,
    target: String,
    reaper: Option<Arc<dyn HelperReaper>>,
}

impl HelperGuard {
    pub(crate) fn new(
        id: impl Into<String>,
        target: impl Into<String>,
        reaper: Arc<dyn HelperReaper>,
    ) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            reaper: Some(reaper),
        }
    }

    /// A guard with nothing to release (dry run).
    pub fn detached(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            reaper: None,
        }
    }

    /// Helper container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// ID of the container the helper is attached to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// True until the guard has been released.
    pub fn is_armed(&self) -> bool {
        self.reaper.is_some()
    }

    /// Resolve once the helper has stopped on its own.
    ///
    /// Never resolves for a detached guard, or when the helper cannot be
    /// watched.
    pub async fn exited(&self) {
        let Some(reaper) = &self.reaper else {
            return std::future::pending().await;
        };
        match reaper.wait_exit(&self.id).await {
            Ok(()) => debug!(helper = %self.id, target = %self.target, "helper exited"),
            Err(e) => {
                debug!(helper = %self.id, error = %e, "cannot watch helper");
                std::future::pending::<()>().await;
            }
        }
    }

    /// Stop and remove the helper.
    pub async fn release(mut self) -> Result<(), RuntimeError> {
        let Some(reaper) = self.reaper.take() else {
            return Ok(());
        };
        let id = self.id.clone();
        debug!(helper = %id, target = %self.target, "releasing helper");
        tokio::spawn(async move { reaper.reap(&id).await })
            .await
            .map_err(|e| RuntimeError::HelperFailed {
                helper: self.id.clone(),
                reason: format!("release task failed: {e}"),
            })?
    }
}

impl fmt::Debug for HelperGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperGuard")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        let Some(reaper) = self.reaper.take() else {
            return;
        };
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(helper = %id, target = %self.target, "helper dropped unreleased, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = reaper.reap(&id).await {
                        warn!(helper = %id, error = %e, "background helper release failed");
                    }
                });
            }
            Err(_) => {
                warn!(helper = %id, "helper dropped outside a tokio runtime, not released");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records reaped helper IDs.
    #[derive(Default)]
    pub(crate) struct RecordingReaper {
        pub(crate) reaped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HelperReaper for RecordingReaper {
        async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError> {
            self.reaped.lock().unwrap().push(helper_id.to_string());
            Ok(())
        }

        async fn wait_exit(&self, _helper_id: &str) -> Result<(), RuntimeError> {
            std::future::pending().await
        }
    }

    /// A helper that exits with `code` after `after`.
    struct ExitingReaper {
        after: Duration,
        code: i64,
    }

    #[async_trait]
    impl HelperReaper for ExitingReaper {
        async fn reap(&self, helper_id: &str) -> Result<(), RuntimeError> {
            if self.code == 0 {
                return Ok(());
            }
            Err(RuntimeError::HelperFailed {
                helper: helper_id.to_string(),
                reason: format!("exited with code {}", self.code),
            })
        }

        async fn wait_exit(&self, _helper_id: &str) -> Result<(), RuntimeError> {
            tokio::time::sleep(self.after).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_helper_ends_wait_and_fails_release() {
        let guard = HelperGuard::new(
            "h4",
            "t1",
            Arc::new(ExitingReaper {
                after: Duration::from_secs(2),
                code: 3,
            }),
        );

        let waited = tokio::time::timeout(Duration::from_secs(60), guard.exited()).await;
        assert!(waited.is_ok());

        let err = guard.release().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::HelperFailed { ref helper, ref reason }
                if helper == "h4" && reason.contains("code 3")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_guard_never_exits() {
        let guard = HelperGuard::detached("dry", "t1");
        let waited = tokio::time::timeout(Duration::from_secs(60), guard.exited()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn explicit_release_reaps_once() {
        let reaper = Arc::new(RecordingReaper::default());
        let guard = HelperGuard::new("h1", "t1", reaper.clone());
        assert!(guard.is_armed());

        guard.release().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*reaper.reaped.lock().unwrap(), vec!["h1"]);
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let reaper = Arc::new(RecordingReaper::default());
        {
            let _guard = HelperGuard::new("h2", "t1", reaper.clone());
        }
        // Let the spawned release run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*reaper.reaped.lock().unwrap(), vec!["h2"]);
    }

    #[tokio::test]
    async fn cancelled_owner_still_releases() {
        let reaper = Arc::new(RecordingReaper::default());
        let guard = HelperGuard::new("h3", "t1", reaper.clone());

        let owner = tokio::spawn(async move {
            let _held = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        owner.abort();
        let _ = owner.await;

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*reaper.reaped.lock().unwrap(), vec!["h3"]);
    }

    #[tokio::test]
    async fn detached_guard_is_noop() {
        let guard = HelperGuard::detached("dry", "t1");
        assert!(!guard.is_armed());
        guard.release().await.unwrap();
    }
}
