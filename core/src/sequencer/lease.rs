//! Per-session execution lease
//!
//! At most one run may be in flight per session. A `SessionLease` is held
//! for the whole of a start/resume/recover/abort and released on drop; a
//! second request either waits for it or fails fast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("session {0} already has an execution in flight")]
    Busy(String),
}

/// Lease table shared by every session of one process
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Exclusive ownership of one session's execution slot
#[derive(Debug)]
pub struct SessionLease {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        tracing::trace!(session_id = %self.session_id, "session lease released");
    }
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        // The map only ever gains entries, so a poisoned lock is still consistent
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until the session is free, then take it
    pub async fn acquire(&self, session_id: &str) -> SessionLease {
        let guard = self.slot(session_id).lock_owned().await;
        tracing::trace!(session_id = %session_id, "session lease acquired");
        SessionLease {
            session_id: session_id.to_string(),
            _guard: guard,
        }
    }

    /// Take the session only if nobody holds it
    pub fn try_acquire(&self, session_id: &str) -> Result<SessionLease, LeaseError> {
        let guard = self
            .slot(session_id)
            .try_lock_owned()
            .map_err(|_| LeaseError::Busy(session_id.to_string()))?;
        Ok(SessionLease {
            session_id: session_id.to_string(),
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_holder_is_refused() {
        let leases = LeaseRegistry::new();
        let held = leases.acquire("s1").await;

        assert_eq!(
            leases.try_acquire("s1").unwrap_err(),
            LeaseError::Busy("s1".to_string())
        );
        assert!(leases.try_acquire("s2").is_ok());

        drop(held);
        assert!(leases.try_acquire("s1").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_acquire_waits_for_release() {
        let leases = LeaseRegistry::new();
        let held = leases.acquire("s1").await;

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.acquire("s1").await.session_id().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), "s1");
    }
}
