//! Session gate
//!
//! Ticks only run while someone is signed in. The host owns a
//! [`SessionHandle`] and flips it on sign-in/sign-out.

use std::sync::Arc;
use tokio::sync::watch;

/// Answers whether an authenticated session is present
pub trait SessionGate: Send + Sync {
    fn has_session(&self) -> bool;
}

/// Shared handle holding the signed-in user, if any
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<watch::Sender<Option<String>>>,
}

impl SessionHandle {
    /// A handle with nobody signed in
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::info!("Session started for {}", user_id);
        self.current.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        if self.current.send_replace(None).is_some() {
            tracing::info!("Session ended");
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    /// Resolves once nobody is signed in.
    pub async fn signed_out(&self) {
        let mut rx = self.current.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|user| user.is_none()).await;
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate for SessionHandle {
    fn has_session(&self) -> bool {
        self.current.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sign_in_and_out() {
        let session = SessionHandle::new();
        assert!(!session.has_session());

        session.sign_in("u1");
        assert!(session.has_session());
        assert_eq!(session.user_id(), Some("u1".to_string()));

        let clone = session.clone();
        clone.sign_out();
        assert!(!session.has_session());
    }

    #[tokio::test]
    async fn test_signed_out_resolves_on_sign_out() {
        let session = SessionHandle::new();
        session.sign_in("u1");

        let watcher = session.clone();
        let waiting = tokio::spawn(async move { watcher.signed_out().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        session.sign_out();
        tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
    }
}
