//! Duplicate guard
//!
//! Keeps reminders at most once per (user, event, category). The check
//! reads the notification log before any write for the event; there is no
//! uniqueness constraint behind it, so two writers racing on the same
//! event can still both insert. That window is accepted.

use crate::database::{Category, UserId};
use crate::error::Result;
use crate::stores::NotificationStore;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct DuplicateGuard {
    notifications: Arc<dyn NotificationStore>,
}

impl DuplicateGuard {
    pub fn new(notifications: Arc<dyn NotificationStore>) -> Self {
        Self { notifications }
    }

    /// Users who already hold a live notification for the event.
    pub async fn already_notified(
        &self,
        event_id: &str,
        category: Category,
    ) -> Result<HashSet<UserId>> {
        let users = self.notifications.find_live(event_id, category).await?;
        Ok(users.into_iter().collect())
    }

    /// Drop already-notified users (and repeats) from `candidates`,
    /// keeping the original order.
    pub async fn retain_unnotified(
        &self,
        event_id: &str,
        category: Category,
        candidates: Vec<UserId>,
    ) -> Result<Vec<UserId>> {
        let mut seen = self.already_notified(event_id, category).await?;
        let before = candidates.len();

        let remaining: Vec<UserId> = candidates
            .into_iter()
            .filter(|user| seen.insert(user.clone()))
            .collect();

        if remaining.len() < before {
            tracing::debug!(
                event_id,
                category = %category,
                skipped = before - remaining.len(),
                "Skipping users already notified"
            );
        }

        Ok(remaining)
    }
}
