//! Notification writer
//!
//! Persists reminders and removes the ones whose event is over.

use crate::database::{Category, NewNotification, Notification, NotificationFilter};
use crate::error::{AppError, Result};
use crate::stores::{EventStore, NotificationStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of writing a batch of reminders
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: Vec<Notification>,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationWriter {
    events: Arc<dyn EventStore>,
    notifications: Arc<dyn NotificationStore>,
}

impl NotificationWriter {
    pub fn new(events: Arc<dyn EventStore>, notifications: Arc<dyn NotificationStore>) -> Self {
        Self {
            events,
            notifications,
        }
    }

    /// Persist a single notification
    pub async fn create(&self, input: NewNotification) -> Result<Notification> {
        let notification = self.notifications.insert(input).await?;

        tracing::info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            category = %notification.category,
            target = notification.delivery_target.as_str(),
            "Notification created"
        );

        Ok(notification)
    }

    /// Persist every input, continuing past individual failures.
    pub async fn create_all(&self, inputs: Vec<NewNotification>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for input in inputs {
            let user_id = input.user_id.clone();
            match self.create(input).await {
                Ok(notification) => outcome.created.push(notification),
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        error = %e,
                        "Failed to create notification"
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    /// Delete every live notification referencing the event.
    pub async fn purge_expired_for_event(
        &self,
        event_id: &str,
        category: Category,
    ) -> Result<u64> {
        let deleted = self
            .notifications
            .delete_where(&NotificationFilter::for_event(event_id, category))
            .await?;

        if deleted > 0 {
            tracing::info!(
                event_id,
                category = %category,
                deleted,
                "Purged notifications for past event"
            );
        }

        Ok(deleted)
    }

    /// Purge notifications whose event deadline is strictly before `now`,
    /// or whose event no longer exists.
    ///
    /// Only events that still have live notifications are looked up. A
    /// failed purge for one event is logged and the rest still run.
    pub async fn purge_expired(&self, category: Category, now: DateTime<Utc>) -> Result<u64> {
        let kind = category
            .event_kind()
            .ok_or_else(|| AppError::UnknownCategory(category.to_string()))?;

        let refs = self.notifications.live_event_refs(category).await?;
        if refs.is_empty() {
            return Ok(0);
        }

        let deadlines = self.events.deadlines(kind, &refs).await?;
        let mut purged = 0;

        for event_ref in &refs {
            let expired = match deadlines.get(event_ref) {
                None => {
                    tracing::debug!(event_id = %event_ref, "Event no longer exists");
                    true
                }
                Some(Some(deadline)) => *deadline < now,
                // No deadline to compare against; leave it for the inbox.
                Some(None) => false,
            };

            if !expired {
                continue;
            }

            match self.purge_expired_for_event(event_ref, category).await {
                Ok(deleted) => purged += deleted,
                Err(e) => {
                    tracing::error!(
                        event_id = %event_ref,
                        error = %e,
                        "Failed to purge notifications"
                    );
                }
            }
        }

        Ok(purged)
    }
}
