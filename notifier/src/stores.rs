//! Store seams
//!
//! The engine never talks to a backend directly. It reads and writes
//! through these traits, which the host implements (the bundled
//! [`Repository`](crate::database::Repository) implements all four).
//! Implementations must tolerate concurrent writers; the engine holds no
//! lock across calls.

use crate::database::{
    Category, Event, EventKind, NewNotification, Notification, NotificationFilter, UserId,
};
use crate::error::Result;
use crate::services::preferences::RawPreferences;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to deadline-bearing records
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events of `kind` whose deadline is at or after `not_before`.
    ///
    /// Records with no deadline at all are returned too so the caller can
    /// report them.
    async fn list_due(&self, kind: EventKind, not_before: DateTime<Utc>) -> Result<Vec<Event>>;

    /// Deadlines for the given ids. Ids that no longer exist are absent
    /// from the map; existing records without a deadline map to `None`.
    async fn deadlines(
        &self,
        kind: EventKind,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>>;
}

/// Course enrollment lookup used to fan out course-scoped reminders
#[async_trait]
pub trait MembershipIndex: Send + Sync {
    async fn users_for_course(&self, course_id: &str) -> Result<Vec<UserId>>;
}

/// Per-user notification settings, returned exactly as stored
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<RawPreferences>;
}

/// Log of delivered notifications
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Recipients holding a live notification for the event.
    async fn find_live(&self, event_ref: &str, category: Category) -> Result<Vec<UserId>>;

    /// Distinct event refs that still have live notifications in `category`.
    async fn live_event_refs(&self, category: Category) -> Result<Vec<String>>;

    async fn insert(&self, notification: NewNotification) -> Result<Notification>;

    /// Delete every notification matching `filter`, returning how many went.
    async fn delete_where(&self, filter: &NotificationFilter) -> Result<u64>;
}

/// The four collaborators bundled for handing around
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub memberships: Arc<dyn MembershipIndex>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: EventStore + MembershipIndex + PreferenceStore + NotificationStore + 'static,
    {
        Self {
            events: backend.clone(),
            memberships: backend.clone(),
            preferences: backend.clone(),
            notifications: backend,
        }
    }
}
