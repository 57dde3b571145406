//! Database models
//!
//! Rust structs representing the engine's entities.
//! All models use serde so a host can hand them to its own surfaces.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Identifier of a portal user
pub type UserId = String;

/// Category a notification and its preferences are scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Assignment,
    Exam,
    StudyPartner,
    SharedSession,
    System,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Assignment,
        Category::Exam,
        Category::StudyPartner,
        Category::SharedSession,
        Category::System,
    ];

    /// Key used in the preference blob and the `notifications.category` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Assignment => "assignment",
            Category::Exam => "exam",
            Category::StudyPartner => "studyPartner",
            Category::SharedSession => "sharedSession",
            Category::System => "system",
        }
    }

    /// Kind of event this category reminds about, if it has deadlines at all.
    pub fn event_kind(self) -> Option<EventKind> {
        match self {
            Category::Assignment => Some(EventKind::Assignment),
            Category::Exam => Some(EventKind::Exam),
            Category::StudyPartner => Some(EventKind::Partnership),
            Category::SharedSession | Category::System => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AppError::Corrupt(format!("unknown category '{}'", s)))
    }
}

/// Channel(s) a notification is flagged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTarget {
    Site,
    Push,
    Both,
}

impl DeliveryTarget {
    /// Resolve the target from channel switches.
    ///
    /// Site delivery is the floor: with both channels off the reminder
    /// still lands in the inbox.
    pub fn from_channels(push_enabled: bool, site_enabled: bool) -> Self {
        match (push_enabled, site_enabled) {
            (true, true) => DeliveryTarget::Both,
            (true, false) => DeliveryTarget::Push,
            (false, _) => DeliveryTarget::Site,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryTarget::Site => "site",
            DeliveryTarget::Push => "push",
            DeliveryTarget::Both => "both",
        }
    }
}

impl FromStr for DeliveryTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "site" => Ok(DeliveryTarget::Site),
            "push" => Ok(DeliveryTarget::Push),
            "both" => Ok(DeliveryTarget::Both),
            other => Err(AppError::Corrupt(format!("unknown delivery target '{}'", other))),
        }
    }
}

/// Kind of deadline-bearing record in the event store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Assignment,
    Exam,
    Partnership,
}

impl EventKind {
    /// Category reminders for this kind are filed under.
    pub fn category(self) -> Category {
        match self {
            EventKind::Assignment => Category::Assignment,
            EventKind::Exam => Category::Exam,
            EventKind::Partnership => Category::StudyPartner,
        }
    }
}

/// A deadline-bearing record read from the event store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    /// Assignment title, exam title or partner name
    pub title: String,
    /// Set for assignments and exams
    pub course_id: Option<String>,
    /// Set for partnerships, which belong to a single user
    pub owner_id: Option<UserId>,
    /// Missing on malformed records
    pub deadline: Option<DateTime<Utc>>,
}

/// A reminder delivered to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    pub category: Category,
    pub title: String,
    pub message: String,
    /// Assignment, exam or partnership id, depending on `category`
    pub event_ref: Option<String>,
    pub delivery_target: DeliveryTarget,
    pub is_read: bool,
    pub is_critical: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Create notification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub category: Category,
    pub title: String,
    pub message: String,
    pub event_ref: Option<String>,
    pub delivery_target: DeliveryTarget,
    pub is_critical: bool,
    pub expires_at: DateTime<Utc>,
}

/// Row shape of the `notifications` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub category: String,
    pub title: String,
    pub message: String,
    pub event_ref: Option<String>,
    pub delivery_target: String,
    pub is_read: bool,
    pub is_critical: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            category: row.category.parse()?,
            title: row.title,
            message: row.message,
            event_ref: row.event_ref,
            delivery_target: row.delivery_target.parse()?,
            is_read: row.is_read,
            is_critical: row.is_critical,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Predicate for bulk notification deletes.
///
/// Unset fields match everything; an all-empty filter is rejected by the
/// repository rather than wiping the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub event_ref: Option<String>,
    pub category: Option<Category>,
    pub user_id: Option<UserId>,
}

impl NotificationFilter {
    pub fn for_event(event_ref: &str, category: Category) -> Self {
        Self {
            event_ref: Some(event_ref.to_string()),
            category: Some(category),
            user_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.event_ref.is_none() && self.category.is_none() && self.user_id.is_none()
    }
}
