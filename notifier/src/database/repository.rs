//! Repository layer for database operations
//!
//! SQLite implementation of every store the engine consumes, plus the
//! write helpers used by the portal's editing surfaces and the inbox.

use super::models::*;
use crate::error::{AppError, Result};
use crate::services::preferences::RawPreferences;
use crate::stores::{EventStore, MembershipIndex, NotificationStore, PreferenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

/// Ids looked up per `deadlines` query
pub(crate) const DEADLINE_LOOKUP_CHUNK: usize = 500;

/// Row shape shared by the three event tables
#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    title: String,
    course_id: Option<String>,
    owner_id: Option<String>,
    deadline: Option<DateTime<Utc>>,
}

impl EventRow {
    fn into_event(self, kind: EventKind) -> Event {
        Event {
            id: self.id,
            kind,
            title: self.title,
            course_id: self.course_id,
            owner_id: self.owner_id,
            deadline: self.deadline,
        }
    }
}

/// Table name and column projection for each event kind
fn event_source(kind: EventKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        EventKind::Assignment => (
            "assignments",
            "id, title, course_id, NULL AS owner_id, due_at AS deadline",
            "due_at",
        ),
        EventKind::Exam => (
            "exams",
            "id, title, course_id, NULL AS owner_id, exam_at AS deadline",
            "exam_at",
        ),
        EventKind::Partnership => (
            "partnerships",
            "id, partner_name AS title, NULL AS course_id, user_id AS owner_id, expires_at AS deadline",
            "expires_at",
        ),
    }
}

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enroll a user in a course
    pub async fn add_membership(&self, user_id: &str, course_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (user_id, course_id) VALUES (?, ?)
            ON CONFLICT(user_id, course_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Added membership: {} in {}", user_id, course_id);
        Ok(())
    }

    /// Create an assignment, returning its id
    pub async fn create_assignment(
        &self,
        course_id: &str,
        title: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO assignments (id, course_id, title, due_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(course_id)
            .bind(title)
            .bind(due_at)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Created assignment: {} for course: {}", id, course_id);
        Ok(id)
    }

    /// Create an exam, returning its id
    pub async fn create_exam(
        &self,
        course_id: &str,
        title: &str,
        exam_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO exams (id, course_id, title, exam_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(course_id)
            .bind(title)
            .bind(exam_at)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Created exam: {} for course: {}", id, course_id);
        Ok(id)
    }

    /// Create a study partnership owned by `user_id`, returning its id
    pub async fn create_partnership(
        &self,
        user_id: &str,
        partner_name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO partnerships (id, user_id, partner_name, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(partner_name)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Created partnership: {} for user: {}", id, user_id);
        Ok(id)
    }

    /// Store a user's raw notification settings blob
    pub async fn set_preferences(&self, user_id: &str, settings: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, notification_settings, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                notification_settings = excluded.notification_settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(settings)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Set notification preferences for user: {}", user_id);
        Ok(())
    }

    /// List a user's notifications, newest first
    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT * FROM notifications
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    /// Mark a notification as read. Returns `false` if it no longer exists.
    pub async fn mark_notification_read(&self, id: &str) -> Result<bool> {
        let rows = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Marked notification as read: {}", id);
        Ok(rows > 0)
    }

    /// Delete a single notification. Returns `false` if it was already gone.
    pub async fn delete_notification(&self, id: &str) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted notification: {}", id);
        Ok(rows > 0)
    }
}

#[async_trait]
impl EventStore for Repository {
    async fn list_due(&self, kind: EventKind, not_before: DateTime<Utc>) -> Result<Vec<Event>> {
        let (table, columns, deadline) = event_source(kind);
        let query = format!(
            "SELECT {columns} FROM {table} \
             WHERE {deadline} IS NULL OR julianday({deadline}) >= julianday(?) \
             ORDER BY {deadline} ASC"
        );

        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(not_before)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.into_event(kind)).collect())
    }

    async fn deadlines(
        &self,
        kind: EventKind,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let (table, _, deadline) = event_source(kind);
        let mut found = HashMap::with_capacity(ids.len());

        // SQLite caps bound variables per statement
        for chunk in ids.chunks(DEADLINE_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query =
                format!("SELECT id, {deadline} FROM {table} WHERE id IN ({placeholders})");

            let mut q = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(&query);
            for id in chunk {
                q = q.bind(id);
            }

            found.extend(q.fetch_all(&self.pool).await?);
        }

        Ok(found)
    }
}

#[async_trait]
impl MembershipIndex for Repository {
    async fn users_for_course(&self, course_id: &str) -> Result<Vec<UserId>> {
        let users = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM memberships WHERE course_id = ? ORDER BY user_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[async_trait]
impl PreferenceStore for Repository {
    async fn get(&self, user_id: &str) -> Result<RawPreferences> {
        let stored: Option<Option<String>> = sqlx::query_scalar(
            "SELECT notification_settings FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match stored.flatten() {
            Some(text) => RawPreferences::Text(text),
            None => RawPreferences::Missing,
        })
    }
}

#[async_trait]
impl NotificationStore for Repository {
    async fn find_live(&self, event_ref: &str, category: Category) -> Result<Vec<UserId>> {
        let users = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT user_id FROM notifications
            WHERE event_ref = ? AND category = ?
            "#,
        )
        .bind(event_ref)
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn live_event_refs(&self, category: Category) -> Result<Vec<String>> {
        let refs = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT event_ref FROM notifications
            WHERE category = ? AND event_ref IS NOT NULL
            "#,
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(refs)
    }

    async fn insert(&self, notification: NewNotification) -> Result<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications (
                id, user_id, category, title, message, event_ref,
                delivery_target, is_read, is_critical, created_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&notification.user_id)
        .bind(notification.category.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.event_ref)
        .bind(notification.delivery_target.as_str())
        .bind(notification.is_critical)
        .bind(now)
        .bind(notification.expires_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created notification: {} for user: {}", id, notification.user_id);
        Notification::try_from(row)
    }

    async fn delete_where(&self, filter: &NotificationFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(AppError::Generic(
                "Refusing to delete notifications with an empty filter".to_string(),
            ));
        }

        let mut query = "DELETE FROM notifications WHERE 1 = 1".to_string();
        let mut params: Vec<&str> = Vec::new();

        if let Some(event_ref) = &filter.event_ref {
            query.push_str(" AND event_ref = ?");
            params.push(event_ref);
        }

        if let Some(category) = filter.category {
            query.push_str(" AND category = ?");
            params.push(category.as_str());
        }

        if let Some(user_id) = &filter.user_id {
            query.push_str(" AND user_id = ?");
            params.push(user_id);
        }

        let mut q = sqlx::query(&query);
        for param in params {
            q = q.bind(param);
        }

        let rows = q.execute(&self.pool).await?.rows_affected();

        tracing::debug!("Deleted {} notifications matching {:?}", rows, filter);
        Ok(rows)
    }
}
