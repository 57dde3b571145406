//! Reminder scheduler
//!
//! One scheduler drives every deadline category. What differs between
//! assignments, exams and partnerships (where events come from, who
//! should hear about them, how the message reads) lives in a
//! [`ReminderStrategy`].
//!
//! A reminder fires when the number of whole days left before the
//! deadline equals the user's lead time exactly. The orchestrator polls
//! many times a day, so each day-window is observed at least once; the
//! duplicate guard keeps later polls in the same window quiet.

use crate::config::{LeadTimeDefaults, EXPIRY_GRACE_DAYS};
use crate::database::{Category, Event, EventKind, NewNotification, UserId};
use crate::error::{AppError, Result};
use crate::services::duplicates::DuplicateGuard;
use crate::services::preferences::NotificationPreferences;
use crate::services::writer::NotificationWriter;
use crate::stores::Stores;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Categories with a scheduler, in the order a tick runs them
pub const SCHEDULED_CATEGORIES: [Category; 3] =
    [Category::Assignment, Category::Exam, Category::StudyPartner];

/// Title and body of a reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub title: String,
    pub message: String,
}

/// Per-category behavior plugged into [`ReminderScheduler`]
#[async_trait]
pub trait ReminderStrategy: Send + Sync {
    fn kind(&self) -> EventKind;

    fn category(&self) -> Category {
        self.kind().category()
    }

    /// Events that have not passed yet.
    async fn fetch_events(&self, stores: &Stores, now: DateTime<Utc>) -> Result<Vec<Event>> {
        stores.events.list_due(self.kind(), now).await
    }

    /// Everyone who should be reminded about `event`.
    async fn resolve_candidates(&self, stores: &Stores, event: &Event) -> Result<Vec<UserId>>;

    fn build_message(&self, event: &Event, days_until: i64) -> ReminderMessage;

    fn is_critical(&self, _days_until: i64) -> bool {
        false
    }
}

/// Assignment due dates, fanned out to course members
pub struct AssignmentReminders;

#[async_trait]
impl ReminderStrategy for AssignmentReminders {
    fn kind(&self) -> EventKind {
        EventKind::Assignment
    }

    async fn resolve_candidates(&self, stores: &Stores, event: &Event) -> Result<Vec<UserId>> {
        course_members(stores, event).await
    }

    fn build_message(&self, event: &Event, days_until: i64) -> ReminderMessage {
        ReminderMessage {
            title: "Upcoming assignment".to_string(),
            message: format!("\"{}\" is due {}.", event.title, relative_day(days_until)),
        }
    }
}

/// Exam dates, fanned out to course members
pub struct ExamReminders;

#[async_trait]
impl ReminderStrategy for ExamReminders {
    fn kind(&self) -> EventKind {
        EventKind::Exam
    }

    async fn resolve_candidates(&self, stores: &Stores, event: &Event) -> Result<Vec<UserId>> {
        course_members(stores, event).await
    }

    fn build_message(&self, event: &Event, days_until: i64) -> ReminderMessage {
        ReminderMessage {
            title: "Upcoming exam".to_string(),
            message: format!("\"{}\" is {}.", event.title, relative_day(days_until)),
        }
    }

    fn is_critical(&self, _days_until: i64) -> bool {
        true
    }
}

/// Study partnerships about to expire, sent to the owning user only
pub struct PartnershipExpiryReminders;

#[async_trait]
impl ReminderStrategy for PartnershipExpiryReminders {
    fn kind(&self) -> EventKind {
        EventKind::Partnership
    }

    async fn resolve_candidates(&self, _stores: &Stores, event: &Event) -> Result<Vec<UserId>> {
        match &event.owner_id {
            Some(owner) => Ok(vec![owner.clone()]),
            None => {
                tracing::warn!(event_id = %event.id, "Partnership has no owner, skipping");
                Ok(Vec::new())
            }
        }
    }

    fn build_message(&self, event: &Event, days_until: i64) -> ReminderMessage {
        ReminderMessage {
            title: "Study partnership expiring".to_string(),
            message: format!(
                "Your study partnership with {} expires {}.",
                event.title,
                relative_day(days_until)
            ),
        }
    }
}

/// Strategy for a category.
///
/// Only deadline categories have one; asking for any other is a bug in
/// the caller.
pub fn strategy_for(category: Category) -> Result<Box<dyn ReminderStrategy>> {
    match category {
        Category::Assignment => Ok(Box::new(AssignmentReminders)),
        Category::Exam => Ok(Box::new(ExamReminders)),
        Category::StudyPartner => Ok(Box::new(PartnershipExpiryReminders)),
        Category::SharedSession | Category::System => {
            Err(AppError::UnknownCategory(category.to_string()))
        }
    }
}

async fn course_members(stores: &Stores, event: &Event) -> Result<Vec<UserId>> {
    match &event.course_id {
        Some(course_id) => stores.memberships.users_for_course(course_id).await,
        None => {
            tracing::warn!(event_id = %event.id, "Event has no course, skipping");
            Ok(Vec::new())
        }
    }
}

fn relative_day(days_until: i64) -> String {
    match days_until {
        0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("in {} days", n),
    }
}

/// Whole days left before `deadline`.
///
/// Partial days are dropped: 2 days 1 hour and 2 days 23 hours both
/// count as 2.
pub fn days_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_days()
}

/// What one scheduler run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events_seen: usize,
    pub events_skipped: usize,
    pub reminders_created: usize,
    pub reminders_failed: usize,
    pub recipients_skipped: usize,
    pub notifications_purged: u64,
}

/// Deadline reminder scheduler for one category
pub struct ReminderScheduler {
    strategy: Box<dyn ReminderStrategy>,
    stores: Stores,
    guard: DuplicateGuard,
    writer: NotificationWriter,
    lead_times: LeadTimeDefaults,
}

impl ReminderScheduler {
    pub fn new(
        strategy: Box<dyn ReminderStrategy>,
        stores: Stores,
        lead_times: LeadTimeDefaults,
    ) -> Self {
        let guard = DuplicateGuard::new(stores.notifications.clone());
        let writer = NotificationWriter::new(stores.events.clone(), stores.notifications.clone());

        Self {
            strategy,
            stores,
            guard,
            writer,
            lead_times,
        }
    }

    pub fn for_category(
        category: Category,
        stores: Stores,
        lead_times: LeadTimeDefaults,
    ) -> Result<Self> {
        Ok(Self::new(strategy_for(category)?, stores, lead_times))
    }

    pub fn category(&self) -> Category {
        self.strategy.category()
    }

    /// Purge reminders for past events, then fire the ones due at `now`.
    ///
    /// Failures inside a single event or recipient are logged and counted;
    /// only a failure to list events fails the run.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let category = self.category();
        let mut summary = RunSummary::default();

        match self.writer.purge_expired(category, now).await {
            Ok(purged) => summary.notifications_purged = purged,
            Err(e) => tracing::error!(category = %category, error = %e, "Cleanup failed"),
        }

        let events = self.strategy.fetch_events(&self.stores, now).await?;

        for event in &events {
            summary.events_seen += 1;

            if let Err(e) = self.process_event(event, now, &mut summary).await {
                tracing::error!(
                    category = %category,
                    event_id = %event.id,
                    error = %e,
                    "Failed to process event"
                );
                summary.events_skipped += 1;
            }
        }

        tracing::info!(
            category = %category,
            events = summary.events_seen,
            created = summary.reminders_created,
            failed = summary.reminders_failed,
            purged = summary.notifications_purged,
            "Reminder run complete"
        );

        Ok(summary)
    }

    async fn process_event(
        &self,
        event: &Event,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let category = self.category();

        let Some(deadline) = event.deadline else {
            tracing::warn!(
                event_id = %event.id,
                category = %category,
                "Event has no deadline, skipping"
            );
            summary.events_skipped += 1;
            return Ok(());
        };

        if deadline < now {
            return Ok(());
        }

        let days = days_until(deadline, now);

        let candidates = self.strategy.resolve_candidates(&self.stores, event).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let remaining = self
            .guard
            .retain_unnotified(&event.id, category, candidates)
            .await?;

        let mut batch = Vec::new();

        for user_id in remaining {
            let raw = match self.stores.preferences.get(&user_id).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to load preferences");
                    summary.recipients_skipped += 1;
                    continue;
                }
            };

            let pref =
                NotificationPreferences::parse(&raw).for_category(category, &self.lead_times);
            if i64::from(pref.lead_time_days) != days {
                continue;
            }

            let ReminderMessage { title, message } = self.strategy.build_message(event, days);

            batch.push(NewNotification {
                user_id,
                category,
                title,
                message,
                event_ref: Some(event.id.clone()),
                delivery_target: pref.delivery_target(),
                is_critical: self.strategy.is_critical(days),
                expires_at: deadline + Duration::days(EXPIRY_GRACE_DAYS),
            });
        }

        if batch.is_empty() {
            return Ok(());
        }

        tracing::debug!(event_id = %event.id, days, recipients = batch.len(), "Firing reminders");

        let outcome = self.writer.create_all(batch).await;
        summary.reminders_created += outcome.created.len();
        summary.reminders_failed += outcome.failed;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        initialize_database, DeliveryTarget, Notification, NotificationFilter, Repository,
    };
    use crate::services::preferences::RawPreferences;
    use crate::stores::{NotificationStore, PreferenceStore};
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    async fn create_test_repo() -> Arc<Repository> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();
        Arc::new(Repository::new(pool))
    }

    fn scheduler(category: Category, stores: Stores) -> ReminderScheduler {
        ReminderScheduler::for_category(category, stores, LeadTimeDefaults::default()).unwrap()
    }

    async fn set_lead(repo: &Repository, user_id: &str, category: Category, days: u32) {
        let blob = format!(r#"{{"{}":{{"leadTimeDays":{}}}}}"#, category.as_str(), days);
        repo.set_preferences(user_id, Some(&blob)).await.unwrap();
    }

    /// Preference store that fails for one user
    struct FlakyPreferences {
        inner: Arc<Repository>,
        broken_user: String,
    }

    #[async_trait]
    impl PreferenceStore for FlakyPreferences {
        async fn get(&self, user_id: &str) -> Result<RawPreferences> {
            if user_id == self.broken_user {
                return Err(AppError::Generic("preference backend unavailable".to_string()));
            }
            self.inner.get(user_id).await
        }
    }

    /// Notification store that rejects inserts for one user
    struct RejectingInserts {
        inner: Arc<Repository>,
        rejected_user: String,
    }

    #[async_trait]
    impl NotificationStore for RejectingInserts {
        async fn find_live(&self, event_ref: &str, category: Category) -> Result<Vec<UserId>> {
            self.inner.find_live(event_ref, category).await
        }

        async fn live_event_refs(&self, category: Category) -> Result<Vec<String>> {
            self.inner.live_event_refs(category).await
        }

        async fn insert(&self, notification: NewNotification) -> Result<Notification> {
            if notification.user_id == self.rejected_user {
                return Err(AppError::Generic("write rejected".to_string()));
            }
            self.inner.insert(notification).await
        }

        async fn delete_where(&self, filter: &NotificationFilter) -> Result<u64> {
            self.inner.delete_where(filter).await
        }
    }

    #[test]
    fn test_days_until_drops_partial_days() {
        let now = fixed_now();

        assert_eq!(days_until(now + Duration::days(2), now), 2);
        assert_eq!(days_until(now + Duration::days(2) + Duration::hours(1), now), 2);
        assert_eq!(days_until(now + Duration::days(2) + Duration::hours(23), now), 2);
        assert_eq!(days_until(now + Duration::hours(5), now), 0);
    }

    #[test]
    fn test_strategy_for_unscheduled_category_is_error() {
        assert!(matches!(
            strategy_for(Category::System),
            Err(AppError::UnknownCategory(_))
        ));
        assert!(strategy_for(Category::SharedSession).is_err());

        for category in SCHEDULED_CATEGORIES {
            assert_eq!(strategy_for(category).unwrap().category(), category);
        }
    }

    #[test]
    fn test_messages_read_naturally() {
        let event = Event {
            id: "e1".to_string(),
            kind: EventKind::Assignment,
            title: "Essay 1".to_string(),
            course_id: Some("c1".to_string()),
            owner_id: None,
            deadline: None,
        };

        assert_eq!(
            AssignmentReminders.build_message(&event, 2).message,
            "\"Essay 1\" is due in 2 days."
        );
        assert_eq!(
            ExamReminders.build_message(&event, 1).message,
            "\"Essay 1\" is tomorrow."
        );
        assert_eq!(
            PartnershipExpiryReminders.build_message(&event, 0).message,
            "Your study partnership with Essay 1 expires today."
        );
    }

    #[tokio::test]
    async fn test_exact_lead_time_match() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        let assignment = repo
            .create_assignment("c1", "Essay", Some(now + Duration::days(2)))
            .await
            .unwrap();
        for (user, lead) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            repo.add_membership(user, "c1").await.unwrap();
            set_lead(&repo, user, Category::Assignment, lead).await;
        }

        let summary = scheduler(Category::Assignment, Stores::from_backend(repo.clone()))
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.reminders_created, 1);
        assert!(repo.list_notifications("u1").await.unwrap().is_empty());
        assert!(repo.list_notifications("u3").await.unwrap().is_empty());

        let inbox = repo.list_notifications("u2").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].event_ref.as_deref(), Some(assignment.as_str()));
        assert_eq!(inbox[0].category, Category::Assignment);
        assert_eq!(inbox[0].expires_at, now + Duration::days(3));
        assert!(!inbox[0].is_critical);
    }

    #[tokio::test]
    async fn test_default_exam_lead_time() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_exam("c1", "Midterm", Some(now + Duration::days(3) + Duration::hours(4)))
            .await
            .unwrap();
        repo.add_membership("u1", "c1").await.unwrap();

        let summary = scheduler(Category::Exam, Stores::from_backend(repo.clone()))
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.reminders_created, 1);
        let inbox = repo.list_notifications("u1").await.unwrap();
        assert_eq!(inbox[0].message, "\"Midterm\" is in 3 days.");
        assert_eq!(inbox[0].delivery_target, DeliveryTarget::Both);
        assert!(inbox[0].is_critical);
    }

    #[tokio::test]
    async fn test_channel_resolution() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Lab", Some(now + Duration::days(2)))
            .await
            .unwrap();

        let settings = [
            ("push_only", r#"{"assignment":{"pushEnabled":true,"siteEnabled":false}}"#),
            ("none", r#"{"assignment":{"pushEnabled":false,"siteEnabled":false}}"#),
            ("both", r#"{"assignment":{"pushEnabled":true,"siteEnabled":true}}"#),
        ];
        for (user, blob) in settings {
            repo.add_membership(user, "c1").await.unwrap();
            repo.set_preferences(user, Some(blob)).await.unwrap();
        }

        scheduler(Category::Assignment, Stores::from_backend(repo.clone()))
            .run(now)
            .await
            .unwrap();

        let target = |inbox: Vec<Notification>| inbox[0].delivery_target;
        assert_eq!(
            target(repo.list_notifications("push_only").await.unwrap()),
            DeliveryTarget::Push
        );
        assert_eq!(
            target(repo.list_notifications("none").await.unwrap()),
            DeliveryTarget::Site
        );
        assert_eq!(
            target(repo.list_notifications("both").await.unwrap()),
            DeliveryTarget::Both
        );
    }

    #[tokio::test]
    async fn test_repeated_runs_never_duplicate() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Essay", Some(now + Duration::days(2)))
            .await
            .unwrap();
        repo.add_membership("u1", "c1").await.unwrap();

        let assignments = scheduler(Category::Assignment, Stores::from_backend(repo.clone()));

        let first = assignments.run(now).await.unwrap();
        let second = assignments.run(now).await.unwrap();
        let later_same_day = assignments.run(now + Duration::hours(6)).await.unwrap();

        assert_eq!(first.reminders_created, 1);
        assert_eq!(second.reminders_created, 0);
        assert_eq!(later_same_day.reminders_created, 0);
        assert_eq!(repo.list_notifications("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_retroactive_reminder_after_lead_time_change() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_exam("c1", "Final", Some(now + Duration::days(3)))
            .await
            .unwrap();
        repo.add_membership("u1", "c1").await.unwrap();

        let exams = scheduler(Category::Exam, Stores::from_backend(repo.clone()));
        exams.run(now).await.unwrap();

        set_lead(&repo, "u1", Category::Exam, 1).await;
        let summary = exams.run(now + Duration::days(2)).await.unwrap();

        assert_eq!(summary.reminders_created, 0);
        assert_eq!(repo.list_notifications("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_after_deadline() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Essay", Some(now + Duration::days(2)))
            .await
            .unwrap();
        repo.add_membership("u1", "c1").await.unwrap();

        let assignments = scheduler(Category::Assignment, Stores::from_backend(repo.clone()));
        assignments.run(now).await.unwrap();
        assert_eq!(repo.list_notifications("u1").await.unwrap().len(), 1);

        let after = assignments.run(now + Duration::days(3)).await.unwrap();
        assert_eq!(after.notifications_purged, 1);
        assert_eq!(after.events_seen, 0);
        assert!(repo.list_notifications("u1").await.unwrap().is_empty());

        let again = assignments.run(now + Duration::days(4)).await.unwrap();
        assert_eq!(again.reminders_created, 0);
        assert!(repo.list_notifications("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preference_failure_isolated_to_one_user() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Essay", Some(now + Duration::days(2)))
            .await
            .unwrap();
        for user in ["a", "b", "c"] {
            repo.add_membership(user, "c1").await.unwrap();
        }

        let mut stores = Stores::from_backend(repo.clone());
        stores.preferences = Arc::new(FlakyPreferences {
            inner: repo.clone(),
            broken_user: "a".to_string(),
        });

        let summary = scheduler(Category::Assignment, stores).run(now).await.unwrap();

        assert_eq!(summary.reminders_created, 2);
        assert_eq!(summary.recipients_skipped, 1);
        assert!(repo.list_notifications("a").await.unwrap().is_empty());
        assert_eq!(repo.list_notifications("b").await.unwrap().len(), 1);
        assert_eq!(repo.list_notifications("c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_isolated_to_one_user() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Essay", Some(now + Duration::days(2)))
            .await
            .unwrap();
        for user in ["a", "b"] {
            repo.add_membership(user, "c1").await.unwrap();
        }

        let mut stores = Stores::from_backend(repo.clone());
        stores.notifications = Arc::new(RejectingInserts {
            inner: repo.clone(),
            rejected_user: "a".to_string(),
        });

        let assignments = scheduler(Category::Assignment, stores);
        let summary = assignments.run(now).await.unwrap();

        assert_eq!(summary.reminders_created, 1);
        assert_eq!(summary.reminders_failed, 1);
        assert_eq!(repo.list_notifications("b").await.unwrap().len(), 1);

        // The rejected user is retried on the next run
        let retry = assignments.run(now).await.unwrap();
        assert_eq!(retry.reminders_failed, 1);
        assert_eq!(retry.reminders_created, 0);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_events_skipped() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_assignment("c1", "Undated", None).await.unwrap();
        repo.create_assignment("empty-course", "Lonely", Some(now + Duration::days(2)))
            .await
            .unwrap();
        repo.create_assignment("c1", "Real", Some(now + Duration::days(2)))
            .await
            .unwrap();
        repo.add_membership("u1", "c1").await.unwrap();

        let summary = scheduler(Category::Assignment, Stores::from_backend(repo.clone()))
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.events_seen, 3);
        assert_eq!(summary.events_skipped, 1);
        assert_eq!(summary.reminders_created, 1);
    }

    #[tokio::test]
    async fn test_partnership_reminds_owner_only() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        repo.create_partnership("u1", "Ada", Some(now + Duration::days(1) + Duration::hours(2)))
            .await
            .unwrap();
        repo.add_membership("u2", "c1").await.unwrap();

        let summary = scheduler(Category::StudyPartner, Stores::from_backend(repo.clone()))
            .run(now)
            .await
            .unwrap();

        assert_eq!(summary.reminders_created, 1);
        let inbox = repo.list_notifications("u1").await.unwrap();
        assert_eq!(inbox[0].category, Category::StudyPartner);
        assert_eq!(inbox[0].message, "Your study partnership with Ada expires tomorrow.");
        assert!(repo.list_notifications("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_two_users_one_assignment() {
        let repo = create_test_repo().await;
        let now = fixed_now();

        let e1 = repo
            .create_assignment("c1", "E1", Some(now + Duration::days(2)))
            .await
            .unwrap();
        repo.add_membership("U1", "c1").await.unwrap();
        repo.add_membership("U2", "c1").await.unwrap();
        repo.set_preferences(
            "U1",
            Some(r#"{"assignment":{"leadTimeDays":2,"pushEnabled":true,"siteEnabled":false}}"#),
        )
        .await
        .unwrap();
        set_lead(&repo, "U2", Category::Assignment, 5).await;

        let assignments = scheduler(Category::Assignment, Stores::from_backend(repo.clone()));

        assignments.run(now).await.unwrap();
        let u1 = repo.list_notifications("U1").await.unwrap();
        assert_eq!(u1.len(), 1);
        assert_eq!(u1[0].delivery_target, DeliveryTarget::Push);
        assert_eq!(u1[0].event_ref.as_deref(), Some(e1.as_str()));
        assert!(repo.list_notifications("U2").await.unwrap().is_empty());

        assignments.run(now).await.unwrap();
        assert_eq!(repo.list_notifications("U1").await.unwrap().len(), 1);
        assert!(repo.list_notifications("U2").await.unwrap().is_empty());

        assignments.run(now + Duration::days(3)).await.unwrap();
        assert!(repo.list_notifications("U1").await.unwrap().is_empty());
        assert!(repo.list_notifications("U2").await.unwrap().is_empty());
    }
}
