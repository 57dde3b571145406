//! Reminder orchestrator
//!
//! Long-running driver that ticks every category scheduler on a fixed
//! interval. A tick is skipped while maintenance mode is on or nobody is
//! signed in, and never overlaps another tick. The loop exits when its
//! [`CancellationToken`] is cancelled; a tick already in flight finishes
//! first.

use crate::config::{LeadTimeDefaults, NotifierConfig};
use crate::database::Category;
use crate::error::Result;
use crate::services::scheduler::{ReminderScheduler, RunSummary, SCHEDULED_CATEGORIES};
use crate::services::session::{SessionGate, SessionHandle};
use crate::stores::Stores;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one category within a tick
#[derive(Debug)]
pub struct CategoryReport {
    pub category: Category,
    /// The error message if the category failed
    pub result: std::result::Result<RunSummary, String>,
}

/// What a tick did
#[derive(Debug)]
pub enum TickOutcome {
    Completed(Vec<CategoryReport>),
    SkippedMaintenance,
    SkippedNoSession,
    SkippedBusy,
}

pub struct Orchestrator {
    stores: Stores,
    lead_times: LeadTimeDefaults,
    categories: Vec<Category>,
    poll_interval: Duration,
    maintenance: AtomicBool,
    session: Arc<dyn SessionGate>,
    running: Mutex<()>,
}

impl Orchestrator {
    pub fn new(stores: Stores, config: &NotifierConfig, session: Arc<dyn SessionGate>) -> Self {
        Self {
            stores,
            lead_times: config.lead_times,
            categories: SCHEDULED_CATEGORIES.to_vec(),
            poll_interval: config.poll_interval,
            maintenance: AtomicBool::new(config.maintenance_mode),
            session,
            running: Mutex::new(()),
        }
    }

    /// Replace the categories ticked, in order.
    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::SeqCst);
        tracing::info!("Maintenance mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Run one tick now, e.g. when a user asks to refresh reminders.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`.
    ///
    /// Category failures are logged and reported, never returned. The
    /// only error is a category without a scheduler, which aborts the
    /// tick before any category runs.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        if self.is_maintenance() {
            tracing::info!("Maintenance mode is on, skipping reminder tick");
            return Ok(TickOutcome::SkippedMaintenance);
        }

        if !self.session.has_session() {
            tracing::debug!("No active session, skipping reminder tick");
            return Ok(TickOutcome::SkippedNoSession);
        }

        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!("Previous reminder tick still running, skipping");
            return Ok(TickOutcome::SkippedBusy);
        };

        let schedulers = self
            .categories
            .iter()
            .map(|&category| {
                ReminderScheduler::for_category(category, self.stores.clone(), self.lead_times)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut reports = Vec::with_capacity(schedulers.len());

        for scheduler in &schedulers {
            let category = scheduler.category();
            let result = match scheduler.run(now).await {
                Ok(summary) => Ok(summary),
                Err(e) => {
                    tracing::error!(category = %category, error = %e, "Reminder category failed");
                    Err(e.to_string())
                }
            };
            reports.push(CategoryReport { category, result });
        }

        Ok(TickOutcome::Completed(reports))
    }

    /// Tick immediately, then every poll interval, until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting reminder orchestrator"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Reminder orchestrator cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Reminder tick aborted");
                    }
                }
            }
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

/// Cancel `cancel` as soon as the session signs out.
pub fn cancel_on_sign_out(session: SessionHandle, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = session.signed_out() => {
                tracing::info!("Session ended, stopping reminders");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}
