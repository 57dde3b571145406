//! Engine configuration
//!
//! Central location for default values and the environment-sourced
//! configuration the host hands to the orchestrator.

use crate::database::Category;
use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;

// ===== Scheduling =====

/// Default time between orchestrator ticks (5 minutes).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Grace period added to a deadline to compute a notification's `expires_at`.
pub const EXPIRY_GRACE_DAYS: i64 = 1;

// ===== Lead-time defaults =====

/// Days before an assignment deadline to remind when the user has no preference.
pub const DEFAULT_ASSIGNMENT_LEAD_DAYS: u32 = 2;

/// Days before an exam to remind when the user has no preference.
pub const DEFAULT_EXAM_LEAD_DAYS: u32 = 3;

/// Days before the deadline for every other category.
pub const DEFAULT_OTHER_LEAD_DAYS: u32 = 1;

// ===== Database =====

/// Database file used when `NOTIFIER_DATABASE_PATH` is unset.
pub const DEFAULT_DATABASE_PATH: &str = "notifier.db";

/// How long a connection waits on a locked SQLite database.
pub const DATABASE_BUSY_TIMEOUT_SECS: u64 = 5;

/// Per-category default lead times in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadTimeDefaults {
    pub assignment: u32,
    pub exam: u32,
    pub other: u32,
}

impl LeadTimeDefaults {
    pub fn for_category(&self, category: Category) -> u32 {
        match category {
            Category::Assignment => self.assignment,
            Category::Exam => self.exam,
            Category::StudyPartner | Category::SharedSession | Category::System => self.other,
        }
    }
}

impl Default for LeadTimeDefaults {
    fn default() -> Self {
        Self {
            assignment: DEFAULT_ASSIGNMENT_LEAD_DAYS,
            exam: DEFAULT_EXAM_LEAD_DAYS,
            other: DEFAULT_OTHER_LEAD_DAYS,
        }
    }
}

/// Runtime configuration for the notifier host
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub database_path: PathBuf,
    pub maintenance_mode: bool,
    pub poll_interval: Duration,
    pub lead_times: LeadTimeDefaults,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            maintenance_mode: false,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            lead_times: LeadTimeDefaults::default(),
        }
    }
}

impl NotifierConfig {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup("NOTIFIER_DATABASE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let maintenance_mode = match lookup("MAINTENANCE_MODE") {
            Some(v) => parse_flag("MAINTENANCE_MODE", &v)?,
            None => false,
        };

        let poll_secs = parse_number(
            &lookup,
            "NOTIFIER_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_secs == 0 {
            return Err(AppError::Config(
                "NOTIFIER_POLL_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        let lead_times = LeadTimeDefaults {
            assignment: parse_number(
                &lookup,
                "NOTIFIER_LEAD_DAYS_ASSIGNMENT",
                DEFAULT_ASSIGNMENT_LEAD_DAYS,
            )?,
            exam: parse_number(&lookup, "NOTIFIER_LEAD_DAYS_EXAM", DEFAULT_EXAM_LEAD_DAYS)?,
            other: parse_number(&lookup, "NOTIFIER_LEAD_DAYS_OTHER", DEFAULT_OTHER_LEAD_DAYS)?,
        };

        Ok(Self {
            database_path,
            maintenance_mode,
            poll_interval: Duration::from_secs(poll_secs),
            lead_times,
        })
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            AppError::Config(format!(
                "{} must be a non-negative integer, got '{}'",
                key, raw
            ))
        }),
        _ => Ok(default),
    }
}
