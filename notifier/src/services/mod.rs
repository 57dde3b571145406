//! Services module
//!
//! The reminder engine: preference resolution, duplicate guarding,
//! per-category scheduling, notification writing and the orchestrator
//! that drives them.

pub mod duplicates;
pub mod orchestrator;
pub mod preferences;
pub mod scheduler;
pub mod session;
pub mod writer;

pub use duplicates::DuplicateGuard;
pub use orchestrator::{cancel_on_sign_out, CategoryReport, Orchestrator, TickOutcome};
pub use preferences::{resolve, CategoryPreference, NotificationPreferences, RawPreferences};
pub use scheduler::{ReminderScheduler, ReminderStrategy, RunSummary, SCHEDULED_CATEGORIES};
pub use session::{SessionGate, SessionHandle};
pub use writer::{BatchOutcome, NotificationWriter};
