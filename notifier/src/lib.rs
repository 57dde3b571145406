//! Portal notifier library
//!
//! Deadline reminder engine for the student portal. A host embeds the
//! [`services::Orchestrator`] and hands it the stores it should read and
//! write; [`database::Repository`] is the bundled SQLite implementation.

pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod stores;
