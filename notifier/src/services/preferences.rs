//! Preference resolver
//!
//! Users' notification settings arrive as a loosely-typed blob. It is
//! parsed once into [`NotificationPreferences`]; lookups then apply
//! field-level defaults so a partially-filled category keeps whatever the
//! user did set. Nothing in here fails: unreadable input means "no
//! preference", which means defaults.

use crate::config::LeadTimeDefaults;
use crate::database::{Category, DeliveryTarget};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Preference blob exactly as the store returned it
#[derive(Debug, Clone, PartialEq)]
pub enum RawPreferences {
    /// No row, or a NULL column
    Missing,
    /// Serialized JSON that still needs parsing
    Text(String),
    /// Already-decoded JSON
    Structured(Value),
}

/// Resolved settings for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPreference {
    pub lead_time_days: u32,
    pub push_enabled: bool,
    pub site_enabled: bool,
}

impl CategoryPreference {
    pub fn delivery_target(&self) -> DeliveryTarget {
        DeliveryTarget::from_channels(self.push_enabled, self.site_enabled)
    }
}

/// Whatever subset of fields the user stored for a category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StoredPreference {
    lead_time_days: Option<u32>,
    push_enabled: Option<bool>,
    site_enabled: Option<bool>,
}

/// A user's parsed notification settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationPreferences {
    stored: HashMap<Category, StoredPreference>,
}

impl NotificationPreferences {
    pub fn parse(raw: &RawPreferences) -> Self {
        match raw {
            RawPreferences::Missing => Self::default(),
            RawPreferences::Text(text) => Self::from_text(text, true),
            RawPreferences::Structured(value) => Self::from_value(value, true),
        }
    }

    fn from_text(text: &str, allow_nested: bool) -> Self {
        if text.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value, allow_nested),
            Err(_) => Self::default(),
        }
    }

    fn from_value(value: &Value, allow_nested: bool) -> Self {
        match value {
            Value::Object(map) => Self::from_object(map),
            // Some writers double-encode the blob; unwrap one level only.
            Value::String(inner) if allow_nested => Self::from_text(inner, false),
            _ => Self::default(),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let stored = Category::ALL
            .into_iter()
            .filter_map(|category| {
                let entry = map.get(category.as_str())?.as_object()?;
                Some((
                    category,
                    StoredPreference {
                        lead_time_days: entry.get("leadTimeDays").and_then(parse_lead_time),
                        push_enabled: entry.get("pushEnabled").and_then(Value::as_bool),
                        site_enabled: entry.get("siteEnabled").and_then(Value::as_bool),
                    },
                ))
            })
            .collect();

        Self { stored }
    }

    /// Settings for `category`, with defaults filled per field.
    pub fn for_category(
        &self,
        category: Category,
        defaults: &LeadTimeDefaults,
    ) -> CategoryPreference {
        let stored = self.stored.get(&category).copied().unwrap_or_default();

        CategoryPreference {
            lead_time_days: stored
                .lead_time_days
                .unwrap_or_else(|| defaults.for_category(category)),
            push_enabled: stored.push_enabled.unwrap_or(true),
            site_enabled: stored.site_enabled.unwrap_or(true),
        }
    }
}

/// Resolve one category straight from a raw blob.
pub fn resolve(
    raw: &RawPreferences,
    category: Category,
    defaults: &LeadTimeDefaults,
) -> CategoryPreference {
    NotificationPreferences::parse(raw).for_category(category, defaults)
}

fn parse_lead_time(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(days) = n.as_u64() {
                return u32::try_from(days).ok();
            }
            // Whole floats like 2.0 are accepted, fractions are not.
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u32)
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
