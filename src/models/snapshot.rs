//! Read-only views published by the consent context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ConsentCategory, ConsentPreferences};

/// Name of the event broadcast after every save.
pub const CONSENT_UPDATED_EVENT: &str = "cookieConsentUpdated";

/// What the banner, preferences panel and settings button get to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSnapshot {
    pub preferences: ConsentPreferences,
    /// True once the stored record has been read.
    pub is_loaded: bool,
    pub needs_consent: bool,
    pub show_banner: bool,
    pub show_preferences: bool,
}

impl ConsentSnapshot {
    pub fn initial(preferences: ConsentPreferences) -> Self {
        Self {
            preferences,
            is_loaded: false,
            needs_consent: false,
            show_banner: false,
            show_preferences: false,
        }
    }
}

/// Broadcast after every save with the full new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentChangeEvent {
    pub event: &'static str,
    pub detail: ConsentPreferences,
}

impl ConsentChangeEvent {
    pub fn new(detail: ConsentPreferences) -> Self {
        Self {
            event: CONSENT_UPDATED_EVENT,
            detail,
        }
    }
}

/// Grant/deny signal sent to third-party instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentSignal {
    Granted,
    Denied,
}

impl ConsentSignal {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            ConsentSignal::Granted
        } else {
            ConsentSignal::Denied
        }
    }
}

/// Outcome of one dispatcher pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub signals: BTreeMap<ConsentCategory, ConsentSignal>,
    /// Cookie names deleted by this pass.
    pub purged: Vec<String>,
}
