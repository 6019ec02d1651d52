//! Consent preference models matching the browser-side consent record.

use serde::{Deserialize, Serialize};

use crate::errors::ConsentError;

/// A coarse-grained grouping of cookie purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentCategory {
    Essential,
    Analytics,
    Marketing,
    Preferences,
}

impl ConsentCategory {
    /// Every category, essential first.
    pub const ALL: [ConsentCategory; 4] = [
        ConsentCategory::Essential,
        ConsentCategory::Analytics,
        ConsentCategory::Marketing,
        ConsentCategory::Preferences,
    ];

    /// Categories the visitor can opt in to or out of.
    pub const OPTIONAL: [ConsentCategory; 3] = [
        ConsentCategory::Analytics,
        ConsentCategory::Marketing,
        ConsentCategory::Preferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentCategory::Essential => "essential",
            ConsentCategory::Analytics => "analytics",
            ConsentCategory::Marketing => "marketing",
            ConsentCategory::Preferences => "preferences",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for ConsentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted consent record.
///
/// Fields are private: a record can only be produced by the defaults, by a
/// merge inside the consent store, or by parsing a stored record. Every one
/// of those paths keeps `essential` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredRecord")]
pub struct ConsentPreferences {
    essential: bool,
    analytics: bool,
    marketing: bool,
    preferences: bool,
    timestamp: i64,
    version: String,
}

/// Raw shape of a stored record before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    essential: bool,
    analytics: bool,
    marketing: bool,
    preferences: bool,
    timestamp: i64,
    version: String,
}

impl TryFrom<StoredRecord> for ConsentPreferences {
    type Error = ConsentError;

    fn try_from(raw: StoredRecord) -> Result<Self, Self::Error> {
        if !raw.essential {
            return Err(ConsentError::MalformedRecord(
                "essential cookies cannot be refused".to_string(),
            ));
        }

        Ok(Self {
            essential: true,
            analytics: raw.analytics,
            marketing: raw.marketing,
            preferences: raw.preferences,
            timestamp: raw.timestamp,
            version: raw.version,
        })
    }
}

impl ConsentPreferences {
    /// Essential cookies only, never saved.
    pub fn default_for(version: &str) -> Self {
        Self {
            essential: true,
            analytics: false,
            marketing: false,
            preferences: false,
            timestamp: 0,
            version: version.to_string(),
        }
    }

    /// Parse a stored record, validating its shape.
    pub fn from_json(raw: &str) -> Result<Self, ConsentError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, ConsentError> {
        serde_json::to_string(self)
            .map_err(|e| ConsentError::StorageUnavailable(format!("Failed to encode record: {}", e)))
    }

    /// Apply `update` on top of this record, stamping it for a write.
    pub(crate) fn merged(&self, update: &ConsentUpdate, timestamp: i64, version: &str) -> Self {
        Self {
            essential: true,
            analytics: update.analytics.unwrap_or(self.analytics),
            marketing: update.marketing.unwrap_or(self.marketing),
            preferences: update.preferences.unwrap_or(self.preferences),
            timestamp,
            version: version.to_string(),
        }
    }

    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        match category {
            ConsentCategory::Essential => self.essential(),
            ConsentCategory::Analytics => self.analytics(),
            ConsentCategory::Marketing => self.marketing(),
            ConsentCategory::Preferences => self.preferences(),
        }
    }

    pub fn essential(&self) -> bool {
        self.essential
    }

    pub fn analytics(&self) -> bool {
        self.analytics
    }

    pub fn marketing(&self) -> bool {
        self.marketing
    }

    pub fn preferences(&self) -> bool {
        self.preferences
    }

    /// Epoch milliseconds of the last save.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Cookie policy version the record was written under.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Partial consent payload sent by the preferences panel.
///
/// `essential` is accepted for compatibility with the browser payload and
/// ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<bool>,
}

impl ConsentUpdate {
    /// Set every optional category to `granted`.
    pub fn all(granted: bool) -> Self {
        ConsentCategory::OPTIONAL
            .into_iter()
            .fold(Self::default(), |update, category| update.with(category, granted))
    }

    pub fn with(mut self, category: ConsentCategory, granted: bool) -> Self {
        match category {
            ConsentCategory::Essential => self.essential = Some(granted),
            ConsentCategory::Analytics => self.analytics = Some(granted),
            ConsentCategory::Marketing => self.marketing = Some(granted),
            ConsentCategory::Preferences => self.preferences = Some(granted),
        }
        self
    }
}
