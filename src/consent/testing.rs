//! Test doubles for the consent ports.

use std::collections::HashMap;
use std::sync::Mutex;

use super::ports::{CookieJar, InstrumentationPort};
use crate::errors::ConsentError;
use crate::models::{ConsentCategory, ConsentSignal};

/// Browser-like jar: cookies are keyed by name and scope.
#[derive(Debug, Default)]
pub struct BrowserCookieJar {
    host: Option<String>,
    cookies: Vec<(String, Option<String>)>,
    deletions: Vec<(String, Option<String>)>,
}

impl BrowserCookieJar {
    pub fn with_host(host: &str, host_only: &[&str]) -> Self {
        Self {
            host: Some(host.to_string()),
            cookies: host_only.iter().map(|n| (n.to_string(), None)).collect(),
            deletions: Vec::new(),
        }
    }

    pub fn set_on_domain(&mut self, name: &str, domain: &str) {
        self.cookies.push((name.to_string(), Some(domain.to_string())));
    }

    pub fn deletions(&self) -> &[(String, Option<String>)] {
        &self.deletions
    }
}

impl CookieJar for BrowserCookieJar {
    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in &self.cookies {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    fn delete(&mut self, name: &str, domain: Option<&str>) {
        self.deletions
            .push((name.to_string(), domain.map(str::to_string)));
        self.cookies
            .retain(|(n, d)| !(n == name && d.as_deref() == domain));
    }

    fn hostname(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Remembers the last signal per category.
pub struct RecordingPort {
    categories: Vec<ConsentCategory>,
    present: bool,
    signals: Mutex<HashMap<ConsentCategory, ConsentSignal>>,
}

impl RecordingPort {
    pub fn new(categories: &[ConsentCategory]) -> Self {
        Self {
            categories: categories.to_vec(),
            present: true,
            signals: Mutex::new(HashMap::new()),
        }
    }

    /// A port whose integration never loaded.
    pub fn absent(categories: &[ConsentCategory]) -> Self {
        Self {
            present: false,
            ..Self::new(categories)
        }
    }

    pub fn last_signal(&self, category: ConsentCategory) -> Option<ConsentSignal> {
        self.signals.lock().unwrap().get(&category).copied()
    }

    fn record(&self, category: ConsentCategory, signal: ConsentSignal) -> Result<(), ConsentError> {
        if !self.present {
            return Err(ConsentError::IntegrationAbsent("recording".to_string()));
        }
        self.signals.lock().unwrap().insert(category, signal);
        Ok(())
    }
}

impl InstrumentationPort for RecordingPort {
    fn name(&self) -> &str {
        "recording"
    }

    fn handles(&self, category: ConsentCategory) -> bool {
        self.categories.contains(&category)
    }

    fn grant(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        self.record(category, ConsentSignal::Granted)
    }

    fn deny(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        self.record(category, ConsentSignal::Denied)
    }
}
