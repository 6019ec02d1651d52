//! Concrete instrumentation ports and the HTTP cookie jar.

use std::collections::BTreeMap;
use std::sync::RwLock;

use axum::http::{header, HeaderMap};

use super::ports::{CookieJar, InstrumentationPort};
use crate::errors::ConsentError;
use crate::models::{ConsentCategory, ConsentPreferences, ConsentSignal};

/// Expiry date used to delete a cookie.
const EPOCH_EXPIRY: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Google consent-mode storage keys driven by each category.
fn consent_mode_keys(category: ConsentCategory) -> &'static [&'static str] {
    match category {
        ConsentCategory::Essential => &[],
        ConsentCategory::Analytics => &["analytics_storage"],
        ConsentCategory::Marketing => &["ad_storage", "ad_personalization", "ad_user_data"],
        ConsentCategory::Preferences => &["personalization_storage"],
    }
}

/// Google consent-mode state for one visitor.
///
/// The page replays `current()` as `gtag('consent', 'update', ...)`.
pub struct GtagConsentMode {
    state: RwLock<BTreeMap<&'static str, ConsentSignal>>,
}

impl Default for GtagConsentMode {
    fn default() -> Self {
        let state = ConsentCategory::OPTIONAL
            .iter()
            .flat_map(|c| consent_mode_keys(*c))
            .map(|key| (*key, ConsentSignal::Denied))
            .collect();

        Self {
            state: RwLock::new(state),
        }
    }
}

impl GtagConsentMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> BTreeMap<&'static str, ConsentSignal> {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Align the state with a record read at startup, without a reconcile pass.
    pub fn seed(&self, preferences: &ConsentPreferences) {
        for category in ConsentCategory::OPTIONAL {
            self.apply(
                category,
                ConsentSignal::from_allowed(preferences.is_allowed(category)),
            );
        }
    }

    fn apply(&self, category: ConsentCategory, signal: ConsentSignal) {
        if let Ok(mut state) = self.state.write() {
            for key in consent_mode_keys(category) {
                state.insert(key, signal);
            }
        }
    }
}

impl InstrumentationPort for GtagConsentMode {
    fn name(&self) -> &str {
        "gtag"
    }

    fn handles(&self, category: ConsentCategory) -> bool {
        !consent_mode_keys(category).is_empty()
    }

    fn grant(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        self.apply(category, ConsentSignal::Granted);
        Ok(())
    }

    fn deny(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        self.apply(category, ConsentSignal::Denied);
        Ok(())
    }
}

/// Logs consent signals for a page tag that has no server-side hook.
///
/// Without a tag id the integration is absent and signals are refused.
pub struct TracingInstrumentation {
    vendor: String,
    tag_id: Option<String>,
    categories: Vec<ConsentCategory>,
}

impl TracingInstrumentation {
    pub fn new(vendor: &str, tag_id: Option<String>, categories: &[ConsentCategory]) -> Self {
        Self {
            vendor: vendor.to_string(),
            tag_id,
            categories: categories.to_vec(),
        }
    }

    fn tag_id(&self) -> Result<&str, ConsentError> {
        self.tag_id
            .as_deref()
            .ok_or_else(|| ConsentError::IntegrationAbsent(self.vendor.clone()))
    }
}

impl InstrumentationPort for TracingInstrumentation {
    fn name(&self) -> &str {
        &self.vendor
    }

    fn handles(&self, category: ConsentCategory) -> bool {
        self.categories.contains(&category)
    }

    fn grant(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        let tag = self.tag_id()?;
        tracing::info!(vendor = %self.vendor, tag, %category, "consent granted");
        Ok(())
    }

    fn deny(&self, category: ConsentCategory) -> Result<(), ConsentError> {
        let tag = self.tag_id()?;
        tracing::info!(vendor = %self.vendor, tag, %category, "consent denied");
        Ok(())
    }
}

/// Cookie jar built from a request; deletions become `Set-Cookie` headers.
#[derive(Debug, Default)]
pub struct ResponseCookieJar {
    names: Vec<String>,
    hostname: Option<String>,
    set_cookies: Vec<String>,
}

impl ResponseCookieJar {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut names = Vec::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for (name, _) in parse_cookie_header(value) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }

        let hostname = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(strip_port)
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        Self {
            names,
            hostname,
            set_cookies: Vec::new(),
        }
    }

    pub fn into_set_cookies(self) -> Vec<String> {
        self.set_cookies
    }
}

impl CookieJar for ResponseCookieJar {
    fn list(&self) -> Vec<String> {
        self.names.clone()
    }

    fn delete(&mut self, name: &str, domain: Option<&str>) {
        let mut cookie = format!("{}=; Expires={}; Max-Age=0; Path=/", name, EPOCH_EXPIRY);
        if let Some(domain) = domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        self.set_cookies.push(cookie);
        self.names.retain(|n| n != name);
    }

    fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

/// Split a `Cookie` request header into name/value pairs.
pub fn parse_cookie_header(value: &str) -> impl Iterator<Item = (&str, &str)> {
    value.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = name.trim();
        (!name.is_empty()).then_some((name, value.trim()))
    })
}

fn strip_port(host: &str) -> &str {
    // IPv6 literal
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}
