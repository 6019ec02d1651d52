//! Reconciles third-party instrumentation and cookies with saved preferences.

use std::sync::Arc;

use super::ports::{CookieJar, InstrumentationPort};
use crate::models::{descriptor, ConsentCategory, ConsentPreferences, ConsentSignal, Reconciliation};

/// Stateless reaction to a saved consent record.
pub struct ConsentDispatcher {
    ports: Vec<Arc<dyn InstrumentationPort>>,
    cookie_domain: Option<String>,
    purge_preferences_on_revoke: bool,
}

impl ConsentDispatcher {
    pub fn new(ports: Vec<Arc<dyn InstrumentationPort>>) -> Self {
        Self {
            ports,
            cookie_domain: None,
            purge_preferences_on_revoke: false,
        }
    }

    /// Bare domain used for domain-scoped deletions, on top of the request
    /// hostname.
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain;
        self
    }

    /// Also purge personalization cookies when `preferences` is revoked.
    pub fn with_preferences_purge(mut self, purge: bool) -> Self {
        self.purge_preferences_on_revoke = purge;
        self
    }

    /// Signal every optional category and purge cookies of revoked ones.
    ///
    /// Idempotent: the jar forgets purged names, so a repeated pass with the
    /// same preferences sends the same signals and deletes nothing new.
    pub fn reconcile(&self, preferences: &ConsentPreferences, jar: &mut dyn CookieJar) -> Reconciliation {
        let mut report = Reconciliation::default();

        for category in ConsentCategory::OPTIONAL {
            let allowed = preferences.is_allowed(category);
            let signal = ConsentSignal::from_allowed(allowed);
            self.signal(category, signal);
            report.signals.insert(category, signal);

            if !allowed && self.purges_on_revoke(category) {
                report.purged.extend(self.purge(category, jar));
            }
        }

        tracing::debug!(
            signals = ?report.signals,
            purged = report.purged.len(),
            "consent reconciled"
        );
        report
    }

    fn purges_on_revoke(&self, category: ConsentCategory) -> bool {
        match category {
            ConsentCategory::Essential => false,
            ConsentCategory::Analytics | ConsentCategory::Marketing => true,
            ConsentCategory::Preferences => self.purge_preferences_on_revoke,
        }
    }

    fn signal(&self, category: ConsentCategory, signal: ConsentSignal) {
        let mut delivered = false;

        for port in self.ports.iter().filter(|p| p.handles(category)) {
            let result = match signal {
                ConsentSignal::Granted => port.grant(category),
                ConsentSignal::Denied => port.deny(category),
            };
            match result {
                Ok(()) => delivered = true,
                Err(e) => tracing::debug!(port = port.name(), %category, "skipped: {}", e),
            }
        }

        if !delivered {
            tracing::debug!(%category, "no instrumentation to signal");
        }
    }

    /// Expire every cookie the category declares for purging, on the
    /// host-only scope, the bare domain and the request hostname.
    pub fn purge(&self, category: ConsentCategory, jar: &mut dyn CookieJar) -> Vec<String> {
        let descriptor = descriptor(category);

        let mut domains: Vec<String> = self.cookie_domain.iter().cloned().collect();
        if let Some(host) = jar.hostname() {
            if !domains.iter().any(|d| d == host) {
                domains.push(host.to_string());
            }
        }

        let targets: Vec<String> = jar
            .list()
            .into_iter()
            .filter(|name| descriptor.purges(name))
            .collect();

        for name in &targets {
            jar.delete(name, None);
            for domain in &domains {
                jar.delete(name, Some(domain));
            }
        }

        if !targets.is_empty() {
            tracing::info!(%category, cookies = ?targets, "purged revoked cookies");
        }
        targets
    }
}
