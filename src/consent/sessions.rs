//! One consent context per visitor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::adapters::{GtagConsentMode, TracingInstrumentation};
use super::context::ConsentContext;
use super::dispatcher::ConsentDispatcher;
use super::ports::InstrumentationPort;
use super::store::ConsentStore;
use crate::config::Config;
use crate::db::StorageProvider;
use crate::models::ConsentCategory;

/// A visitor's consent context and the consent-mode state it drives.
#[derive(Clone)]
pub struct ConsentSession {
    pub visitor_id: String,
    pub context: Arc<ConsentContext>,
    pub consent_mode: Arc<GtagConsentMode>,
}

struct Entry {
    session: ConsentSession,
    last_seen: Instant,
}

/// Registry of live consent sessions.
pub struct ConsentSessions {
    sessions: RwLock<HashMap<String, Entry>>,
    storage: StorageProvider,
    config: Arc<Config>,
}

impl ConsentSessions {
    pub fn new(storage: StorageProvider, config: Arc<Config>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            storage,
            config,
        }
    }

    /// Get the visitor's session, creating and loading it on first use.
    pub async fn get_or_create(&self, visitor_id: &str) -> ConsentSession {
        let session = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(visitor_id) {
                Some(entry) => {
                    entry.last_seen = Instant::now();
                    entry.session.clone()
                }
                None => {
                    evict_idle(&mut sessions, self.config.session_idle_ttl);
                    evict_oldest(&mut sessions, self.config.max_sessions);
                    let session = self.build(visitor_id);
                    sessions.insert(
                        visitor_id.to_string(),
                        Entry {
                            session: session.clone(),
                            last_seen: Instant::now(),
                        },
                    );
                    tracing::debug!(visitor = visitor_id, "consent session created");
                    session
                }
            }
        };

        if session.context.init().await {
            session.consent_mode.seed(&session.context.preferences());
        }
        session
    }

    fn build(&self, visitor_id: &str) -> ConsentSession {
        let consent_mode = Arc::new(GtagConsentMode::new());
        let ports: Vec<Arc<dyn InstrumentationPort>> = vec![
            consent_mode.clone(),
            Arc::new(TracingInstrumentation::new(
                "meta-pixel",
                self.config.meta_pixel_id.clone(),
                &[ConsentCategory::Marketing],
            )),
        ];

        let store = ConsentStore::new(
            self.storage.for_visitor(visitor_id),
            &self.config.storage_key,
            &self.config.policy_version,
        )
        .with_timeout(self.config.storage_timeout);

        let dispatcher = ConsentDispatcher::new(ports)
            .with_cookie_domain(self.config.cookie_domain.clone())
            .with_preferences_purge(self.config.purge_preferences_on_revoke);

        let context = ConsentContext::new(store, dispatcher).with_banner_delay(self.config.banner_delay);

        ConsentSession {
            visitor_id: visitor_id.to_string(),
            context: Arc::new(context),
            consent_mode,
        }
    }

    #[cfg(test)]
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn evict_idle(sessions: &mut HashMap<String, Entry>, ttl: Duration) {
    let before = sessions.len();
    sessions.retain(|_, entry| entry.last_seen.elapsed() < ttl);
    let evicted = before - sessions.len();
    if evicted > 0 {
        tracing::debug!(evicted, "evicted idle consent sessions");
    }
}

/// Drop least-recently-seen sessions until one more fits under `cap`.
fn evict_oldest(sessions: &mut HashMap<String, Entry>, cap: usize) {
    while sessions.len() >= cap.max(1) {
        let Some(oldest) = sessions
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(id, _)| id.clone())
        else {
            return;
        };
        sessions.remove(&oldest);
        tracing::debug!(visitor = %oldest, "evicted consent session at capacity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::testing::BrowserCookieJar;
    use crate::db::MemoryStorage;
    use crate::models::ConsentSignal;

    fn sessions(ttl: Duration) -> (ConsentSessions, MemoryStorage) {
        capped_sessions(ttl, 1000)
    }

    fn capped_sessions(ttl: Duration, max_sessions: usize) -> (ConsentSessions, MemoryStorage) {
        let memory = MemoryStorage::new();
        let config = Config {
            session_idle_ttl: ttl,
            banner_delay: Duration::ZERO,
            max_sessions,
            ..Config::for_tests()
        };
        (
            ConsentSessions::new(StorageProvider::Memory(memory.clone()), Arc::new(config)),
            memory,
        )
    }

    #[tokio::test]
    async fn test_same_visitor_gets_same_context() {
        let (sessions, _) = sessions(Duration::from_secs(60));

        let a = sessions.get_or_create("visitor-a").await;
        let again = sessions.get_or_create("visitor-a").await;
        let b = sessions.get_or_create("visitor-b").await;

        assert!(Arc::ptr_eq(&a.context, &again.context));
        assert!(!Arc::ptr_eq(&a.context, &b.context));
        assert!(a.context.snapshot().is_loaded);
        assert_eq!(sessions.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_visitors_do_not_share_consent() {
        let (sessions, _) = sessions(Duration::from_secs(60));

        let a = sessions.get_or_create("visitor-a").await;
        a.context.accept_all(&mut BrowserCookieJar::default()).await;
        let b = sessions.get_or_create("visitor-b").await;

        assert!(a.context.is_allowed(ConsentCategory::Analytics));
        assert!(!b.context.is_allowed(ConsentCategory::Analytics));
        assert!(b.context.snapshot().needs_consent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_session_reloads_from_storage() {
        let (sessions, _) = sessions(Duration::from_secs(60));

        let first = sessions.get_or_create("visitor-a").await;
        first.context.accept_all(&mut BrowserCookieJar::default()).await;
        assert_eq!(
            first.consent_mode.current()["analytics_storage"],
            ConsentSignal::Granted
        );

        tokio::time::advance(Duration::from_secs(120)).await;
        sessions.get_or_create("visitor-b").await;
        assert_eq!(sessions.active_count().await, 1);

        let reloaded = sessions.get_or_create("visitor-a").await;
        assert!(!Arc::ptr_eq(&first.context, &reloaded.context));
        assert!(!reloaded.context.snapshot().needs_consent);
        assert!(reloaded.context.is_allowed(ConsentCategory::Marketing));
        assert_eq!(
            reloaded.consent_mode.current()["ad_storage"],
            ConsentSignal::Granted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_is_capped_and_drops_least_recent() {
        let (sessions, _) = capped_sessions(Duration::from_secs(86_400), 3);

        for visitor in ["a", "b", "c"] {
            sessions.get_or_create(visitor).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // "a" is seen again, so "b" is now the oldest
        let a = sessions.get_or_create("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;

        sessions.get_or_create("d").await;
        assert_eq!(sessions.active_count().await, 3);

        let a_again = sessions.get_or_create("a").await;
        assert!(Arc::ptr_eq(&a.context, &a_again.context));

        for visitor in 0..50 {
            sessions.get_or_create(&format!("crawler-{}", visitor)).await;
        }
        assert_eq!(sessions.active_count().await, 3);
    }
}
