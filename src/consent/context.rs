//! Shared accessor through which UI surfaces read and change consent.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};

use super::dispatcher::ConsentDispatcher;
use super::ports::CookieJar;
use super::store::{ConsentState, ConsentStore};
use crate::models::{
    ConsentCategory, ConsentChangeEvent, ConsentPreferences, ConsentSnapshot, ConsentUpdate,
    Reconciliation,
};

/// Delay before the banner shows, so it does not flash during page load.
pub const DEFAULT_BANNER_DELAY: Duration = Duration::from_millis(500);

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// What a save applies to the store.
enum ConsentAction {
    AcceptAll,
    RejectAll,
    Update(ConsentUpdate),
}

/// Result of a consent action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentOutcome {
    pub preferences: ConsentPreferences,
    pub persisted: bool,
    pub reconciliation: Reconciliation,
}

/// Exposes one visitor's consent store and the banner/panel visibility flags.
///
/// The store sits behind a single async mutex: `init`'s load and every save
/// are serialised, so a save can never interleave with a load or another save.
pub struct ConsentContext {
    store: Mutex<ConsentStore>,
    dispatcher: ConsentDispatcher,
    view: watch::Sender<ConsentSnapshot>,
    changes: broadcast::Sender<ConsentChangeEvent>,
    banner_delay: Duration,
}

impl ConsentContext {
    pub fn new(store: ConsentStore, dispatcher: ConsentDispatcher) -> Self {
        let (view, _) = watch::channel(ConsentSnapshot::initial(store.preferences().clone()));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            store: Mutex::new(store),
            dispatcher,
            view,
            changes,
            banner_delay: DEFAULT_BANNER_DELAY,
        }
    }

    pub fn with_banner_delay(mut self, delay: Duration) -> Self {
        self.banner_delay = delay;
        self
    }

    /// Load the stored record once.
    ///
    /// Returns true if this call performed the load. When a save already ran,
    /// the store is kept as is rather than reloaded over.
    pub async fn init(self: &Arc<Self>) -> bool {
        let mut store = self.store.lock().await;
        if self.view.borrow().is_loaded {
            return false;
        }

        if store.state() == ConsentState::Uninitialized {
            store.load().await;
        }
        let needs_consent = store.needs_consent();
        let preferences = store.preferences().clone();
        drop(store);

        self.view.send_modify(|view| {
            view.preferences = preferences;
            view.is_loaded = true;
            view.needs_consent = needs_consent;
        });

        if needs_consent {
            self.schedule_banner();
        }
        true
    }

    fn schedule_banner(self: &Arc<Self>) {
        let context = Arc::downgrade(self);
        let delay = self.banner_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(context) = context.upgrade() else {
                return;
            };
            context.view.send_if_modified(|view| {
                if view.needs_consent && !view.show_banner {
                    view.show_banner = true;
                    true
                } else {
                    false
                }
            });
        });
    }

    pub fn open_preferences(&self) {
        self.view.send_if_modified(|view| {
            let changed = !view.show_preferences;
            view.show_preferences = true;
            changed
        });
    }

    pub fn close_preferences(&self) {
        self.view.send_if_modified(|view| {
            let changed = view.show_preferences;
            view.show_preferences = false;
            changed
        });
    }

    pub async fn accept_all(&self, jar: &mut dyn CookieJar) -> ConsentOutcome {
        self.apply(ConsentAction::AcceptAll, jar).await
    }

    pub async fn reject_all(&self, jar: &mut dyn CookieJar) -> ConsentOutcome {
        self.apply(ConsentAction::RejectAll, jar).await
    }

    /// Same as `reject_all`: only essential cookies stay allowed.
    pub async fn accept_essential_only(&self, jar: &mut dyn CookieJar) -> ConsentOutcome {
        self.reject_all(jar).await
    }

    /// Save a partial update from the preferences panel.
    pub async fn save_preferences(
        &self,
        update: ConsentUpdate,
        jar: &mut dyn CookieJar,
    ) -> ConsentOutcome {
        self.apply(ConsentAction::Update(update), jar).await
    }

    /// Save, reconcile side effects, notify subscribers and close both the
    /// banner and the preferences panel.
    async fn apply(&self, action: ConsentAction, jar: &mut dyn CookieJar) -> ConsentOutcome {
        let mut store = self.store.lock().await;
        let saved = match action {
            ConsentAction::AcceptAll => store.accept_all().await,
            ConsentAction::RejectAll => store.reject_all().await,
            ConsentAction::Update(update) => store.save(&update).await,
        };
        // Also when the write failed: the choice holds for this session, and
        // a revocation must stop tracking now rather than after a retry.
        let reconciliation = self.dispatcher.reconcile(&saved.preferences, jar);

        // No subscribers is fine.
        let _ = self
            .changes
            .send(ConsentChangeEvent::new(saved.preferences.clone()));

        self.view.send_modify(|view| {
            view.preferences = saved.preferences.clone();
            view.needs_consent = false;
            view.show_banner = false;
            view.show_preferences = false;
        });
        drop(store);

        ConsentOutcome {
            preferences: saved.preferences,
            persisted: saved.persisted,
            reconciliation,
        }
    }

    pub fn snapshot(&self) -> ConsentSnapshot {
        self.view.borrow().clone()
    }

    pub fn preferences(&self) -> ConsentPreferences {
        self.view.borrow().preferences.clone()
    }

    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        self.view.borrow().preferences.is_allowed(category)
    }

    /// Follow snapshot changes (banner, panel, preferences).
    pub fn subscribe(&self) -> watch::Receiver<ConsentSnapshot> {
        self.view.subscribe()
    }

    /// Receive a `cookieConsentUpdated` event after every save.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConsentChangeEvent> {
        self.changes.subscribe()
    }
}
