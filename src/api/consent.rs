//! Consent API endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use super::{error, known_session, success, visitor_session, ApiResult};
use crate::consent::{ConsentOutcome, ConsentSession, ResponseCookieJar};
use crate::errors::AppError;
use crate::models::{
    ConsentCategory, ConsentPreferences, ConsentSignal, ConsentSnapshot, ConsentUpdate,
    CookieCategoryDescriptor, Reconciliation, COOKIE_CATEGORIES,
};
use crate::AppState;

/// A visitor's consent as the page sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentView {
    #[serde(flatten)]
    pub snapshot: ConsentSnapshot,
    /// Google consent-mode values to replay with `gtag('consent', 'update', ...)`
    pub consent_mode: BTreeMap<&'static str, ConsentSignal>,
}

impl ConsentView {
    fn of(session: &ConsentSession) -> Self {
        Self {
            snapshot: session.context.snapshot(),
            consent_mode: session.consent_mode.current(),
        }
    }

    fn revision_id(&self) -> i64 {
        self.snapshot.preferences.timestamp()
    }
}

/// Response to a consent action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub consent: ConsentView,
    pub persisted: bool,
    pub reconciliation: Reconciliation,
}

/// Disclosure catalogue for the preferences panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoriesResponse {
    pub policy_version: String,
    pub categories: &'static [CookieCategoryDescriptor],
}

/// Answer to an `isAllowed` query.
#[derive(Debug, Clone, Serialize)]
pub struct AllowedResponse {
    pub category: ConsentCategory,
    pub allowed: bool,
}

/// GET /api/consent - Current consent snapshot.
pub async fn get_consent(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<ConsentView> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    let view = ConsentView::of(&session);
    let revision_id = view.revision_id();
    success(view, revision_id, set_cookies)
}

/// GET /api/consent/categories - Cookie disclosure catalogue.
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<CategoriesResponse> {
    success(
        CategoriesResponse {
            policy_version: state.config.policy_version.clone(),
            categories: COOKIE_CATEGORIES,
        },
        0,
        Vec::new(),
    )
}

/// GET /api/consent/allowed/:category - Whether a category is allowed.
///
/// A caller without a visitor id gets the defaults.
pub async fn is_allowed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(category): Path<String>,
) -> ApiResult<AllowedResponse> {
    let Some(category) = ConsentCategory::parse(&category) else {
        return error(
            AppError::Validation(format!("Unknown consent category: {}", category)),
            0,
        );
    };

    let preferences = match known_session(&state, &headers).await {
        Some(session) => session.context.preferences(),
        None => ConsentPreferences::default_for(&state.config.policy_version),
    };
    let allowed = preferences.is_allowed(category);
    success(
        AllowedResponse { category, allowed },
        preferences.timestamp(),
        Vec::new(),
    )
}

/// POST /api/consent/accept-all - Accept every category.
pub async fn accept_all(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<ActionResponse> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    let mut jar = ResponseCookieJar::from_headers(&headers);
    let outcome = session.context.accept_all(&mut jar).await;
    action_response(&session, outcome, jar, set_cookies)
}

/// POST /api/consent/reject-all - Refuse every optional category.
pub async fn reject_all(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<ActionResponse> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    let mut jar = ResponseCookieJar::from_headers(&headers);
    let outcome = session.context.reject_all(&mut jar).await;
    action_response(&session, outcome, jar, set_cookies)
}

/// POST /api/consent/essential-only - Keep essential cookies only.
pub async fn accept_essential_only(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ActionResponse> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    let mut jar = ResponseCookieJar::from_headers(&headers);
    let outcome = session.context.accept_essential_only(&mut jar).await;
    action_response(&session, outcome, jar, set_cookies)
}

/// PUT /api/consent/preferences - Save a custom choice from the panel.
pub async fn save_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConsentUpdate>, JsonRejection>,
) -> ApiResult<ActionResponse> {
    let update = match body {
        Ok(Json(update)) => update,
        Err(rejection) => return error(rejection.into(), 0),
    };

    let (session, set_cookies) = visitor_session(&state, &headers).await;
    let mut jar = ResponseCookieJar::from_headers(&headers);
    let outcome = session.context.save_preferences(update, &mut jar).await;
    action_response(&session, outcome, jar, set_cookies)
}

/// POST /api/consent/panel/open - Show the preferences panel.
pub async fn open_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ConsentView> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    session.context.open_preferences();
    let view = ConsentView::of(&session);
    let revision_id = view.revision_id();
    success(view, revision_id, set_cookies)
}

/// POST /api/consent/panel/close - Hide the preferences panel.
pub async fn close_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ConsentView> {
    let (session, set_cookies) = visitor_session(&state, &headers).await;
    session.context.close_preferences();
    let view = ConsentView::of(&session);
    let revision_id = view.revision_id();
    success(view, revision_id, set_cookies)
}

fn action_response(
    session: &ConsentSession,
    outcome: ConsentOutcome,
    jar: ResponseCookieJar,
    mut set_cookies: Vec<String>,
) -> ApiResult<ActionResponse> {
    set_cookies.extend(jar.into_set_cookies());
    let revision_id = outcome.preferences.timestamp();

    success(
        ActionResponse {
            consent: ConsentView::of(session),
            persisted: outcome.persisted,
            reconciliation: outcome.reconciliation,
        },
        revision_id,
        set_cookies,
    )
}
