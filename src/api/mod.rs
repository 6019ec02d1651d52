//! REST API module.
//!
//! Lets the banner, the preferences panel and the settings button drive the
//! visitor's consent context over HTTP.

mod consent;
mod events;

pub use consent::*;
pub use events::*;

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::consent::{parse_cookie_header, ConsentSession};
use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::SESSION_COOKIE;
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    /// Timestamp of the visitor's consent record
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// A response plus the `Set-Cookie` headers it must carry.
pub struct WithCookies<R> {
    pub set_cookies: Vec<String>,
    pub response: R,
}

impl<R: IntoResponse> IntoResponse for WithCookies<R> {
    fn into_response(self) -> Response {
        let mut response = self.response.into_response();
        for cookie in self.set_cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(e) => tracing::warn!("Dropping invalid Set-Cookie header: {}", e),
            }
        }
        response
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<WithCookies<ApiResponse<T>>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64, set_cookies: Vec<String>) -> ApiResult<T> {
    Ok(WithCookies {
        set_cookies,
        response: ApiResponse::new(data, revision_id),
    })
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Lifetime of the visitor id cookie, matching the consent record's.
pub const SESSION_COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Visitor id carried by the request, if any.
fn visitor_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_cookie_header)
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

fn session_cookie(state: &AppState, id: Uuid) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, id, SESSION_COOKIE_MAX_AGE_SECS
    );
    if state.config.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The caller's session, plus the `Set-Cookie` issuing a visitor id when the
/// request did not carry a valid one.
pub async fn visitor_session(state: &AppState, headers: &HeaderMap) -> (ConsentSession, Vec<String>) {
    let (id, set_cookies) = match visitor_id(headers) {
        Some(id) => (id, Vec::new()),
        None => {
            let id = Uuid::new_v4();
            (id, vec![session_cookie(state, id)])
        }
    };

    let session = state.sessions.get_or_create(&id.to_string()).await;
    (session, set_cookies)
}

/// The caller's session when the request carries a visitor id. Read-only
/// routes use this so cookie-less clients never register a session.
pub async fn known_session(state: &AppState, headers: &HeaderMap) -> Option<ConsentSession> {
    let id = visitor_id(headers)?;
    Some(state.sessions.get_or_create(&id.to_string()).await)
}
