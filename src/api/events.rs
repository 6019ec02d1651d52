//! Consent change streams.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use super::known_session;
use crate::consent::ConsentSession;
use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::CONSENT_UPDATED_EVENT;
use crate::AppState;

/// Event name carrying a full consent snapshot.
pub const CONSENT_STATE_EVENT: &str = "consentState";

/// Streams only follow visitors that already have an id.
async fn stream_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ConsentSession, AppErrorWithRevision> {
    known_session(state, headers)
        .await
        .ok_or_else(|| AppErrorWithRevision {
            error: AppError::BadRequest("Missing visitor id, load /api/consent first".to_string()),
            revision_id: 0,
        })
}

/// GET /api/consent/events - Server-sent `cookieConsentUpdated` events.
///
/// Each event carries the full new record so independent scripts can
/// configure themselves without talking to the store.
pub async fn consent_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppErrorWithRevision> {
    let session = stream_session(&state, &headers).await?;
    tracing::debug!(visitor = %session.visitor_id, "consent event stream opened");
    let receiver = session.context.subscribe_changes();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) => {
                    let event = match Event::default()
                        .event(CONSENT_UPDATED_EVENT)
                        .json_data(&change.detail)
                    {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!("Failed to encode consent event: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok::<_, Infallible>(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "consent event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/consent/state/events - Server-sent consent snapshots.
///
/// Sends the current snapshot first, then one per change: loading, the
/// delayed banner, the preferences panel and every save.
pub async fn consent_state_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppErrorWithRevision> {
    let session = stream_session(&state, &headers).await?;
    tracing::debug!(visitor = %session.visitor_id, "consent state stream opened");
    let receiver = session.context.subscribe();

    let events = stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let snapshot = receiver.borrow_and_update().clone();

        let event = Event::default()
            .event(CONSENT_STATE_EVENT)
            .json_data(&snapshot)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to encode consent snapshot: {}", e);
                Event::default().event(CONSENT_STATE_EVENT).comment("encoding failed")
            });
        Some((Ok::<_, Infallible>(event), (receiver, false)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
