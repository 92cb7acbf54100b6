use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::chatwoot::ChatwootWebhookEvent;
use crate::adapters::slack::{classify_slack_payload, is_url_verification};
use crate::relay::{
    relay_inbound_event, resolve_slack_event, spawn_chatwoot_relay, RelayState, SlackEventDecision,
};
use crate::verify::verify_slack;

pub fn build_router(state: Arc<RelayState>) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/chatwoot/webhook", post(ingest_chatwoot))
        .route("/chatwoot-webhook", post(ingest_chatwoot))
        .route("/slack/events", post(ingest_slack))
        .route("/slack-events", post(ingest_slack))
        .with_state(state)
        // Oversized bodies get 413 before any handler runs.
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Chatwoot redelivers on anything but 200, so every path acknowledges.
pub async fn ingest_chatwoot(State(state): State<Arc<RelayState>>, body: Bytes) -> Response {
    let event: ChatwootWebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!("relay ignoring unparseable chatwoot payload: {}", err);
            return (StatusCode::OK, Json(json!({"status": "bad_json"}))).into_response();
        }
    };

    let outcome = relay_inbound_event(&state, &event).await;
    (StatusCode::OK, Json(json!({"status": outcome.status()}))).into_response()
}

/// Slack events endpoint. The handshake is answered before anything else;
/// relays to Chatwoot run after the response is decided and are not awaited.
pub async fn ingest_slack(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(verification) = is_url_verification(&body) {
        info!("answering slack url verification");
        return (StatusCode::OK, verification.challenge).into_response();
    }

    let signing_secret = state.config.slack_signing_secret.as_deref();
    if let Err(reason) = verify_slack(signing_secret, &headers, &body) {
        warn!("rejecting slack request: {}", reason);
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason}))).into_response();
    }

    let payload = match classify_slack_payload(&body, state.config.slack_bot_user_id.as_deref()) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("relay ignoring unparseable slack payload: {}", err);
            return (StatusCode::OK, Json(json!({"status": "bad_json"}))).into_response();
        }
    };

    let decision = resolve_slack_event(&state, payload).await;
    let status = decision.status();
    match decision {
        SlackEventDecision::Challenge(challenge) => (StatusCode::OK, challenge).into_response(),
        SlackEventDecision::Relay(job) => {
            spawn_chatwoot_relay(state.clone(), job);
            (StatusCode::OK, Json(json!({"status": status}))).into_response()
        }
        _ => (StatusCode::OK, Json(json!({"status": status}))).into_response(),
    }
}
