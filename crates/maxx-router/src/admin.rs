//! Thin admin boundary: JWT-gated management calls and the WebSocket
//! event feed. Handlers parse, delegate, and shape JSON; all behavior
//! lives in core and storage.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;

use maxx_common::ClientType;
use maxx_core::engine::ProxyEngine;
use maxx_core::events::EventHub;
use maxx_core::recalc::recalculate_costs;

const TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<ProxyEngine>,
    pub events: EventHub,
    /// `None` disables admin auth entirely (no password configured).
    pub password: Option<Arc<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/cooldowns/{provider_id}/{client_type}/clear", post(clear_cooldown))
        .route("/recalculate-costs", post(trigger_recalc))
        .route("/sessions/{session_id}/adopt/{project_id}", post(adopt_session))
        .route("/settings/{key}", get(get_setting).put(put_setting))
        .layer(middleware::from_fn_with_state(state.clone(), require_jwt))
        .route("/login", post(login))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn require_jwt(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(password) = &state.password else {
        return next.run(request).await;
    };
    let ok = bearer_token(request.headers())
        .map(|token| verify_jwt(password, &token))
        .unwrap_or(false);
    if !ok {
        return structured_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: String,
}

async fn login(State(state): State<AdminState>, body: axum::Json<LoginRequest>) -> Response {
    let Some(password) = &state.password else {
        return structured_error(StatusCode::NOT_FOUND, "admin auth disabled");
    };
    if body.password != **password {
        return structured_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    let claims = Claims {
        sub: "admin".into(),
        exp: OffsetDateTime::now_utc().unix_timestamp() + TOKEN_TTL_SECS,
    };
    match encode(&Header::default(), &claims, &EncodingKey::from_secret(key_bytes(password).as_ref())) {
        Ok(token) => (StatusCode::OK, axum::Json(json!({"token": token}))).into_response(),
        Err(err) => {
            warn!(error = %err, "jwt encode failed");
            structured_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn list_providers(State(state): State<AdminState>) -> Response {
    match state.engine.store().list_providers(false).await {
        Ok(providers) => {
            let view: Vec<_> = providers
                .into_iter()
                .map(|provider| {
                    json!({
                        "id": provider.id,
                        "name": provider.name,
                        "type": provider.provider_type,
                        "supported_client_types": provider.supported_client_types,
                    })
                })
                .collect();
            (StatusCode::OK, axum::Json(json!({"providers": view}))).into_response()
        }
        Err(err) => structured_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

/// The explicit "clear" API is the only early exit from a cooldown.
async fn clear_cooldown(
    State(state): State<AdminState>,
    Path((provider_id, client_type)): Path<(i64, String)>,
) -> Response {
    let Some(client_type) = ClientType::parse(&client_type) else {
        return structured_error(StatusCode::BAD_REQUEST, "unknown client type");
    };
    match state
        .engine
        .store()
        .clear_cooldown(provider_id, client_type)
        .await
    {
        Ok(()) => (StatusCode::OK, axum::Json(json!({"ok": true}))).into_response(),
        Err(err) => structured_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn trigger_recalc(State(state): State<AdminState>) -> Response {
    let engine = state.engine.clone();
    let events = state.events.clone();
    tokio::spawn(async move {
        let summary = recalculate_costs(engine.store(), engine.cache(), &events).await;
        tracing::info!(
            scanned = summary.scanned,
            updated = summary.updated,
            batch_errors = summary.batch_errors,
            "cost recalculation finished"
        );
    });
    (StatusCode::ACCEPTED, axum::Json(json!({"started": true}))).into_response()
}

async fn adopt_session(
    State(state): State<AdminState>,
    Path((session_id, project_id)): Path<(String, i64)>,
) -> Response {
    match state
        .engine
        .store()
        .adopt_session(&session_id, project_id)
        .await
    {
        Ok(()) => (StatusCode::OK, axum::Json(json!({"ok": true}))).into_response(),
        Err(err) => structured_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn get_setting(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    match state.engine.store().get_setting(&key).await {
        Ok(Some(value)) => {
            (StatusCode::OK, axum::Json(json!({"key": key, "value": value}))).into_response()
        }
        Ok(None) => structured_error(StatusCode::NOT_FOUND, "setting not found"),
        Err(err) => structured_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct PutSetting {
    value: String,
}

async fn put_setting(
    State(state): State<AdminState>,
    Path(key): Path<String>,
    body: axum::Json<PutSetting>,
) -> Response {
    match state.engine.store().set_setting(&key, &body.value).await {
        Ok(()) => (StatusCode::OK, axum::Json(json!({"ok": true}))).into_response(),
        Err(err) => structured_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn ws_upgrade(State(state): State<AdminState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| event_feed(socket, state.events.clone()))
}

async fn event_feed(mut socket: WebSocket, events: EventHub) {
    let mut receiver = events.subscribe();
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            // Lagged receivers skip dropped events and continue.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn verify_jwt(password: &str, token: &str) -> bool {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(key_bytes(password).as_ref()),
        &Validation::default(),
    )
    .is_ok()
}

/// Signing key derived from the admin password; the password itself is
/// never embedded in tokens.
fn key_bytes(password: &str) -> [u8; 32] {
    *blake3::hash(password.as_bytes()).as_bytes()
}

/// Administrative mutations always answer structured JSON, never a stack
/// trace.
fn structured_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({"error": message}))).into_response()
}
