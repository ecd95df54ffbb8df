//! Dialect endpoints. Each handler parses the body, strips the optional
//! project-slug prefix, runs token auth, and hands a canonical request to
//! the engine; streaming replies are bridged onto the response body with
//! SSE keep-alives.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;
use tracing::warn;

use maxx_adapter::CanonicalRequest;
use maxx_common::{ClientType, ErrorKind};
use maxx_core::auth::TokenAuth;
use maxx_core::engine::{ProxyEngine, ServeBody, ServeOutcome};
use maxx_protocol::{claude, gemini, openai};
use maxx_storage::entities::{api_tokens, projects};

const SSE_HEARTBEAT: Duration = Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";
const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<ProxyEngine>,
    pub auth: Arc<TokenAuth>,
}

pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        // Claude
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/{project}/v1/messages", post(claude_messages_scoped))
        .route(
            "/{project}/v1/messages/count_tokens",
            post(claude_count_tokens_scoped),
        )
        // OpenAI
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/models", get(models_list))
        .route("/{project}/v1/chat/completions", post(openai_chat_scoped))
        .route("/{project}/v1/responses", post(openai_responses_scoped))
        .route("/{project}/v1/models", get(models_list))
        // Codex native envelope
        .route("/responses", post(openai_responses))
        .route("/{project}/responses", post(openai_responses_scoped))
        // Gemini (`{model}` carries the `:generateContent` suffix)
        .route("/v1beta/models/{*model}", post(gemini_generate))
        .route("/{project}/v1beta/models/{*model}", post(gemini_generate_scoped))
        .with_state(state)
}

// ---- claude ----

async fn claude_messages(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_claude(state, None, headers, body).await
}

async fn claude_messages_scoped(
    State(state): State<ProxyState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_claude(state, Some(project), headers, body).await
}

async fn serve_claude(
    state: ProxyState,
    slug: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: claude::CreateMessageRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(ClientType::Claude, ErrorKind::InvalidInput(err.to_string())),
    };
    let canonical = CanonicalRequest::from_claude(req, session_id(&headers));
    serve(state, ClientType::Claude, slug, headers, canonical).await
}

async fn claude_count_tokens(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_count_tokens(state, None, headers, body).await
}

async fn claude_count_tokens_scoped(
    State(state): State<ProxyState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_count_tokens(state, Some(project), headers, body).await
}

async fn serve_count_tokens(
    state: ProxyState,
    slug: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: claude::CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(ClientType::Claude, ErrorKind::InvalidInput(err.to_string())),
    };
    let canonical = CanonicalRequest::from_claude_count_tokens(req, session_id(&headers));
    serve(state, ClientType::Claude, slug, headers, canonical).await
}

// ---- openai ----

async fn openai_chat(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_openai_chat(state, None, headers, body).await
}

async fn openai_chat_scoped(
    State(state): State<ProxyState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_openai_chat(state, Some(project), headers, body).await
}

async fn serve_openai_chat(
    state: ProxyState,
    slug: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: openai::ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(ClientType::OpenAI, ErrorKind::InvalidInput(err.to_string())),
    };
    let canonical = CanonicalRequest::from_openai_chat(req, session_id(&headers));
    serve(state, ClientType::OpenAI, slug, headers, canonical).await
}

async fn openai_responses(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_responses(state, None, headers, body).await
}

async fn openai_responses_scoped(
    State(state): State<ProxyState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_responses(state, Some(project), headers, body).await
}

/// Both `/v1/responses` and the bare Codex `/responses` carry the same
/// envelope and route as the codex client type.
async fn serve_responses(
    state: ProxyState,
    slug: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: openai::CreateResponseRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(ClientType::Codex, ErrorKind::InvalidInput(err.to_string())),
    };
    let canonical = CanonicalRequest::from_codex(req, session_id(&headers));
    serve(state, ClientType::Codex, slug, headers, canonical).await
}

async fn models_list(State(state): State<ProxyState>) -> Response {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let list = openai::ModelList {
        object: "list".into(),
        data: state
            .engine
            .known_models()
            .into_iter()
            .map(|id| openai::ModelEntry {
                id,
                object: "model".into(),
                created: now,
                owned_by: "maxx".into(),
            })
            .collect(),
    };
    json_response(StatusCode::OK, &list)
}

// ---- gemini ----

async fn gemini_generate(
    State(state): State<ProxyState>,
    Path(model): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_gemini(state, None, model, headers, body).await
}

async fn gemini_generate_scoped(
    State(state): State<ProxyState>,
    Path((project, model)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve_gemini(state, Some(project), model, headers, body).await
}

async fn serve_gemini(
    state: ProxyState,
    slug: Option<String>,
    model_path: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, method)) = model_path.split_once(':') else {
        return error_response(
            ClientType::Gemini,
            ErrorKind::InvalidInput("missing :generateContent suffix".into()),
        );
    };
    let stream = match method {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_response(
                ClientType::Gemini,
                ErrorKind::InvalidInput(format!("unknown method {other}")),
            );
        }
    };
    let req: gemini::GenerateContentRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(ClientType::Gemini, ErrorKind::InvalidInput(err.to_string())),
    };
    let canonical = CanonicalRequest::from_gemini(req, model, stream, session_id(&headers));
    serve(state, ClientType::Gemini, slug, headers, canonical).await
}

// ---- shared plumbing ----

async fn serve(
    state: ProxyState,
    client_type: ClientType,
    slug: Option<String>,
    headers: HeaderMap,
    canonical: CanonicalRequest,
) -> Response {
    let header_pairs = header_pairs(&headers);

    let api_token: Option<api_tokens::Model> =
        match state.auth.authenticate(client_type, &header_pairs).await {
            Ok(token) => token,
            Err(kind) => return error_response(client_type, kind),
        };

    let project: Option<projects::Model> = match slug {
        Some(slug) => match state.engine.store().get_project_by_slug(&slug).await {
            Ok(Some(project)) => Some(project),
            Ok(None) => {
                return error_response(client_type, ErrorKind::NotFound(format!("project {slug}")));
            }
            Err(err) => {
                warn!(error = %err, "project lookup failed");
                return error_response(client_type, ErrorKind::Internal(err.to_string()));
            }
        },
        None => None,
    };

    let is_stream = canonical.stream;
    let (client_tx, client_rx) = mpsc::channel::<Bytes>(64);
    let outcome = state
        .engine
        .serve(canonical, project.as_ref(), api_token.as_ref(), client_tx)
        .await;

    into_response(outcome, client_rx, is_stream, client_type)
}

fn into_response(
    outcome: ServeOutcome,
    client_rx: mpsc::Receiver<Bytes>,
    is_stream: bool,
    client_type: ClientType,
) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match outcome.body {
        ServeBody::Complete(bytes) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, outcome.content_type)
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        ServeBody::Streaming => {
            // Heartbeats only on SSE dialects; a comment frame would
            // corrupt Gemini's chunked-JSON array.
            let heartbeat = is_stream && client_type != ClientType::Gemini;
            let body_stream = stream::unfold(client_rx, move |mut rx| async move {
                if heartbeat {
                    match tokio::time::timeout(SSE_HEARTBEAT, rx.recv()).await {
                        Ok(Some(chunk)) => Some((Ok::<Bytes, Infallible>(chunk), rx)),
                        Ok(None) => None,
                        Err(_) => Some((Ok(Bytes::from_static(SSE_HEARTBEAT_FRAME)), rx)),
                    }
                } else {
                    rx.recv().await.map(|chunk| (Ok(chunk), rx))
                }
            });
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, outcome.content_type)
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(body_stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Dialect-shaped error body with the kind's HTTP status.
fn error_response(client_type: ClientType, kind: ErrorKind) -> Response {
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    let message = kind.to_string();
    let body = match client_type {
        ClientType::Claude => serde_json::to_value(claude::ErrorResponse::new(
            error_slug(&kind),
            message,
        ))
        .unwrap_or_default(),
        ClientType::OpenAI | ClientType::Codex => {
            serde_json::to_value(openai::ErrorResponse::new(message)).unwrap_or_default()
        }
        ClientType::Gemini => serde_json::to_value(gemini::ErrorResponse {
            error: gemini::ErrorBody {
                code: status.as_u16() as i64,
                message,
                status: None,
            },
        })
        .unwrap_or_default(),
    };
    json_response(status, &body)
}

fn error_slug(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound(_) => "not_found_error",
        ErrorKind::InvalidInput(_) => "invalid_request_error",
        ErrorKind::MissingToken
        | ErrorKind::InvalidToken
        | ErrorKind::TokenDisabled
        | ErrorKind::TokenExpired
        | ErrorKind::Unauthorized => "authentication_error",
        ErrorKind::Conflict(_) => "invalid_request_error",
        _ => "api_error",
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
