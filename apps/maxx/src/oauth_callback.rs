//! Local OAuth callback listener for the Codex login flow. The vendor
//! redirects the browser to `http://localhost:1455/auth/callback`; this
//! listener hands the code off and serves an auto-closing page.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tracing::{info, warn};

use maxx_core::events::{Event, EventHub};

const SUCCESS_PAGE: &str = "<!doctype html><html><body>\
<p>Sign-in complete. You can close this window.</p>\
<script>window.close();</script>\
</body></html>";

#[derive(Clone)]
struct CallbackState {
    events: EventHub,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn run(port: u16, events: EventHub) {
    let app = Router::new()
        .route("/auth/callback", get(callback))
        .with_state(CallbackState { events });
    let bind = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(error = %err, %bind, "oauth callback listener unavailable");
            return;
        }
    };
    info!(%bind, "oauth callback listener up");
    if let Err(err) = axum::serve(listener, app).await {
        warn!(error = %err, "oauth callback listener stopped");
    }
}

async fn callback(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        warn!(error, "oauth callback returned an error");
        state.events.publish(Event::CodexOauthResult {
            provider_id: 0,
            ok: false,
        });
        return (StatusCode::BAD_REQUEST, Html(SUCCESS_PAGE)).into_response();
    }
    let ok = query.code.is_some() && query.state.is_some();
    state
        .events
        .publish(Event::CodexOauthResult { provider_id: 0, ok });
    Html(SUCCESS_PAGE).into_response()
}
