//! Relay HTTP server: signed Slack webhooks in, agent answers out.
//!
//! Signed endpoints extract the raw `Bytes` body so the signature is computed
//! over the exact payload Slack sent; parsing happens only after verification
//! passes. Event callbacks are acknowledged immediately and processed in a
//! spawned task, since Slack expects a fast 200 regardless of downstream
//! outcome. Slash commands and the direct API answer synchronously.

use crate::config::{self, Config};
use crate::routing::{AgentRequest, AgentRouter};
use crate::slack::{strip_mentions, CallbackEvent, EventEnvelope, SlackClient, SlashCommand};
use crate::verify::SignatureVerifier;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const SERVICE_NAME: &str = "f8-slack-relay";

const SIGNATURE_HEADER: &str = "X-Slack-Signature";
const TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";

/// Ephemeral guidance for an empty slash command; not an error.
const USAGE_TEXT: &str = "Please provide a question. Usage: /f8 [question]";

/// Shared state for the relay: the pre-resolved components every handler
/// needs. Everything here is read-only after startup.
#[derive(Clone)]
pub struct RelayState {
    pub verifier: Arc<SignatureVerifier>,
    pub router: Arc<AgentRouter>,
    pub slack: Arc<SlackClient>,
    started_at: Instant,
}

/// Build the axum router over a prepared state.
fn relay_app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/slack/events", post(slack_events))
        .route("/api/slack/commands", post(slack_commands))
        .route("/api/slack/ask-f8", post(ask_f8))
        .with_state(state)
}

/// Run the relay server; binds to config.relay.bind:config.relay.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_relay(config: Config) -> Result<()> {
    let verifier = SignatureVerifier::new(config::resolve_signing_secret(&config));
    if !verifier.has_secret() {
        log::warn!("no slack signing secret configured; signed endpoints will reject all requests");
    }
    let router = AgentRouter::from_config(&config);
    if router.endpoints().is_empty() && config::resolve_gateway_url(&config).is_none() {
        log::warn!("no gateway and no agent endpoints configured; all questions will be unroutable");
    } else {
        log::info!("{} agent endpoint(s) configured", router.endpoints().len());
    }
    let slack = SlackClient::new(config::resolve_bot_token(&config));

    let bind = config.relay.bind.trim().to_string();
    let port = config.relay.port;
    let state = RelayState {
        verifier: Arc::new(verifier),
        router: Arc::new(router),
        slack: Arc::new(slack),
        started_at: Instant::now(),
    };

    let app = relay_app(state);
    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            log::error!("failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => {
                log::error!("failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET /health — liveness probe with service identity and uptime.
async fn health(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// Pull the two Slack signature headers, or report them missing.
fn signature_headers(headers: &HeaderMap) -> Result<(String, String), Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match (signature, timestamp) {
        (Some(s), Some(t)) => Ok((s, t)),
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing signature headers" })),
        )
            .into_response()),
    }
}

/// Verify the raw body against the signature headers; 401 on mismatch.
fn require_signature(state: &RelayState, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
    let (signature, timestamp) = signature_headers(headers)?;
    if !state.verifier.verify(body, &signature, &timestamp) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid request signature" })),
        )
            .into_response());
    }
    Ok(())
}

/// POST /api/slack/events — Events API callback.
///
/// url_verification is answered inline with the challenge. event_callback is
/// acknowledged immediately; the actual routing and reply happen in a spawned
/// task so Slack never waits on a downstream agent.
async fn slack_events(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = require_signature(&state, &headers, &body) {
        return rejection;
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("unparseable event envelope: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid event payload" })),
            )
                .into_response();
        }
    };

    match envelope.typ.as_str() {
        "url_verification" => {
            let challenge = envelope.challenge.unwrap_or_default();
            Json(json!({ "challenge": challenge })).into_response()
        }
        "event_callback" => {
            if let Some(event) = envelope.event {
                tokio::spawn(process_event(state, event));
            }
            "OK".into_response()
        }
        other => {
            log::debug!("ignoring event envelope type {:?}", other);
            "OK".into_response()
        }
    }
}

/// Handle one event callback: filter, extract the question, route, reply.
/// Failures here are logged and dropped — Slack already got its 200.
async fn process_event(state: RelayState, event: CallbackEvent) {
    if event.is_bot_message() {
        return;
    }
    let is_mention = event.typ == "app_mention";
    let is_direct = event.typ == "message" && event.is_direct_message();
    if !is_mention && !is_direct {
        return;
    }

    let text = event.text.as_deref().unwrap_or("");
    let question = strip_mentions(text);
    if question.is_empty() {
        log::debug!("event had no question text after stripping mentions");
        return;
    }

    let Some(channel) = event.channel.clone() else {
        log::debug!("event without channel; nowhere to reply");
        return;
    };
    let user = event.user.clone().unwrap_or_default();

    let mut request = AgentRequest::new(question, user)
        .with_context("channel", channel.clone())
        .with_context("event_type", event.typ.clone())
        .with_context("is_direct", is_direct);
    if let Some(thread_ts) = event.thread_ts.clone() {
        request = request.with_context("thread_ts", thread_ts);
    }

    let response = state.router.route(&request).await;
    if !response.success {
        log::warn!("event routing failed: {}", response.message);
    }
    if let Err(e) = state
        .slack
        .post_message(&channel, event.reply_thread_ts(), &response.message)
        .await
    {
        log::warn!("posting reply to {} failed: {}", channel, e);
    }
}

/// POST /api/slack/commands — slash command (form-encoded).
///
/// Empty text gets an ephemeral usage hint, not an error. Routing failures are
/// also delivered ephemerally so they don't pollute the channel.
async fn slack_commands(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = require_signature(&state, &headers, &body) {
        return rejection;
    }

    let command = match SlashCommand::from_form(&body) {
        Ok(c) => c,
        Err(e) => {
            log::debug!("unparseable slash command body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid command payload" })),
            )
                .into_response();
        }
    };

    let question = command.text.trim();
    if question.is_empty() {
        return Json(json!({
            "response_type": "ephemeral",
            "text": USAGE_TEXT,
        }))
        .into_response();
    }

    let request = AgentRequest::new(question, command.user_id.clone())
        .with_context("channel", command.channel_id.clone())
        .with_context("is_command", true);
    let response = state.router.route(&request).await;

    if response.success {
        let mut payload = json!({
            "response_type": "in_channel",
            "text": response.message,
        });
        if let Some(agent) = response.agent {
            payload["attachments"] = json!([{ "footer": format!("answered by {} agent", agent) }]);
        }
        Json(payload).into_response()
    } else {
        Json(json!({
            "response_type": "ephemeral",
            "text": response.message,
        }))
        .into_response()
    }
}

/// Direct ask body (POST /api/slack/ask-f8).
#[derive(Debug, serde::Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

/// POST /api/slack/ask-f8 — unsigned direct API for internal callers and the
/// CLI harness. Mirrors the router's response shape.
async fn ask_f8(State(state): State<RelayState>, Json(ask): Json<AskRequest>) -> Response {
    let question = ask
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());
    let Some(question) = question else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "Missing required field: question" })),
        )
            .into_response();
    };

    let mut request = AgentRequest::new(question, ask.user.unwrap_or_default())
        .with_context("is_direct_ask", true);
    if let Some(channel) = ask.channel {
        request = request.with_context("channel", channel);
    }

    let response = state.router.route(&request).await.ensure_timestamp();
    Json(response).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::AgentEndpointTable;
    use std::time::Duration;

    fn test_state(secret: Option<&str>) -> RelayState {
        RelayState {
            verifier: Arc::new(SignatureVerifier::new(secret.map(str::to_string))),
            router: Arc::new(AgentRouter::new(
                None,
                AgentEndpointTable::default(),
                Duration::from_secs(1),
            )),
            slack: Arc::new(SlackClient::new(None)),
            started_at: Instant::now(),
        }
    }

    #[test]
    fn missing_headers_rejected_before_verification() {
        let state = test_state(Some("secret"));
        let headers = HeaderMap::new();
        let err = require_signature(&state, &headers, b"{}").expect_err("must reject");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    fn signed_headers(signature: &str, timestamp: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig_name: axum::http::HeaderName = SIGNATURE_HEADER.parse().expect("header name");
        let ts_name: axum::http::HeaderName = TIMESTAMP_HEADER.parse().expect("header name");
        headers.insert(sig_name, signature.parse().expect("header value"));
        headers.insert(ts_name, timestamp.parse().expect("header value"));
        headers
    }

    #[test]
    fn bad_signature_rejected_unauthorized() {
        let state = test_state(Some("secret"));
        let headers = signed_headers("v0=deadbeef", "0");
        let err = require_signature(&state, &headers, b"{}").expect_err("must reject");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn valid_signature_accepted() {
        let state = test_state(Some("secret"));
        let body = br#"{"type":"url_verification","challenge":"x"}"#;
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = crate::verify::sign("secret", body, &ts);
        let headers = signed_headers(&sig, &ts);
        assert!(require_signature(&state, &headers, body).is_ok());
    }
}
