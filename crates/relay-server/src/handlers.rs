use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn, Instrument};

use relay_core::mode::CompletionMode;
use relay_engine::completion::CompletionRequest;
use relay_engine::session::{AttemptOutcome, SessionCoordinator};
use relay_telemetry::log_excerpt;

use crate::wechat::{self, InboundMessage};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// State shared by every handler.
pub struct HandlerState {
    pub coordinator: SessionCoordinator,
    /// Token configured in the official-account console. Without it every
    /// verification request is refused.
    pub wx_token: Option<SecretString>,
    /// Timeout for the `/test` entry point.
    pub adhoc_timeout: Duration,
}

impl HandlerState {
    pub fn new(coordinator: SessionCoordinator, wx_token: Option<SecretString>) -> Self {
        Self {
            coordinator,
            wx_token,
            adhoc_timeout: Duration::from_secs(30),
        }
    }
}

pub type SharedState = Arc<HandlerState>;

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub echostr: String,
}

/// `GET /wx`: the platform checks that we hold the shared token.
pub async fn verify(State(state): State<SharedState>, Query(params): Query<VerifyParams>) -> Response {
    let valid = state.wx_token.as_ref().is_some_and(|token| {
        wechat::check_signature(
            &params.signature,
            &params.timestamp,
            &params.nonce,
            token.expose_secret(),
        )
    });

    if valid {
        params.echostr.into_response()
    } else {
        warn!(
            timestamp = %params.timestamp,
            token_configured = state.wx_token.is_some(),
            "wechat verification failed"
        );
        StatusCode::FORBIDDEN.into_response()
    }
}

/// `POST /wx`: one delivery attempt of a pushed message.
pub async fn receive(State(state): State<SharedState>, body: String) -> Response {
    let msg = match InboundMessage::parse(&body) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, body = %log_excerpt(&body), "unparsable wechat message");
            return wechat::ACK.into_response();
        }
    };

    let Some((id, content)) = msg.text() else {
        info!(msg_type = %msg.msg_type, "ignoring non-text message");
        return wechat::ACK.into_response();
    };

    let deadline = state.coordinator.config().attempt_deadline;
    let span = tracing::info_span!(
        "wx_attempt",
        attempt_id = %uuid::Uuid::now_v7(),
        message_id = %id,
    );
    let outcome = state
        .coordinator
        .attempt(id, content, deadline)
        .instrument(span)
        .await;

    match outcome {
        AttemptOutcome::Delivered(text) => {
            match wechat::text_reply(&msg, &text, chrono::Utc::now().timestamp()) {
                Ok(reply) => ([(header::CONTENT_TYPE, XML_CONTENT_TYPE)], reply).into_response(),
                Err(e) => {
                    warn!(error = %e, "failed to encode wechat reply");
                    wechat::ACK.into_response()
                }
            }
        }
        // Stay silent; the platform redelivers and the retry joins the session.
        AttemptOutcome::NoAnswerYet => StatusCode::OK.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdhocParams {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// `GET /test?msg=...&mode=full`: the completion engine alone, no session.
pub async fn adhoc(State(state): State<SharedState>, Query(params): Query<AdhocParams>) -> String {
    let mode = match params.mode.as_deref() {
        Some("full") => CompletionMode::Thorough,
        _ => CompletionMode::Fast,
    };
    info!(%mode, msg = %log_excerpt(&params.msg), "adhoc completion");
    state
        .coordinator
        .engine()
        .complete(CompletionRequest::new(params.msg, mode, state.adhoc_timeout))
        .await
        .into_text()
}

/// `GET /health`
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let engine = state.coordinator.engine();
    Json(serde_json::json!({
        "status": "healthy",
        "backend": engine.backend_name(),
        "model": engine.model(),
        "backend_status": engine.backend_status(),
        "live_sessions": state.coordinator.live_sessions(),
        "cache_entries": engine.cache().len(),
        "stats": engine.stats().snapshot(),
    }))
}
