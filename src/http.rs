//! Thin HTTP front door (spec §4.9a, a deliberate ambient addition — the
//! core spec treats inbound HTTP as a documented collaborator, not a
//! module of its own). `x-api-key` header auth, 4xx at the boundary for
//! malformed/oversized requests, CORS via `tower-http`.
//!
//! Grounded on `api/honeypot.py`'s route shape and auth dependency, and
//! on `indexer/src/api.rs`'s `Router`/`State` axum idiom.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::error::ForceCallbackError;
use crate::orchestrator::{HistoryEntry, IncomingRequest, Orchestrator};
use crate::types::Sender;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub api_secret_key: String,
    pub max_message_bytes: usize,
}

#[derive(Deserialize)]
pub struct MessageIn {
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryEntryIn {
    pub sender: String,
    pub text: String,
}

#[derive(Deserialize, Default)]
pub struct MetadataIn {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub message: MessageIn,
    #[serde(default, rename = "conversationHistory")]
    pub conversation_history: Vec<HistoryEntryIn>,
    #[serde(default)]
    pub metadata: Option<MetadataIn>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub status: String,
    pub reply: Option<String>,
    #[serde(rename = "scamDetected")]
    pub scam_detected: bool,
    pub confidence: f64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct CallbackTriggerResponse {
    pub status: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Serialize)]
pub struct SessionView {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub turn: u32,
    #[serde(rename = "scamDetected")]
    pub scam_detected: bool,
    pub confidence: f64,
    #[serde(rename = "callbackSent")]
    pub callback_sent: bool,
}

fn parse_sender(raw: &str) -> Sender {
    if raw.eq_ignore_ascii_case("agent") {
        Sender::Agent
    } else {
        Sender::Scammer
    }
}

fn check_api_key(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    match provided {
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse { detail: "Missing API key. Provide x-api-key header.".to_string() }),
        )),
        Some(key) if key != expected => Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse { detail: "Invalid API key.".to_string() }),
        )),
        Some(_) => Ok(()),
    }
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, Json<ErrorResponse>)> {
    check_api_key(&headers, &state.api_secret_key)?;

    if request.message.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { detail: "message.text must not be empty.".to_string() }),
        ));
    }
    if request.message.text.len() > state.max_message_bytes {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { detail: "message.text exceeds the maximum accepted length.".to_string() }),
        ));
    }

    let incoming = IncomingRequest {
        session_id: request.session_id.clone(),
        text: request.message.text,
        history: request
            .conversation_history
            .into_iter()
            .map(|h| HistoryEntry { sender: parse_sender(&h.sender), text: h.text })
            .collect(),
        persona_id: "default".to_string(),
    };

    let response = state.orchestrator.process_message(incoming).await;

    Ok(Json(AnalyzeResponse {
        session_id: response.session_id,
        status: response.status.to_string(),
        reply: response.reply,
        scam_detected: response.scam_detected,
        confidence: response.confidence,
    }))
}

async fn force_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<CallbackTriggerResponse>, (StatusCode, Json<ErrorResponse>)> {
    check_api_key(&headers, &state.api_secret_key)?;
    warn!(session_id = %session_id, "manual callback trigger requested");

    match state.orchestrator.force_callback(&session_id).await {
        Ok(_) => Ok(Json(CallbackTriggerResponse { status: "accepted", session_id })),
        Err(ForceCallbackError::UnknownSession) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { detail: "Unknown session id.".to_string() }),
        )),
        Err(ForceCallbackError::Dispatch(e)) => {
            warn!(session_id = %session_id, error = %e, "manual callback dispatch failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse { detail: "Callback dispatch failed.".to_string() }),
            ))
        }
    }
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, (StatusCode, Json<ErrorResponse>)> {
    check_api_key(&headers, &state.api_secret_key)?;
    match state.orchestrator.session_snapshot(&session_id) {
        Some(session) => Ok(Json(SessionView {
            session_id: session.session_id,
            turn: session.turn,
            scam_detected: session.is_scam,
            confidence: session.confidence,
            callback_sent: session.callback_sent,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { detail: "Unknown session id.".to_string() }),
        )),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/analyze", post(analyze))
        .route("/api/v1/callback/{session_id}", post(force_callback))
        .route("/api/v1/session/{session_id}", get(get_session))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sender_defaults_to_scammer() {
        assert_eq!(parse_sender("scammer"), Sender::Scammer);
        assert_eq!(parse_sender("Agent"), Sender::Agent);
        assert_eq!(parse_sender("whatever"), Sender::Scammer);
    }

    #[test]
    fn check_api_key_rejects_missing_header() {
        let headers = HeaderMap::new();
        let result = check_api_key(&headers, "secret");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn check_api_key_rejects_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "wrong".parse().unwrap());
        let result = check_api_key(&headers, "secret");
        assert_eq!(result.unwrap_err().0, StatusCode::FORBIDDEN);
    }

    #[test]
    fn check_api_key_accepts_matching_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(check_api_key(&headers, "secret").is_ok());
    }

    #[test]
    fn analyze_response_serializes_with_expected_field_names() {
        let resp = AnalyzeResponse {
            session_id: "S1".to_string(),
            status: "success".to_string(),
            reply: Some("hi".to_string()),
            scam_detected: true,
            confidence: 0.9,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"sessionId\":\"S1\""));
        assert!(json.contains("\"scamDetected\":true"));
    }
}
