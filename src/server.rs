//! HTTP ingestion endpoint — records inbound turns and kicks off the pipeline.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, info};

use crate::model::TurnOrigin;
use crate::pipeline::{InboundTurn, Orchestrator};
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with the ingestion routes.
pub fn routes(db: Arc<dyn Database>, orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { db, orchestrator };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/conversations/{id}/turns", post(ingest_turn))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Ingestion ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IngestRequest {
    text: String,
    /// Sent from our side of the conversation (an operator or the system).
    #[serde(default)]
    from_me: bool,
}

async fn ingest_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IngestRequest>,
) -> impl IntoResponse {
    let Ok(conversation_id) = id.parse::<i64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid conversation ID"})),
        );
    };
    if body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Text is required"})),
        );
    }

    match state.db.get_conversation(conversation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "Conversation not found"})),
            );
        }
        Err(e) => {
            error!(conversation_id, error = %e, "Conversation lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Storage unavailable"})),
            );
        }
    }

    let origin = if body.from_me {
        TurnOrigin::Automated
    } else {
        TurnOrigin::Customer
    };
    let turn = match state.db.append_turn(conversation_id, &body.text, origin).await {
        Ok(turn) => turn,
        Err(e) => {
            error!(conversation_id, error = %e, "Failed to record inbound turn");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Storage unavailable"})),
            );
        }
    };

    info!(conversation_id, origin = origin.as_str(), "Inbound turn recorded");
    if origin == TurnOrigin::Customer {
        state.orchestrator.dispatch(InboundTurn {
            conversation_id,
            text: body.text,
            origin,
        });
    }

    (StatusCode::ACCEPTED, Json(serde_json::json!(turn)))
}
