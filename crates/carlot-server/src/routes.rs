//! HTTP routes for history, administrative cleanup and diagnostics.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use carlot_core::deadline::bounded;
use carlot_core::{ChatError, ChatMessage, Identity, MessageId, Page, SubjectId};

use crate::server::AppState;

/// A [`ChatError`] rendered as a JSON HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::InvalidMessage(_) | ChatError::HandshakeRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::PushFailed(_) => StatusCode::BAD_GATEWAY,
        };
        let body = json!({ "code": self.0.code(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.hub.count(),
        "leases": state.lifecycle.active_count(),
        "presence_backend": state.lifecycle.registry().backend(),
    }))
}

/// GET /conversations/{subject}/messages?limit&offset
pub async fn conversation_history(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let subject = SubjectId::from_raw(subject);
    let page = Page::new(query.limit, query.offset);
    let messages = bounded(
        state.config.store_timeout,
        "list_by_conversation",
        state.store.list_by_conversation(&subject, page),
    )
    .await?;
    Ok(Json(messages))
}

/// GET /conversations/{subject}/messages/count
pub async fn conversation_count(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subject = SubjectId::from_raw(subject);
    let count = bounded(
        state.config.store_timeout,
        "count_by_conversation",
        state.store.count_by_conversation(&subject),
    )
    .await?;
    Ok(Json(json!({ "subject": subject, "count": count })))
}

/// GET /messages/{id}
pub async fn message_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = MessageId::from_raw(id);
    let found = bounded(state.config.store_timeout, "get", state.store.get(&id)).await?;
    Ok(match found {
        Some(message) => Json(message).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "not_found", "message": format!("no message {id}") })),
        )
            .into_response(),
    })
}

/// DELETE /conversations/{subject}/participants/{identity}/messages
///
/// Called when a sale tied to the conversation is cancelled.
pub async fn delete_participant_messages(
    State(state): State<AppState>,
    Path((subject, participant)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subject = SubjectId::from_raw(subject);
    let participant = Identity::from_raw(participant);
    let deleted = bounded(
        state.config.store_timeout,
        "delete_by_conversation_and_participant",
        state
            .store
            .delete_by_conversation_and_participant(&subject, &participant),
    )
    .await?;
    info!(subject = %subject, participant = %participant, deleted, "conversation messages deleted");
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /presence/{identity}
pub async fn presence(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity = Identity::from_raw(identity);
    let handle = bounded(
        state.config.store_timeout,
        "resolve",
        state.lifecycle.registry().resolve(&identity),
    )
    .await?;
    Ok(Json(json!({ "identity": identity, "online": handle.is_some() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let resp = ApiError(ChatError::StoreUnavailable("down".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = ApiError(ChatError::InvalidMessage("bad".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
