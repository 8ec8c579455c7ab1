use crate::api::AppState;
use crate::api::extract::ApiQuery;
use crate::api::schemas::messages::{
    DeleteResponse, ListParams, MessageListResponse, MessagePayload, MessageResponse, RevisionParams,
};
use crate::error::{AppError, Result};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

/// Stores an encrypted message for its recipient.
///
/// # Errors
/// Returns `AppError::BadRequest` if the body is not a message.
/// Returns `AppError::Conflict` if the id exists and the revision is stale.
pub async fn store_message(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse> {
    let payload: MessagePayload =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid message format: {e}")))?;

    let stored = state.message_service.store_message(payload.into()).await?;

    Ok((StatusCode::CREATED, Json(MessageResponse::from(stored))))
}

/// Lists the live messages waiting for a user.
///
/// # Errors
/// Returns `AppError::BadRequest` if the query string is invalid.
/// Returns `AppError::Store` if the store query fails.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<MessageListResponse>> {
    let messages = state.message_service.list_messages(&user_id, params.since).await?;
    Ok(Json(messages.into()))
}

/// Deletes a message, at the given revision when `rev` is supplied.
///
/// # Errors
/// Returns `AppError::NotFound` if the message does not exist.
/// Returns `AppError::Conflict` if the revision is stale.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<RevisionParams>,
) -> Result<Json<DeleteResponse>> {
    state.message_service.delete_message(&id, params.rev).await?;
    Ok(Json(DeleteResponse { message: "Message deleted".to_string() }))
}

/// Marks a message as delivered.
///
/// # Errors
/// Returns `AppError::NotFound` if the message does not exist.
/// Returns `AppError::Conflict` if the revision is stale.
pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<RevisionParams>,
) -> Result<Json<MessageResponse>> {
    let updated = state.message_service.mark_delivered(&id, params.rev).await?;
    Ok(Json(updated.into()))
}
