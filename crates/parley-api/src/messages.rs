use axum::http::StatusCode;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::json;
use uuid::Uuid;

use parley_db::models::ConversationRow;
use parley_gateway::dispatcher::ChangeNotice;
use parley_types::api::{
    Claims, ForwardRequest, MessageView, ReactRequest, ReactResponse, SendMessageRequest,
};
use parley_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

/// Point-in-time read of the full ordered log; the live version comes from
/// the gateway.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let db = state.db.clone();
    let messages = run_blocking(move || {
        db.get_conversation(conversation_id)?
            .filter(|row| row.has_participant(claims.sub))
            .ok_or(ChatError::NotFound("conversation"))?;
        db.list_messages(conversation_id)
    })
    .await?;

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    let db = state.db.clone();
    let (message, row) = run_blocking(move || {
        let message = db.append_message(conversation_id, claims.sub, &req.text, false)?;
        let row = db
            .get_conversation(conversation_id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        Ok((message, row))
    })
    .await?;

    state.dispatcher.publish(ChangeNotice::for_conversation(&row));

    Ok((StatusCode::CREATED, Json(message)))
}

/// Idempotent: flips the other participant's unread messages, reports how
/// many changed.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<serde_json::Value>> {
    let db = state.db.clone();
    let (updated, row) = run_blocking(move || {
        let row = db
            .get_conversation(conversation_id)?
            .filter(|row| row.has_participant(claims.sub))
            .ok_or(ChatError::NotFound("conversation"))?;
        let updated = db.mark_read(conversation_id, claims.sub)?;
        Ok((updated, row))
    })
    .await?;

    if updated > 0 {
        state.dispatcher.publish(ChangeNotice::for_conversation(&row));
    }

    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let _ = conversation_id; // authorization is sender-based, not path-based

    let db = state.db.clone();
    let row = run_blocking(move || {
        let message = db
            .get_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        db.soft_delete_message(message_id, claims.sub)?;
        load_row(&db, message.conversation_uuid())
    })
    .await?;

    state.dispatcher.publish(ChangeNotice::for_conversation(&row));

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactRequest>,
) -> ApiResult<Json<ReactResponse>> {
    let _ = conversation_id; // reaction rows carry their own message key

    let db = state.db.clone();
    let (added, row) = run_blocking(move || {
        let message = db
            .get_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        let added = db.toggle_reaction(message_id, claims.sub, &req.emoji)?;
        Ok((added, load_row(&db, message.conversation_uuid())?))
    })
    .await?;

    state.dispatcher.publish(ChangeNotice::for_conversation(&row));

    Ok(Json(ReactResponse { added }))
}

/// Copy a message into another of the caller's conversations with the
/// forwarded marker set.
pub async fn forward_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    let db = state.db.clone();
    let (message, target_row) = run_blocking(move || {
        // The caller must be able to read the source conversation.
        db.get_conversation(conversation_id)?
            .filter(|row| row.has_participant(claims.sub))
            .ok_or(ChatError::NotFound("conversation"))?;

        let message = db.forward_message(message_id, req.to_conversation_id, claims.sub)?;
        let target_row = load_row(&db, req.to_conversation_id)?;
        Ok((message, target_row))
    })
    .await?;

    state
        .dispatcher
        .publish(ChangeNotice::for_conversation(&target_row));

    Ok((StatusCode::CREATED, Json(message)))
}

fn load_row(
    db: &parley_db::Database,
    conversation_id: Uuid,
) -> Result<ConversationRow, ChatError> {
    db.get_conversation(conversation_id)?
        .ok_or(ChatError::NotFound("conversation"))
}
