use axum::http::StatusCode;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_gateway::dispatcher::ChangeNotice;
use parley_types::api::{
    Claims, ConversationSummary, OpenConversationRequest, OpenConversationResponse,
};
use parley_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

/// Resolve-or-create the conversation for (me, other). Conversations come
/// into being on first chat intent, never on contact-add.
pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> ApiResult<(StatusCode, Json<OpenConversationResponse>)> {
    let db = state.db.clone();
    let (conversation_id, created, row) = run_blocking(move || {
        let (id, created) = db.find_or_create_conversation(claims.sub, req.other_user_id)?;
        let row = db
            .get_conversation(id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        Ok((id, created, row))
    })
    .await?;

    if created {
        // A brand-new conversation shows up in both inboxes.
        state.dispatcher.publish(ChangeNotice::for_conversation(&row));
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(OpenConversationResponse {
            conversation_id,
            created,
        }),
    ))
}

/// Point-in-time inbox snapshot; the live version of this view comes from
/// the gateway.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let db = state.db.clone();
    let summaries = run_blocking(move || db.list_conversations_for_user(claims.sub)).await?;
    Ok(Json(summaries))
}

/// Single conversation header for direct navigation. An id the caller is
/// not part of reads as not-found rather than leaking its existence.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ConversationSummary>> {
    let db = state.db.clone();
    let summary = run_blocking(move || {
        let row = db
            .get_conversation(conversation_id)?
            .filter(|row| row.has_participant(claims.sub))
            .ok_or(ChatError::NotFound("conversation"))?;

        let other_id = row.other_participant_id(claims.sub);
        let other = db
            .get_user_by_id(other_id)?
            .ok_or(ChatError::NotFound("user"))?;

        Ok(ConversationSummary {
            id: row.conversation_id(),
            other: other.to_participant(),
            created_at: parley_db::models::ms_to_dt(row.created_at),
            last_message: row.last_message(),
        })
    })
    .await?;

    Ok(Json(summary))
}
