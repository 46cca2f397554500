use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_types::api::{Claims, UpdateProfileRequest};
use parley_types::contact_code;
use parley_types::error::ChatError;
use parley_types::models::User;
use serde_json::json;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<serde_json::Value>> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        db.get_user_by_id(claims.sub)?
            .map(|row| row.to_user())
            .ok_or(ChatError::NotFound("user"))
    })
    .await?;

    // The contact code is derived, not stored; it is what the QR screen
    // renders.
    let code = contact_code::encode(user.id);
    Ok(Json(json!({ "user": user, "contact_code": code })))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    if let Some(name) = &req.display_name {
        if name.trim().is_empty() {
            return Err(ChatError::validation("display name is empty").into());
        }
    }

    let db = state.db.clone();
    let user = run_blocking(move || {
        db.update_profile(
            claims.sub,
            req.display_name.as_deref().map(str::trim),
            req.avatar_url.as_deref(),
        )?;
        db.get_user_by_id(claims.sub)?
            .map(|row| row.to_user())
            .ok_or(ChatError::NotFound("user"))
    })
    .await?;

    Ok(Json(user))
}

/// Public profile lookup, used by the add-contact flow to confirm who an
/// id belongs to.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<User>> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        db.get_user_by_id(user_id)?
            .map(|row| row.to_user())
            .ok_or(ChatError::NotFound("user"))
    })
    .await?;

    Ok(Json(user))
}
