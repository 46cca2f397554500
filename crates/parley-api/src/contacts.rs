use axum::{Extension, Json, extract::State};
use uuid::Uuid;

use parley_types::api::{AddContactRequest, AddContactResponse, Claims};
use parley_types::contact_code;
use parley_types::error::ChatError;
use parley_types::models::User;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

/// Add a contact from either input source: manual id entry or a scanned
/// code. An existing edge is an informational outcome (`added: false`),
/// not an error.
pub async fn add_contact(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddContactRequest>,
) -> ApiResult<Json<AddContactResponse>> {
    let target_id = resolve_target(&req)?;

    let db = state.db.clone();
    let added = match run_blocking(move || db.add_contact(claims.sub, target_id)).await {
        Ok(()) => true,
        Err(ApiError(ChatError::AlreadyExists(_))) => false,
        Err(e) => return Err(e),
    };

    Ok(Json(AddContactResponse { target_id, added }))
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<User>>> {
    let db = state.db.clone();
    let contacts = run_blocking(move || db.list_contacts(claims.sub)).await?;
    Ok(Json(contacts))
}

fn resolve_target(req: &AddContactRequest) -> Result<Uuid, ApiError> {
    match (req.target_id, req.code.as_deref()) {
        (Some(id), None) => Ok(id),
        (None, Some(code)) => Ok(contact_code::decode(code)?),
        _ => Err(ApiError(ChatError::validation(
            "provide exactly one of target_id or code",
        ))),
    }
}
