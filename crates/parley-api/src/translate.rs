//! On-demand translation. The service is a black box behind one HTTP
//! call; results are cached in process memory per (message, language) so a
//! message is never sent out twice. Failures are retryable and never touch
//! the stored message.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_types::api::{Claims, TranslateRequest, TranslateResponse};
use parley_types::error::{ChatError, ChatResult};

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

pub async fn translate_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TranslateRequest>,
) -> ApiResult<Json<TranslateResponse>> {
    let _ = conversation_id;

    let db = state.db.clone();
    let message = run_blocking(move || {
        let message = db
            .get_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        db.get_conversation(message.conversation_uuid())?
            .filter(|row| row.has_participant(claims.sub))
            .ok_or(ChatError::NotFound("message"))?;
        if message.is_deleted {
            return Err(ChatError::validation("cannot translate a deleted message"));
        }
        Ok(message)
    })
    .await?;

    if let Some(cached) = state.translations.get(message_id, &req.target_language) {
        return Ok(Json(TranslateResponse {
            translated_text: cached,
        }));
    }

    let translated_text = state
        .translator
        .translate(&message.text, &req.target_language)
        .await?;
    state
        .translations
        .insert(message_id, &req.target_language, translated_text.clone());

    Ok(Json(TranslateResponse { translated_text }))
}

/// HTTP client for the external translation service.
pub struct TranslationClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct ServiceRequest<'a> {
    text: &'a str,
    target_language: &'a str,
}

#[derive(Deserialize)]
struct ServiceResponse {
    translated_text: String,
}

impl TranslationClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    pub async fn translate(&self, text: &str, target_language: &str) -> ChatResult<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ServiceRequest {
                text,
                target_language,
            })
            .send()
            .await
            .map_err(ChatError::external)?
            .error_for_status()
            .map_err(ChatError::external)?;

        let body: ServiceResponse = response.json().await.map_err(ChatError::external)?;
        Ok(body.translated_text)
    }
}

/// Process-local translation cache keyed by (message id, target language).
#[derive(Default)]
pub struct TranslationCache {
    entries: RwLock<HashMap<(Uuid, String), String>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: Uuid, target_language: &str) -> Option<String> {
        self.entries
            .read()
            .ok()?
            .get(&(message_id, target_language.to_string()))
            .cloned()
    }

    pub fn insert(&self, message_id: Uuid, target_language: &str, translated: String) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((message_id, target_language.to_string()), translated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_per_message_and_language() {
        let cache = TranslationCache::new();
        let m1 = Uuid::new_v4();
        let m2 = Uuid::new_v4();

        cache.insert(m1, "English", "hello".into());
        assert_eq!(cache.get(m1, "English").as_deref(), Some("hello"));
        assert!(cache.get(m1, "French").is_none());
        assert!(cache.get(m2, "English").is_none());
    }

    #[test]
    fn later_insert_wins() {
        let cache = TranslationCache::new();
        let m = Uuid::new_v4();

        cache.insert(m, "English", "first".into());
        cache.insert(m, "English", "second".into());
        assert_eq!(cache.get(m, "English").as_deref(), Some("second"));
    }
}
