pub mod auth;
pub mod contacts;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod translate;
pub mod users;

use parley_types::error::{ChatError, ChatResult};

use crate::error::ApiError;

/// Run a blocking database closure off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(ChatError::storage(e)))?
        .map_err(ApiError)
}
