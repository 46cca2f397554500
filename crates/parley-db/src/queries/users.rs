use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::error::{ChatError, ChatResult};

use crate::models::{UserRow, now_ms};
use crate::{Database, store_err};

impl Database {
    pub fn create_user(
        &self,
        id: Uuid,
        handle: &str,
        display_name: &str,
        avatar_url: &str,
        password_hash: &str,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, handle, display_name, avatar_url, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    handle,
                    display_name,
                    avatar_url,
                    password_hash,
                    now_ms()
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ChatError::AlreadyExists("handle")
                }
                other => store_err(other),
            })?;
            Ok(())
        })
    }

    pub fn get_user_by_handle(&self, handle: &str) -> ChatResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "handle = ?1", handle))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> ChatResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &id.to_string()))
    }

    /// Partial profile update; absent fields keep their current value.
    pub fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET
                         display_name = COALESCE(?2, display_name),
                         avatar_url   = COALESCE(?3, avatar_url)
                     WHERE id = ?1",
                    rusqlite::params![id.to_string(), display_name, avatar_url],
                )
                .map_err(store_err)?;

            if changed == 0 {
                return Err(ChatError::NotFound("user"));
            }
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, filter: &str, param: &str) -> ChatResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, handle, display_name, avatar_url, password, created_at
         FROM users WHERE {filter}"
    );
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;

    stmt.query_row([param], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            handle: row.get(1)?,
            display_name: row.get(2)?,
            avatar_url: row.get(3)?,
            password: row.get(4)?,
            created_at: row.get(5)?,
        })
    })
    .optional()
    .map_err(store_err)
}
