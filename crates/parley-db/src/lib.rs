pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use parley_types::error::{ChatError, ChatResult};

/// All writes to users, contacts, conversations and messages go through
/// this handle; nothing else touches the store. The single connection
/// serializes conflicting writers, and transactions cover multi-row
/// updates (message insert + summary update).
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> ChatResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_err)?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_err)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::storage(format!("DB lock poisoned: {e}")))?;
        f(&mut conn)
    }
}

pub(crate) fn store_err(e: rusqlite::Error) -> ChatError {
    ChatError::storage(e)
}

#[cfg(test)]
pub(crate) mod test_util {
    use uuid::Uuid;

    use super::Database;

    pub fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn seed_user(db: &Database, handle: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, handle, handle, "", "hash").unwrap();
        id
    }
}
