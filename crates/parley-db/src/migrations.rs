use rusqlite::Connection;
use tracing::info;

use parley_types::error::ChatResult;

use crate::store_err;

pub fn run(conn: &Connection) -> ChatResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            handle        TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            avatar_url    TEXT NOT NULL DEFAULT '',
            password      TEXT NOT NULL,
            created_at    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            owner_id    TEXT NOT NULL REFERENCES users(id),
            target_id   TEXT NOT NULL REFERENCES users(id),
            added_at    INTEGER NOT NULL,
            PRIMARY KEY (owner_id, target_id)
        );

        -- Participant pair is stored sorted; the UNIQUE constraint is what
        -- makes concurrent find-or-create converge on a single row.
        CREATE TABLE IF NOT EXISTS conversations (
            id                    TEXT PRIMARY KEY,
            participant_lo        TEXT NOT NULL REFERENCES users(id),
            participant_hi        TEXT NOT NULL REFERENCES users(id),
            created_at            INTEGER NOT NULL,
            last_message_id       TEXT,
            last_message_text     TEXT,
            last_message_sender   TEXT,
            last_message_at       INTEGER,
            last_message_read     INTEGER NOT NULL DEFAULT 0,
            UNIQUE (participant_lo, participant_hi)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            text             TEXT NOT NULL,
            created_at       INTEGER NOT NULL,
            is_read          INTEGER NOT NULL DEFAULT 0,
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            is_forwarded     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );
        ",
    )
    .map_err(store_err)?;

    info!("Database migrations complete");
    Ok(())
}
