use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::api::ConversationSummary;
use parley_types::error::{ChatError, ChatResult};
use parley_types::models::Participant;

use crate::models::{ConversationRow, ms_to_dt, now_ms, parse_id};
use crate::{Database, store_err};

/// Participant pairs are stored in sorted order so the pair key is
/// independent of who initiated the conversation.
fn canonical_pair(a: Uuid, b: Uuid) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b { (a, b) } else { (b, a) }
}

impl Database {
    /// Resolve the unordered pair to its single conversation, creating it
    /// lazily. Returns `(id, created)`. The UNIQUE constraint on the sorted
    /// pair plus the re-select below make concurrent callers converge on
    /// one winner's id.
    pub fn find_or_create_conversation(&self, a: Uuid, b: Uuid) -> ChatResult<(Uuid, bool)> {
        if a == b {
            return Err(ChatError::validation(
                "a conversation needs two distinct participants",
            ));
        }
        let (lo, hi) = canonical_pair(a, b);

        self.with_conn(|conn| {
            if let Some(existing) = select_pair(conn, &lo, &hi)? {
                return Ok((existing, false));
            }

            for user in [&lo, &hi] {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                        [user],
                        |row| row.get(0),
                    )
                    .map_err(store_err)?;
                if !exists {
                    return Err(ChatError::NotFound("user"));
                }
            }

            let id = Uuid::new_v4();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO conversations
                         (id, participant_lo, participant_hi, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id.to_string(), lo, hi, now_ms()],
                )
                .map_err(store_err)?;

            if inserted == 1 {
                return Ok((id, true));
            }

            // Lost the create race: converge on the winner's row.
            select_pair(conn, &lo, &hi)?
                .map(|id| (id, false))
                .ok_or(ChatError::NotFound("conversation"))
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> ChatResult<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{CONVERSATION_COLUMNS} WHERE id = ?1"))
                .map_err(store_err)?;
            stmt.query_row([id.to_string()], conversation_from_row)
                .optional()
                .map_err(store_err)
        })
    }

    /// All conversations the user participates in, annotated with the other
    /// participant's display info (single join) and the cached last
    /// message. Sorted by most recent activity, newest first; ties broken
    /// by conversation id so the order is stable.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> ChatResult<Vec<ConversationSummary>> {
        let uid = user_id.to_string();

        let mut summaries = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.participant_lo, c.participant_hi, c.created_at,
                            c.last_message_id, c.last_message_text,
                            c.last_message_sender, c.last_message_at, c.last_message_read,
                            u.id, u.display_name, u.avatar_url
                     FROM conversations c
                     JOIN users u ON u.id = CASE
                         WHEN c.participant_lo = ?1 THEN c.participant_hi
                         ELSE c.participant_lo
                     END
                     WHERE ?1 IN (c.participant_lo, c.participant_hi)",
                )
                .map_err(store_err)?;

            let rows = stmt
                .query_map([&uid], |row| {
                    let conversation = conversation_from_row(row)?;
                    let other_id: String = row.get(9)?;
                    let display_name: String = row.get(10)?;
                    let avatar_url: String = row.get(11)?;
                    Ok((conversation, other_id, display_name, avatar_url))
                })
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;

            Ok(rows
                .into_iter()
                .map(|(conversation, other_id, display_name, avatar_url)| ConversationSummary {
                    id: parse_id(&conversation.id),
                    other: Participant {
                        id: parse_id(&other_id),
                        display_name,
                        avatar_url,
                    },
                    created_at: ms_to_dt(conversation.created_at),
                    last_message: conversation.last_message(),
                })
                .collect::<Vec<_>>())
        })?;

        // Ordering is applied here rather than in SQL so it only depends on
        // the single-column index and stays identical for every reader.
        summaries.sort_by(|a, b| {
            b.activity_at()
                .cmp(&a.activity_at())
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(summaries)
    }
}

const CONVERSATION_COLUMNS: &str = "SELECT id, participant_lo, participant_hi, created_at,
        last_message_id, last_message_text, last_message_sender,
        last_message_at, last_message_read
 FROM conversations";

pub(crate) fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_lo: row.get(1)?,
        participant_hi: row.get(2)?,
        created_at: row.get(3)?,
        last_message_id: row.get(4)?,
        last_message_text: row.get(5)?,
        last_message_sender: row.get(6)?,
        last_message_at: row.get(7)?,
        last_message_read: row.get(8)?,
    })
}

pub(crate) fn select_pair(conn: &Connection, lo: &str, hi: &str) -> ChatResult<Option<Uuid>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE participant_lo = ?1 AND participant_hi = ?2",
        [lo, hi],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(store_err)
    .map(|opt| opt.map(|id| parse_id(&id)))
}
