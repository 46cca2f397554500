use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::api::{MessageView, ReactionGroup};
use parley_types::error::{ChatError, ChatResult};
use parley_types::models::DELETED_PLACEHOLDER;

use crate::models::{MessageRow, ReactionRow, now_ms, parse_id};
use crate::{Database, store_err};

impl Database {
    /// Append a message and refresh the conversation's cached last-message
    /// snapshot in one transaction: no reader ever sees one without the
    /// other. The timestamp is server-assigned and clamped to the newest
    /// message already in the log, so in-conversation order is
    /// non-decreasing even if the wall clock steps backwards.
    pub fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        text: &str,
        forwarded: bool,
    ) -> ChatResult<MessageView> {
        self.with_conn(|conn| append_tx(conn, conversation_id, sender_id, text, forwarded))
    }

    /// Copy a message's text into another conversation with the forwarded
    /// marker set. The caller must be able to read the source conversation
    /// and the source must still be readable (not deleted).
    pub fn forward_message(
        &self,
        message_id: Uuid,
        to_conversation: Uuid,
        sender_id: Uuid,
    ) -> ChatResult<MessageView> {
        self.with_conn(|conn| {
            let source =
                select_message(conn, message_id)?.ok_or(ChatError::NotFound("message"))?;
            // A message the caller cannot read is indistinguishable from a
            // missing one.
            if !can_read(conn, &source.conversation_id, sender_id)? {
                return Err(ChatError::NotFound("message"));
            }
            if source.is_deleted {
                return Err(ChatError::validation("cannot forward a deleted message"));
            }
            append_tx(conn, to_conversation, sender_id, &source.text, true)
        })
    }

    /// Full ordered history of a conversation, oldest first, reactions
    /// grouped per message. Order key is (timestamp, insertion order).
    pub fn list_messages(&self, conversation_id: Uuid) -> ChatResult<Vec<MessageView>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, sender_id, text, created_at,
                            is_read, is_deleted, is_forwarded
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at, rowid",
                )
                .map_err(store_err)?;

            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;

            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut reactions = reactions_for_messages(conn, &ids)?;

            Ok(rows
                .iter()
                .map(|row| row.to_view(reactions.remove(&row.id).unwrap_or_default()))
                .collect())
        })
    }

    /// Flip the read flag on messages authored by the other participant,
    /// and on the cached last message when it came from the other side.
    /// Idempotent; returns how many messages changed.
    pub fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> ChatResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(store_err)?;

            let changed = tx
                .execute(
                    "UPDATE messages SET is_read = 1
                     WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                    rusqlite::params![conversation_id.to_string(), reader_id.to_string()],
                )
                .map_err(store_err)?;

            tx.execute(
                "UPDATE conversations SET last_message_read = 1
                 WHERE id = ?1
                   AND last_message_sender IS NOT NULL
                   AND last_message_sender != ?2",
                rusqlite::params![conversation_id.to_string(), reader_id.to_string()],
            )
            .map_err(store_err)?;

            tx.commit().map_err(store_err)?;
            Ok(changed)
        })
    }

    /// Redact a message. Sender-only, one-way; the row keeps its id and
    /// position. Repeating the call is a no-op.
    pub fn soft_delete_message(&self, message_id: Uuid, caller_id: Uuid) -> ChatResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(store_err)?;

            let row = select_message(&tx, message_id)?.ok_or(ChatError::NotFound("message"))?;
            if row.sender_id != caller_id.to_string() {
                return Err(ChatError::Forbidden);
            }
            if row.is_deleted {
                return Ok(());
            }

            tx.execute(
                "UPDATE messages SET text = ?2, is_deleted = 1 WHERE id = ?1",
                rusqlite::params![message_id.to_string(), DELETED_PLACEHOLDER],
            )
            .map_err(store_err)?;

            // Keep the inbox preview in step with the redaction.
            tx.execute(
                "UPDATE conversations SET last_message_text = ?2
                 WHERE id = ?1 AND last_message_id = ?3",
                rusqlite::params![
                    row.conversation_id,
                    DELETED_PLACEHOLDER,
                    message_id.to_string()
                ],
            )
            .map_err(store_err)?;

            tx.commit().map_err(store_err)?;
            Ok(())
        })
    }

    /// Toggle `user_id`'s membership in the per-emoji reactor set: insert
    /// if absent, remove if present. Runs as delete-or-insert against the
    /// (message, user, emoji) key on the serialized connection, never
    /// read-then-overwrite of an aggregate. Returns true when added.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> ChatResult<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(store_err)?;

            let row = select_message(&tx, message_id)?.ok_or(ChatError::NotFound("message"))?;
            if !can_read(&tx, &row.conversation_id, user_id)? {
                return Err(ChatError::NotFound("message"));
            }
            if row.is_deleted {
                return Err(ChatError::validation("cannot react to a deleted message"));
            }

            let removed = tx
                .execute(
                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id.to_string(), user_id.to_string(), emoji],
                )
                .map_err(store_err)?;

            let added = if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        now_ms()
                    ],
                )
                .map_err(store_err)?;
                true
            } else {
                false
            };

            tx.commit().map_err(store_err)?;
            Ok(added)
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> ChatResult<Option<MessageRow>> {
        self.with_conn(|conn| select_message(conn, message_id))
    }
}

fn append_tx(
    conn: &mut Connection,
    conversation_id: Uuid,
    sender_id: Uuid,
    text: &str,
    forwarded: bool,
) -> ChatResult<MessageView> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::validation("message text is empty"));
    }

    let tx = conn.transaction().map_err(store_err)?;

    let cid = conversation_id.to_string();
    let sid = sender_id.to_string();

    let participants: Option<(String, String)> = tx
        .query_row(
            "SELECT participant_lo, participant_hi FROM conversations WHERE id = ?1",
            [&cid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(store_err)?;
    let (lo, hi) = participants.ok_or(ChatError::NotFound("conversation"))?;
    if sid != lo && sid != hi {
        return Err(ChatError::Forbidden);
    }

    // Clamp to the newest existing timestamp in this conversation.
    let newest: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(created_at), 0) FROM messages WHERE conversation_id = ?1",
            [&cid],
            |row| row.get(0),
        )
        .map_err(store_err)?;
    let created_at = now_ms().max(newest);

    let message_id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO messages
             (id, conversation_id, sender_id, text, created_at, is_read, is_deleted, is_forwarded)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
        rusqlite::params![message_id.to_string(), cid, sid, text, created_at, forwarded],
    )
    .map_err(store_err)?;

    tx.execute(
        "UPDATE conversations SET
             last_message_id = ?2,
             last_message_text = ?3,
             last_message_sender = ?4,
             last_message_at = ?5,
             last_message_read = 0
         WHERE id = ?1",
        rusqlite::params![cid, message_id.to_string(), text, sid, created_at],
    )
    .map_err(store_err)?;

    tx.commit().map_err(store_err)?;

    Ok(MessageRow {
        id: message_id.to_string(),
        conversation_id: cid,
        sender_id: sid,
        text: text.to_string(),
        created_at,
        is_read: false,
        is_deleted: false,
        is_forwarded: forwarded,
    }
    .to_view(vec![]))
}

/// Whether `user_id` is a participant of the conversation. A missing
/// conversation reads as false.
fn can_read(conn: &Connection, conversation_id: &str, user_id: Uuid) -> ChatResult<bool> {
    let pair: Option<(String, String)> = conn
        .query_row(
            "SELECT participant_lo, participant_hi FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(store_err)?;
    let uid = user_id.to_string();
    Ok(pair.is_some_and(|(lo, hi)| lo == uid || hi == uid))
}

fn select_message(conn: &Connection, message_id: Uuid) -> ChatResult<Option<MessageRow>> {
    conn.query_row(
        "SELECT id, conversation_id, sender_id, text, created_at,
                is_read, is_deleted, is_forwarded
         FROM messages WHERE id = ?1",
        [message_id.to_string()],
        message_from_row,
    )
    .optional()
    .map_err(store_err)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
        is_read: row.get(5)?,
        is_deleted: row.get(6)?,
        is_forwarded: row.get(7)?,
    })
}

/// Batch-fetch reactions and group them emoji -> reactor ids per message.
fn reactions_for_messages(
    conn: &Connection,
    message_ids: &[String],
) -> ChatResult<HashMap<String, Vec<ReactionGroup>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions
         WHERE message_id IN ({})
         ORDER BY created_at, rowid",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })
        .map_err(store_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err)?;

    let mut grouped: HashMap<String, Vec<ReactionGroup>> = HashMap::new();
    for r in rows {
        let groups = grouped.entry(r.message_id).or_default();
        let uid = parse_id(&r.user_id);
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.user_ids.push(uid);
                group.count += 1;
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji,
                count: 1,
                user_ids: vec![uid],
            }),
        }
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{seed_user, test_db};

    fn setup() -> (Database, Uuid, Uuid, Uuid) {
        let db = test_db();
        let a = seed_user(&db, "alia");
        let b = seed_user(&db, "bram");
        let (conv, _) = db.find_or_create_conversation(a, b).unwrap();
        (db, a, b, conv)
    }

    #[test]
    fn append_updates_summary_atomically() {
        let (db, a, _, conv) = setup();

        let sent = db.append_message(conv, a, "hello", false).unwrap();

        let row = db.get_conversation(conv).unwrap().unwrap();
        let last = row.last_message().unwrap();
        assert_eq!(last.message_id, sent.id);
        assert_eq!(last.text, "hello");
        assert_eq!(last.sender_id, a);
        assert!(!last.is_read);
    }

    #[test]
    fn empty_text_rejected() {
        let (db, a, _, conv) = setup();
        for text in ["", "   ", "\n\t"] {
            assert!(matches!(
                db.append_message(conv, a, text, false),
                Err(ChatError::Validation(_))
            ));
        }
        assert!(db.list_messages(conv).unwrap().is_empty());
    }

    #[test]
    fn text_is_trimmed() {
        let (db, a, _, conv) = setup();
        let sent = db.append_message(conv, a, "  hi  ", false).unwrap();
        assert_eq!(sent.text, "hi");
    }

    #[test]
    fn non_participant_sender_rejected() {
        let (db, _, _, conv) = setup();
        let outsider = seed_user(&db, "outsider");
        assert!(matches!(
            db.append_message(conv, outsider, "hi", false),
            Err(ChatError::Forbidden)
        ));
    }

    #[test]
    fn ordering_is_non_decreasing_and_stable() {
        let (db, a, b, conv) = setup();
        for i in 0..10 {
            let sender = if i % 2 == 0 { a } else { b };
            db.append_message(conv, sender, &format!("m{i}"), false)
                .unwrap();
        }

        let first = db.list_messages(conv).unwrap();
        assert!(first.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        let texts: Vec<_> = first.iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, (0..10).map(|i| format!("m{i}")).collect::<Vec<_>>());

        // A fresh read replays the identical ordered set.
        let second = db.list_messages(conv).unwrap();
        assert_eq!(
            first.iter().map(|m| m.id).collect::<Vec<_>>(),
            second.iter().map(|m| m.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn mark_read_flips_only_the_other_sides_messages() {
        let (db, a, b, conv) = setup();
        db.append_message(conv, a, "from a", false).unwrap();
        db.append_message(conv, b, "from b", false).unwrap();

        let changed = db.mark_read(conv, a).unwrap();
        assert_eq!(changed, 1);

        let messages = db.list_messages(conv).unwrap();
        let from_a = messages.iter().find(|m| m.sender_id == a).unwrap();
        let from_b = messages.iter().find(|m| m.sender_id == b).unwrap();
        assert!(!from_a.is_read);
        assert!(from_b.is_read);

        // Cached summary follows: last message is from b, now read.
        let row = db.get_conversation(conv).unwrap().unwrap();
        assert!(row.last_message().unwrap().is_read);

        // Idempotent.
        assert_eq!(db.mark_read(conv, a).unwrap(), 0);
    }

    #[test]
    fn mark_read_leaves_own_last_message_unread_flag_alone() {
        let (db, a, _, conv) = setup();
        db.append_message(conv, a, "latest is mine", false).unwrap();

        db.mark_read(conv, a).unwrap();
        let row = db.get_conversation(conv).unwrap().unwrap();
        assert!(!row.last_message().unwrap().is_read);
    }

    #[test]
    fn soft_delete_redacts_and_freezes() {
        let (db, a, b, conv) = setup();
        let sent = db.append_message(conv, a, "secret", false).unwrap();

        db.soft_delete_message(sent.id, a).unwrap();

        let messages = db.list_messages(conv).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, DELETED_PLACEHOLDER);
        assert!(messages[0].is_deleted);
        assert_eq!(messages[0].id, sent.id);

        // Inbox preview redacted too.
        let row = db.get_conversation(conv).unwrap().unwrap();
        assert_eq!(row.last_message().unwrap().text, DELETED_PLACEHOLDER);

        // Further mutation is rejected or a no-op.
        assert!(matches!(
            db.toggle_reaction(sent.id, b, "👍"),
            Err(ChatError::Validation(_))
        ));
        db.soft_delete_message(sent.id, a).unwrap();
        assert_eq!(db.list_messages(conv).unwrap()[0].text, DELETED_PLACEHOLDER);
    }

    #[test]
    fn soft_delete_is_sender_only() {
        let (db, a, b, conv) = setup();
        let sent = db.append_message(conv, a, "mine", false).unwrap();

        assert!(matches!(
            db.soft_delete_message(sent.id, b),
            Err(ChatError::Forbidden)
        ));
        assert_eq!(db.list_messages(conv).unwrap()[0].text, "mine");
    }

    #[test]
    fn reaction_toggle_parity() {
        let (db, a, b, conv) = setup();
        let sent = db.append_message(conv, a, "react to me", false).unwrap();

        assert!(db.toggle_reaction(sent.id, b, "👍").unwrap());
        assert!(!db.toggle_reaction(sent.id, b, "👍").unwrap());
        let views = db.list_messages(conv).unwrap();
        assert!(views[0].reactions.is_empty());

        // Odd number of toggles leaves the reactor present.
        assert!(db.toggle_reaction(sent.id, b, "👍").unwrap());
        let views = db.list_messages(conv).unwrap();
        assert_eq!(views[0].reactions.len(), 1);
        assert_eq!(views[0].reactions[0].emoji, "👍");
        assert_eq!(views[0].reactions[0].user_ids, vec![b]);
    }

    #[test]
    fn reactions_group_per_emoji() {
        let (db, a, b, conv) = setup();
        let sent = db.append_message(conv, a, "popular", false).unwrap();

        db.toggle_reaction(sent.id, a, "❤️").unwrap();
        db.toggle_reaction(sent.id, b, "❤️").unwrap();
        db.toggle_reaction(sent.id, b, "😂").unwrap();

        let views = db.list_messages(conv).unwrap();
        let hearts = views[0]
            .reactions
            .iter()
            .find(|g| g.emoji == "❤️")
            .unwrap();
        assert_eq!(hearts.count, 2);
        assert_eq!(hearts.user_ids, vec![a, b]);
        let laughs = views[0]
            .reactions
            .iter()
            .find(|g| g.emoji == "😂")
            .unwrap();
        assert_eq!(laughs.count, 1);
    }

    #[test]
    fn forward_copies_text_with_marker() {
        let (db, a, b, conv) = setup();
        let c = seed_user(&db, "cato");
        let (other_conv, _) = db.find_or_create_conversation(a, c).unwrap();

        let original = db.append_message(conv, b, "pass it on", false).unwrap();
        let copy = db.forward_message(original.id, other_conv, a).unwrap();

        assert_eq!(copy.text, "pass it on");
        assert!(copy.is_forwarded);
        assert_eq!(copy.conversation_id, other_conv);
        assert_eq!(copy.sender_id, a);

        // Source untouched.
        let source = db.list_messages(conv).unwrap();
        assert!(!source[0].is_forwarded);
    }

    #[test]
    fn forward_requires_reading_the_source_conversation() {
        let (db, a, b, conv) = setup();
        let eve = seed_user(&db, "eve");
        let (eves_conv, _) = db.find_or_create_conversation(eve, a).unwrap();

        let secret = db
            .append_message(conv, b, "between a and b", false)
            .unwrap();

        // Knowing a message id is not enough to pull it out of a
        // conversation the caller is not part of.
        assert!(matches!(
            db.forward_message(secret.id, eves_conv, eve),
            Err(ChatError::NotFound("message"))
        ));
        assert!(db.list_messages(eves_conv).unwrap().is_empty());
    }

    #[test]
    fn reactions_require_conversation_membership() {
        let (db, a, _, conv) = setup();
        let eve = seed_user(&db, "eve");
        let sent = db.append_message(conv, a, "members only", false).unwrap();

        assert!(matches!(
            db.toggle_reaction(sent.id, eve, "👍"),
            Err(ChatError::NotFound("message"))
        ));
        assert!(db.list_messages(conv).unwrap()[0].reactions.is_empty());
    }

    #[test]
    fn forward_of_deleted_message_rejected() {
        let (db, a, _, conv) = setup();
        let c = seed_user(&db, "cato");
        let (other_conv, _) = db.find_or_create_conversation(a, c).unwrap();

        let original = db.append_message(conv, a, "gone soon", false).unwrap();
        db.soft_delete_message(original.id, a).unwrap();

        assert!(matches!(
            db.forward_message(original.id, other_conv, a),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn unknown_conversation_rejected() {
        let (db, a, _, _) = setup();
        assert!(matches!(
            db.append_message(Uuid::new_v4(), a, "hi", false),
            Err(ChatError::NotFound("conversation"))
        ));
    }
}
