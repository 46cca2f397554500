use uuid::Uuid;

use parley_types::error::{ChatError, ChatResult};
use parley_types::models::User;

use crate::models::{UserRow, now_ms};
use crate::{Database, store_err};

impl Database {
    /// Create the directed contact edge `owner -> target`.
    ///
    /// Contact links are deliberately one-directional: adding someone does
    /// not put you in their list. Re-adding an existing contact reports
    /// `AlreadyExists`, which callers surface as an informational outcome,
    /// not a failure.
    pub fn add_contact(&self, owner_id: Uuid, target_id: Uuid) -> ChatResult<()> {
        if owner_id == target_id {
            return Err(ChatError::validation("cannot add yourself as a contact"));
        }

        self.with_conn(|conn| {
            let target_exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                    [target_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            if !target_exists {
                return Err(ChatError::NotFound("user"));
            }

            // The primary key on (owner, target) makes this race-safe:
            // concurrent adds collapse into one row and changes() tells us
            // whether this call was the one that created it.
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO contacts (owner_id, target_id, added_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![owner_id.to_string(), target_id.to_string(), now_ms()],
                )
                .map_err(store_err)?;

            if changed == 0 {
                return Err(ChatError::AlreadyExists("contact"));
            }
            Ok(())
        })
    }

    /// Resolve the owner's contact links to user records. Links whose
    /// target no longer resolves drop out of the join silently.
    pub fn list_contacts(&self, owner_id: Uuid) -> ChatResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT u.id, u.handle, u.display_name, u.avatar_url, u.password, u.created_at
                     FROM contacts c
                     JOIN users u ON u.id = c.target_id
                     WHERE c.owner_id = ?1
                     ORDER BY c.added_at, u.id",
                )
                .map_err(store_err)?;

            let rows = stmt
                .query_map([owner_id.to_string()], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        handle: row.get(1)?,
                        display_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        password: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;

            Ok(rows.iter().map(UserRow::to_user).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{seed_user, test_db};

    #[test]
    fn add_and_list() {
        let db = test_db();
        let a = seed_user(&db, "alia");
        let b = seed_user(&db, "bram");

        db.add_contact(a, b).unwrap();
        let contacts = db.list_contacts(a).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, b);

        // One-directional: b has not gained a link back to a.
        assert!(db.list_contacts(b).unwrap().is_empty());
    }

    #[test]
    fn re_add_reports_already_exists() {
        let db = test_db();
        let a = seed_user(&db, "alia");
        let b = seed_user(&db, "bram");

        db.add_contact(a, b).unwrap();
        let err = db.add_contact(a, b).unwrap_err();
        assert!(matches!(err, ChatError::AlreadyExists("contact")));

        // Still exactly one edge.
        assert_eq!(db.list_contacts(a).unwrap().len(), 1);
    }

    #[test]
    fn self_add_rejected() {
        let db = test_db();
        let a = seed_user(&db, "alia");

        let err = db.add_contact(a, a).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(db.list_contacts(a).unwrap().is_empty());
    }

    #[test]
    fn unknown_target_rejected() {
        let db = test_db();
        let a = seed_user(&db, "alia");

        let err = db.add_contact(a, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ChatError::NotFound("user")));
    }
}
