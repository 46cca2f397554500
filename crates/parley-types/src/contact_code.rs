//! Encoded identity strings carried in QR codes. A code is just a user id
//! wrapped in a recognizable prefix; parsing happens before the contact-add
//! operation is ever reached, so malformed codes never touch storage.

use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

const PREFIX: &str = "parley:u:";

/// Render a user id as a scannable contact code.
pub fn encode(user_id: Uuid) -> String {
    format!("{PREFIX}{user_id}")
}

/// Extract the user id from a scanned contact code.
pub fn decode(code: &str) -> ChatResult<Uuid> {
    let rest = code
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| ChatError::validation("not a contact code"))?;

    rest.parse()
        .map_err(|_| ChatError::validation("malformed contact code"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let id = Uuid::new_v4();
        assert_eq!(decode(&encode(id)).unwrap(), id);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let id = Uuid::new_v4();
        assert_eq!(decode(&format!("  {}\n", encode(id))).unwrap(), id);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(matches!(
            decode("other:u:4fe0c50e-5b9a-4b53-a274-50ff3d54392c"),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn rejects_bad_uuid() {
        assert!(matches!(
            decode("parley:u:not-a-uuid"),
            Err(ChatError::Validation(_))
        ));
    }
}
