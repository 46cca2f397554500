//! The notification gate sits on the inbox stream and decides, per
//! delivered summary, whether an out-of-band alert should fire. The stream
//! re-delivers full state on every change, so the gate's job is mostly
//! suppression: the same message key must never alert twice.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use parley_types::api::ConversationSummary;

/// Messages older than this at observation time never alert. Without the
/// window, the first inbox delivery after connect would alert on the entire
/// backlog of unread history.
const GRACE_WINDOW_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub preview: String,
}

pub struct NotificationGate {
    user_id: Uuid,
    viewing: Option<Uuid>,
    grace: Duration,
    /// Last alerted (or deliberately suppressed) message per conversation.
    seen: HashMap<Uuid, Uuid>,
}

impl NotificationGate {
    pub fn new(user_id: Uuid) -> Self {
        Self::with_grace(user_id, Duration::seconds(GRACE_WINDOW_SECS))
    }

    pub fn with_grace(user_id: Uuid, grace: Duration) -> Self {
        Self {
            user_id,
            viewing: None,
            grace,
            seen: HashMap::new(),
        }
    }

    /// Record which conversation is on the user's screen; its messages
    /// never alert while it stays there.
    pub fn set_viewing(&mut self, conversation_id: Option<Uuid>) {
        self.viewing = conversation_id;
    }

    /// Feed one full-state inbox delivery through the gate. Returns the
    /// alerts to fire, at most one per conversation, each message key at
    /// most once ever.
    pub fn observe(&mut self, summaries: &[ConversationSummary], now: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for summary in summaries {
            let Some(last) = &summary.last_message else {
                continue;
            };
            if last.sender_id == self.user_id || last.is_read {
                continue;
            }
            if self.seen.get(&summary.id) == Some(&last.message_id) {
                continue;
            }
            // A new key: decide once and remember the decision either way.
            self.seen.insert(summary.id, last.message_id);

            if self.viewing == Some(summary.id) {
                continue;
            }
            if now.signed_duration_since(last.timestamp) > self.grace {
                continue;
            }

            alerts.push(Alert {
                conversation_id: summary.id,
                message_id: last.message_id,
                sender_id: last.sender_id,
                sender_name: summary.other.display_name.clone(),
                preview: last.text.clone(),
            });
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use parley_types::models::{LastMessage, Participant};

    use super::*;

    fn summary(
        conversation_id: Uuid,
        sender_id: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
        is_read: bool,
    ) -> ConversationSummary {
        ConversationSummary {
            id: conversation_id,
            other: Participant {
                id: sender_id,
                display_name: "Bram".into(),
                avatar_url: String::new(),
            },
            created_at: at,
            last_message: Some(LastMessage {
                message_id,
                text: "hi".into(),
                sender_id,
                timestamp: at,
                is_read,
            }),
        }
    }

    #[test]
    fn same_message_alerts_exactly_once_under_redelivery() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let msg = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        let view = [summary(conv, other, msg, now, false)];
        assert_eq!(gate.observe(&view, now).len(), 1);
        assert!(gate.observe(&view, now).is_empty());
        assert!(gate.observe(&view, now).is_empty());
    }

    #[test]
    fn a_new_message_key_re_arms_the_gate() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        let first = Uuid::new_v4();
        assert_eq!(
            gate.observe(&[summary(conv, other, first, now, false)], now).len(),
            1
        );

        let second = Uuid::new_v4();
        let alerts = gate.observe(&[summary(conv, other, second, now, false)], now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message_id, second);
    }

    #[test]
    fn own_messages_never_alert() {
        let me = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        let view = [summary(conv, me, Uuid::new_v4(), now, false)];
        assert!(gate.observe(&view, now).is_empty());
    }

    #[test]
    fn read_messages_never_alert() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        let view = [summary(conv, other, Uuid::new_v4(), now, true)];
        assert!(gate.observe(&view, now).is_empty());
    }

    #[test]
    fn viewed_conversation_is_silent_and_stays_silent() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let msg = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        gate.set_viewing(Some(conv));
        let view = [summary(conv, other, msg, now, false)];
        assert!(gate.observe(&view, now).is_empty());

        // Navigating away must not retroactively alert the message that
        // arrived while the conversation was on screen.
        gate.set_viewing(None);
        assert!(gate.observe(&view, now).is_empty());
    }

    #[test]
    fn history_older_than_grace_window_is_suppressed() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        // Simulates first delivery after connect: the unread backlog is
        // minutes old and must not produce a notification storm.
        let stale = now - Duration::minutes(5);
        let view = [summary(conv, other, Uuid::new_v4(), stale, false)];
        assert!(gate.observe(&view, now).is_empty());

        // A fresh message afterwards still alerts.
        let alerts = gate.observe(&[summary(conv, other, Uuid::new_v4(), now, false)], now);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn alerts_are_per_conversation() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();
        let mut gate = NotificationGate::new(me);

        let view = [
            summary(Uuid::new_v4(), other, Uuid::new_v4(), now, false),
            summary(Uuid::new_v4(), other, Uuid::new_v4(), now, false),
        ];
        assert_eq!(gate.observe(&view, now).len(), 2);
        assert!(gate.observe(&view, now).is_empty());
    }
}
