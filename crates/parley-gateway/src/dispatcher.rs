use tokio::sync::broadcast;
use uuid::Uuid;

use parley_db::models::ConversationRow;

/// A change notice: something in this conversation mutated (append, read,
/// delete, reaction). Carries no payload — subscribers re-query and
/// re-deliver the full current view, which is what makes redelivery and
/// lagged receivers harmless.
#[derive(Debug, Clone, Copy)]
pub struct ChangeNotice {
    pub conversation_id: Uuid,
    pub participants: [Uuid; 2],
}

impl ChangeNotice {
    pub fn for_conversation(row: &ConversationRow) -> Self {
        Self {
            conversation_id: row.conversation_id(),
            participants: row.participant_ids(),
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }
}

/// Fan-out hub between mutations and live views. Every successful mutation
/// publishes one notice; every live stream holds one receiver.
#[derive(Clone)]
pub struct Dispatcher {
    tx: broadcast::Sender<ChangeNotice>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, notice: ChangeNotice) {
        let _ = self.tx.send(notice);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(conversation_id: Uuid, a: Uuid, b: Uuid) -> ChangeNotice {
        ChangeNotice {
            conversation_id,
            participants: [a, b],
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_notice() {
        let dispatcher = Dispatcher::new();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();

        let conv = Uuid::new_v4();
        dispatcher.publish(notice(conv, Uuid::new_v4(), Uuid::new_v4()));

        assert_eq!(rx1.recv().await.unwrap().conversation_id, conv);
        assert_eq!(rx2.recv().await.unwrap().conversation_id, conv);
    }

    #[test]
    fn involves_matches_participants_only() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let n = notice(Uuid::new_v4(), a, b);
        assert!(n.involves(a));
        assert!(n.involves(b));
        assert!(!n.involves(Uuid::new_v4()));
    }
}
