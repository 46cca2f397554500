//! Live view streams. On every change notice the full current ordered view
//! is re-queried and re-delivered — never a diff. Consumers replace their
//! state wholesale, which eliminates merge bugs at the cost of bandwidth,
//! and makes lagged receivers self-healing: the next yield is always the
//! complete current state.

use std::sync::Arc;

use async_stream::stream;
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{ConversationSummary, MessageView};
use parley_types::error::{ChatError, ChatResult};

use crate::dispatcher::Dispatcher;

#[derive(Clone)]
pub struct ViewSynchronizer {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ViewSynchronizer {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Full ordered message log of one conversation: replayed immediately
    /// on subscription, then re-delivered on every relevant change.
    ///
    /// A failing re-query yields one `Err` and keeps the stream alive; the
    /// error is not repeated until the query has recovered and failed
    /// again. The stream ends only when dropped by the consumer.
    pub fn stream_conversation(
        &self,
        conversation_id: Uuid,
    ) -> impl Stream<Item = ChatResult<Vec<MessageView>>> + Send + 'static {
        let db = self.db.clone();
        let mut rx = self.dispatcher.subscribe();

        stream! {
            let mut failing = false;
            if let Some(item) = debounce_errors(load_messages(db.clone(), conversation_id).await, &mut failing) {
                yield item;
            }

            loop {
                match rx.recv().await {
                    Ok(notice) if notice.conversation_id == conversation_id => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        // Dropped notices don't matter: the re-query below
                        // returns the current state regardless.
                        warn!("conversation stream lagged by {} notices", n);
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Some(item) = debounce_errors(load_messages(db.clone(), conversation_id).await, &mut failing) {
                    yield item;
                }
            }
        }
    }

    /// Full inbox of one user, ordered by recent activity: replayed on
    /// subscription, re-delivered whenever any of the user's conversations
    /// changes. Same error policy as `stream_conversation`.
    pub fn stream_inbox(
        &self,
        user_id: Uuid,
    ) -> impl Stream<Item = ChatResult<Vec<ConversationSummary>>> + Send + 'static {
        let db = self.db.clone();
        let mut rx = self.dispatcher.subscribe();

        stream! {
            let mut failing = false;
            if let Some(item) = debounce_errors(load_inbox(db.clone(), user_id).await, &mut failing) {
                yield item;
            }

            loop {
                match rx.recv().await {
                    Ok(notice) if notice.involves(user_id) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("inbox stream lagged by {} notices", n);
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Some(item) = debounce_errors(load_inbox(db.clone(), user_id).await, &mut failing) {
                    yield item;
                }
            }
        }
    }
}

/// Pass `Ok` views through; pass an `Err` only on the healthy-to-failing
/// transition so a broken backend is reported once, not per notice.
fn debounce_errors<T>(result: ChatResult<T>, failing: &mut bool) -> Option<ChatResult<T>> {
    match result {
        Ok(view) => {
            *failing = false;
            Some(Ok(view))
        }
        Err(e) if !*failing => {
            *failing = true;
            Some(Err(e))
        }
        Err(_) => None,
    }
}

async fn load_messages(db: Arc<Database>, conversation_id: Uuid) -> ChatResult<Vec<MessageView>> {
    tokio::task::spawn_blocking(move || db.list_messages(conversation_id))
        .await
        .map_err(ChatError::storage)?
}

async fn load_inbox(db: Arc<Database>, user_id: Uuid) -> ChatResult<Vec<ConversationSummary>> {
    tokio::task::spawn_blocking(move || db.list_conversations_for_user(user_id))
        .await
        .map_err(ChatError::storage)?
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, pin_mut};
    use uuid::Uuid;

    use parley_db::Database;

    use super::*;
    use crate::dispatcher::ChangeNotice;

    fn seed(db: &Database, handle: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, handle, handle, "", "hash").unwrap();
        id
    }

    struct Fixture {
        db: Arc<Database>,
        dispatcher: Dispatcher,
        sync: ViewSynchronizer,
        a: Uuid,
        b: Uuid,
        conv: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let a = seed(&db, "alia");
        let b = seed(&db, "bram");
        let (conv, _) = db.find_or_create_conversation(a, b).unwrap();
        let db = Arc::new(db);
        let dispatcher = Dispatcher::new();
        let sync = ViewSynchronizer::new(db.clone(), dispatcher.clone());
        Fixture {
            db,
            dispatcher,
            sync,
            a,
            b,
            conv,
        }
    }

    fn notice(f: &Fixture) -> ChangeNotice {
        ChangeNotice {
            conversation_id: f.conv,
            participants: [f.a, f.b],
        }
    }

    #[tokio::test]
    async fn replays_current_log_then_tails() {
        let f = fixture();
        f.db.append_message(f.conv, f.a, "first", false).unwrap();

        let stream = f.sync.stream_conversation(f.conv);
        pin_mut!(stream);

        // Fresh subscription replays the full current set before tailing.
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].text, "first");

        f.db.append_message(f.conv, f.b, "second", false).unwrap();
        f.dispatcher.publish(notice(&f));

        // Re-delivery carries the complete view, not just the new message.
        let updated = stream.next().await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].text, "second");
    }

    #[tokio::test]
    async fn unrelated_changes_do_not_wake_the_stream() {
        let f = fixture();
        let c = seed(&f.db, "cato");
        let (other_conv, _) = f.db.find_or_create_conversation(f.a, c).unwrap();

        let stream = f.sync.stream_conversation(f.conv);
        pin_mut!(stream);
        stream.next().await.unwrap().unwrap();

        f.dispatcher.publish(ChangeNotice {
            conversation_id: other_conv,
            participants: [f.a, c],
        });
        f.db.append_message(f.conv, f.a, "wake", false).unwrap();
        f.dispatcher.publish(notice(&f));

        // The next delivery is for our conversation's change only.
        let view = stream.next().await.unwrap().unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].text, "wake");
    }

    #[tokio::test]
    async fn simultaneous_observers_get_the_same_sequence() {
        let f = fixture();

        let s1 = f.sync.stream_conversation(f.conv);
        let s2 = f.sync.stream_conversation(f.conv);
        pin_mut!(s1);
        pin_mut!(s2);
        s1.next().await.unwrap().unwrap();
        s2.next().await.unwrap().unwrap();

        f.db.append_message(f.conv, f.a, "fan-out", false).unwrap();
        f.dispatcher.publish(notice(&f));

        let v1 = s1.next().await.unwrap().unwrap();
        let v2 = s2.next().await.unwrap().unwrap();
        assert_eq!(
            v1.iter().map(|m| m.id).collect::<Vec<_>>(),
            v2.iter().map(|m| m.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn inbox_redelivers_summaries_on_change() {
        let f = fixture();

        let stream = f.sync.stream_inbox(f.a);
        pin_mut!(stream);

        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);
        assert!(initial[0].last_message.is_none());

        f.db.append_message(f.conv, f.b, "ping", false).unwrap();
        f.dispatcher.publish(notice(&f));

        let updated = stream.next().await.unwrap().unwrap();
        let last = updated[0].last_message.as_ref().unwrap();
        assert_eq!(last.text, "ping");
        assert_eq!(last.sender_id, f.b);
        assert!(!last.is_read);
    }

    #[test]
    fn error_reported_once_until_recovery() {
        let mut failing = false;

        let first: Option<ChatResult<()>> =
            debounce_errors(Err(ChatError::storage("down")), &mut failing);
        assert!(matches!(first, Some(Err(_))));

        let repeat: Option<ChatResult<()>> =
            debounce_errors(Err(ChatError::storage("down")), &mut failing);
        assert!(repeat.is_none());

        let recovered = debounce_errors(Ok(()), &mut failing);
        assert!(matches!(recovered, Some(Ok(()))));

        // A fresh failure after recovery is reported again.
        let again: Option<ChatResult<()>> =
            debounce_errors(Err(ChatError::storage("down")), &mut failing);
        assert!(matches!(again, Some(Err(_))));
    }
}
