use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt, pin_mut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::error::{ChatError, ChatResult};
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{ChangeNotice, Dispatcher};
use crate::notify::NotificationGate;
use crate::sync::ViewSynchronizer;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a connection needs to serve live views.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub sync: ViewSynchronizer,
}

/// Live view tasks owned by one connection. Dropping the set aborts every
/// task, so views are torn down no matter how the connection ends —
/// leaked subscriptions mean duplicate delivery and unbounded growth.
struct SubscriptionSet {
    conversations: HashMap<Uuid, JoinHandle<()>>,
    inbox: Option<JoinHandle<()>>,
}

impl SubscriptionSet {
    fn new() -> Self {
        Self {
            conversations: HashMap::new(),
            inbox: None,
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        for (_, task) in self.conversations.drain() {
            task.abort();
        }
        if let Some(task) = self.inbox.take() {
            task.abort();
        }
    }
}

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// command loop.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, handle) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", handle, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        handle: handle.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // All events funnel through one channel into the single writer task.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Writer task: relay events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader task: parse and apply client commands.
    let ctx_recv = ctx.clone();
    let handle_recv = handle.clone();
    let events_tx_recv = events_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        let gate = Arc::new(Mutex::new(NotificationGate::new(user_id)));
        let mut subscriptions = SubscriptionSet::new();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &ctx_recv,
                            user_id,
                            cmd,
                            &events_tx_recv,
                            &gate,
                            &mut subscriptions,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            handle_recv,
                            user_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        // subscriptions dropped here (or on abort), tearing down all views
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", handle, user_id);
}

async fn handle_command(
    ctx: &GatewayContext,
    user_id: Uuid,
    cmd: GatewayCommand,
    events_tx: &mpsc::UnboundedSender<GatewayEvent>,
    gate: &Arc<Mutex<NotificationGate>>,
    subscriptions: &mut SubscriptionSet,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            // Already identified; ignore.
        }

        GatewayCommand::Subscribe { conversation_id } => {
            if subscriptions.conversations.contains_key(&conversation_id) {
                return;
            }
            if let Err(e) = authorize_subscribe(ctx.db.clone(), conversation_id, user_id).await {
                let _ = events_tx.send(GatewayEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
            let stream = ctx.sync.stream_conversation(conversation_id);
            let tx = events_tx.clone();
            let task = tokio::spawn(async move {
                pin_mut!(stream);
                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(messages) => GatewayEvent::ConversationView {
                            conversation_id,
                            messages,
                        },
                        Err(e) => GatewayEvent::Error {
                            message: e.to_string(),
                        },
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
            subscriptions.conversations.insert(conversation_id, task);
        }

        GatewayCommand::Unsubscribe { conversation_id } => {
            if let Some(task) = subscriptions.conversations.remove(&conversation_id) {
                task.abort();
            }
        }

        GatewayCommand::SubscribeInbox => {
            if subscriptions.inbox.is_some() {
                return;
            }
            let stream = ctx.sync.stream_inbox(user_id);
            let tx = events_tx.clone();
            let gate = gate.clone();
            let task = tokio::spawn(async move {
                pin_mut!(stream);
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(conversations) => {
                            let alerts = gate
                                .lock()
                                .expect("notification gate lock poisoned")
                                .observe(&conversations, Utc::now());
                            if tx.send(GatewayEvent::InboxView { conversations }).is_err() {
                                break;
                            }
                            for alert in alerts {
                                let _ = tx.send(GatewayEvent::Notify {
                                    conversation_id: alert.conversation_id,
                                    message_id: alert.message_id,
                                    sender_id: alert.sender_id,
                                    sender_name: alert.sender_name,
                                    preview: alert.preview,
                                });
                            }
                        }
                        Err(e) => {
                            if tx
                                .send(GatewayEvent::Error {
                                    message: e.to_string(),
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            });
            subscriptions.inbox = Some(task);
        }

        GatewayCommand::SetViewing { conversation_id } => {
            gate.lock()
                .expect("notification gate lock poisoned")
                .set_viewing(conversation_id);
        }

        GatewayCommand::MarkRead { conversation_id } => {
            match mark_read(ctx.db.clone(), conversation_id, user_id).await {
                Ok((updated, row)) => {
                    if updated > 0 {
                        ctx.dispatcher.publish(ChangeNotice::for_conversation(&row));
                    }
                }
                Err(e) => {
                    let _ = events_tx.send(GatewayEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Membership gate for view subscriptions. Conversations the user is not
/// part of read as not-found, same as the REST surface.
async fn authorize_subscribe(
    db: Arc<Database>,
    conversation_id: Uuid,
    user_id: Uuid,
) -> ChatResult<()> {
    tokio::task::spawn_blocking(move || {
        db.get_conversation(conversation_id)?
            .filter(|row| row.has_participant(user_id))
            .map(|_| ())
            .ok_or(ChatError::NotFound("conversation"))
    })
    .await
    .map_err(ChatError::storage)?
}

async fn mark_read(
    db: Arc<Database>,
    conversation_id: Uuid,
    reader_id: Uuid,
) -> ChatResult<(usize, parley_db::models::ConversationRow)> {
    tokio::task::spawn_blocking(move || {
        let row = db
            .get_conversation(conversation_id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        if !row.has_participant(reader_id) {
            return Err(ChatError::Forbidden);
        }
        let updated = db.mark_read(conversation_id, reader_id)?;
        Ok((updated, row))
    })
    .await
    .map_err(ChatError::storage)?
}

/// Cut a log sample at or below `max` bytes without splitting a character.
fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text)
        else {
            warn!("Expected Identify command, got something else");
            return None;
        };

        let token_data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;

        return Some((token_data.claims.sub, token_data.claims.handle));
    }

    None
}
