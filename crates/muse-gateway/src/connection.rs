use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use muse_db::Database;
use muse_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// The server pings every 15 seconds.
/// Two pings in a row without a pong close the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket whose bearer token was validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id, username).await;
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    // Register the per-user channel first so nothing addressed to us is
    // lost between the presence snapshot and going online.
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    for (uid, _) in dispatcher.online_users().await {
        if uid == user_id {
            continue;
        }
        let event = GatewayEvent::PresenceUpdate { user_id: uid, online: true };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    dispatcher.user_online(user_id, username.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward presence broadcasts and targeted events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !event.is_global() {
                        continue;
                    }
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else {
                        // Replaced by a newer connection
                        break;
                    };
                    if !send_event(&mut sender, &event).await {
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
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, &db, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
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
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn handle_command(dispatcher: &Dispatcher, db: &Arc<Database>, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::MarkRead { sender_id } => {
            let db = db.clone();
            let reader = user_id.to_string();
            let sender = sender_id.to_string();
            let count = match tokio::task::spawn_blocking(move || db.mark_read(&reader, &sender)).await {
                Ok(Ok(count)) => count,
                Ok(Err(e)) => {
                    error!("mark_read failed for {}: {}", user_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };
            debug!("{} read {} messages from {}", user_id, count, sender_id);
            if count > 0 {
                dispatcher
                    .send_to_user(sender_id, GatewayEvent::MessagesRead { reader_id: user_id, count })
                    .await;
            }
        }

        GatewayCommand::Typing { conversation_id, is_typing } => {
            let db = db.clone();
            let cid = conversation_id.to_string();
            let conversation = match tokio::task::spawn_blocking(move || db.get_conversation(&cid)).await {
                Ok(Ok(Some(conversation))) => conversation,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    error!("get_conversation failed: {}", e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            let me = user_id.to_string();
            if !conversation.is_active || !conversation.has_participant(&me) {
                warn!("{} sent typing for foreign conversation {}", user_id, conversation_id);
                return;
            }
            let Ok(other) = conversation.other_participant(&me).parse::<Uuid>() else {
                return;
            };
            dispatcher
                .send_to_user(
                    other,
                    GatewayEvent::TypingStart {
                        conversation_id,
                        user_id,
                        is_typing,
                    },
                )
                .await;
        }
    }
}
