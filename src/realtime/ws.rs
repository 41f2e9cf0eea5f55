//! WebSocket transport.
//!
//! Every socket reads the global event channel. Sending `subscribeToPoll`
//! additionally enrolls it in that poll's group, so its events arrive once
//! per path. Frames use the same `{"event", "data"}` envelope both ways.

use axum::{
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::realtime::subscriptions::{ConnectionGuard, ConnectionId, SubscriptionManager};
use crate::startup::AppState;

/// Client-to-server message.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    SubscribeToPoll(PollRef),
    UnsubscribeFromPoll(PollRef),
    /// Clients may attach a payload such as `{"timestamp": ...}`; it is ignored.
    Heartbeat(Option<serde_json::Value>),
}

/// A poll id sent either bare or as `{"pollId": ...}`.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PollRef {
    Id(Uuid),
    Object {
        #[serde(rename = "pollId")]
        poll_id: Uuid,
    },
}

impl PollRef {
    pub fn poll_id(&self) -> Uuid {
        match self {
            PollRef::Id(id) => *id,
            PollRef::Object { poll_id } => *poll_id,
        }
    }
}

impl ClientMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Server frames that are not poll events.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: ConnectionId },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    serve_connection(sender, receiver, state).await;
}

/// Runs one client connection until either side closes it.
async fn serve_connection<S, R, E>(mut sender: S, mut receiver: R, state: AppState)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let subscriptions = state.broadcaster.subscriptions().clone();
    let (connection_id, mut outbox) = subscriptions.connect();
    let _guard = ConnectionGuard::new(connection_id, subscriptions.clone());
    let mut global_rx = state.broadcaster.subscribe_global();

    info!(connection_id = %connection_id, "websocket connected");

    let welcome = ServerMessage::Welcome { connection_id };
    if send_json(&mut sender, &welcome).await.is_err() {
        return;
    }

    let mut ping = tokio::time::interval(state.ping_interval);
    // the first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                        Ok(command) => apply_command(&subscriptions, connection_id, command),
                        Err(e) => warn!(connection_id = %connection_id, "unreadable client message: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => subscriptions.heartbeat(connection_id),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, "websocket error: {}", e);
                        break;
                    }
                }
            }

            received = global_rx.recv() => {
                match received {
                    Ok(event) => {
                        if send_json(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(connection_id = %connection_id, skipped, "global channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            Some(event) = outbox.recv() => {
                if send_json(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            _ = ping.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(connection_id = %connection_id, "websocket closed");
}

fn apply_command(subscriptions: &SubscriptionManager, id: ConnectionId, command: ClientMessage) {
    match command {
        ClientMessage::SubscribeToPoll(poll) => {
            debug!(connection_id = %id, poll_id = %poll.poll_id(), "subscribe");
            subscriptions.join(id, poll.poll_id());
        }
        ClientMessage::UnsubscribeFromPoll(poll) => {
            debug!(connection_id = %id, poll_id = %poll.poll_id(), "unsubscribe");
            subscriptions.leave(id, poll.poll_id());
        }
        ClientMessage::Heartbeat(_) => subscriptions.heartbeat(id),
    }
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to encode websocket frame: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}
