//! `/ws/session`: pushes the detection snapshot and toasts to the dashboard.

use crate::api::rest::AppState;
use crate::detection::SessionSnapshot;
use crate::messaging::Notification;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Messages sent to dashboard clients
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FeedMessage {
    Snapshot(SessionSnapshot),
    Notification(Notification),
}

impl FeedMessage {
    fn into_ws(self) -> Option<Message> {
        match serde_json::to_string(&self) {
            Ok(json) => Some(Message::Text(json)),
            Err(e) => {
                error!("Failed to serialize feed message: {}", e);
                None
            }
        }
    }
}

// Handle WebSocket connection upgrade
pub async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(32);

    // Pongs go through the same queue as feed messages
    let pong_tx = tx.clone();
    let receiver_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Ping(ping) => {
                    if pong_tx.send(Message::Pong(ping)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => {
                    debug!("Dashboard client closed the session feed");
                    break;
                }
                Message::Text(_) | Message::Binary(_) => {
                    warn!("Ignoring message from dashboard client");
                }
                Message::Pong(_) => {}
            }
        }
    });

    let mut snapshots = state.detection.subscribe();
    let mut notifications = state.notifier.subscribe();
    let feed_task = tokio::spawn(async move {
        let first = snapshots.borrow_and_update().clone();
        let Some(msg) = FeedMessage::Snapshot(first).into_ws() else {
            return;
        };
        if tx.send(msg).await.is_err() {
            return;
        }

        loop {
            let next = tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    FeedMessage::Snapshot(snapshot)
                }
                received = notifications.recv() => match received {
                    Ok(notification) => FeedMessage::Notification(notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session feed dropped {} notifications", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let Some(msg) = next.into_ws() else {
                continue;
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                debug!("Failed to push to dashboard client: {}", e);
                break;
            }
        }
    });

    let tasks = FeedTasks {
        receiver: receiver_task,
        sender: sender_task,
        feed: feed_task,
    };
    tasks.run_until_first_exit().await;

    info!("Session feed connection closed");
}

/// The three halves of one feed connection
struct FeedTasks {
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
    feed: JoinHandle<()>,
}

impl FeedTasks {
    /// Wait for the client to leave or the feed to end, then stop the rest
    async fn run_until_first_exit(mut self) {
        tokio::select! {
            _ = &mut self.receiver => debug!("Receiver task completed"),
            _ = &mut self.sender => debug!("Sender task completed"),
        }
        self.receiver.abort();
        self.sender.abort();
        self.feed.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineMode;
    use crate::messaging::EventType;
    use std::time::Duration;

    #[test]
    fn snapshots_are_tagged_with_type_and_data() {
        let msg = FeedMessage::Snapshot(SessionSnapshot::idle(PipelineMode::ServerPush));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["data"]["connectionStatus"], "disconnected");
        assert_eq!(value["data"]["accidentDetected"], false);
    }

    #[test]
    fn notifications_carry_their_toast() {
        let msg = FeedMessage::Notification(
            Notification::new(EventType::MediaError, "Video error", "decoder missing").destructive(),
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["title"], "Video error");
        assert_eq!(value["data"]["variant"], "destructive");
    }

    #[tokio::test]
    async fn finished_sender_stops_the_other_tasks() {
        // Each oneshot sender is dropped only when its task is torn down
        let (receiver_alive, receiver_gone) = tokio::sync::oneshot::channel::<()>();
        let (feed_alive, feed_gone) = tokio::sync::oneshot::channel::<()>();

        let tasks = FeedTasks {
            receiver: tokio::spawn(async move {
                let _alive = receiver_alive;
                std::future::pending::<()>().await;
            }),
            sender: tokio::spawn(async {}),
            feed: tokio::spawn(async move {
                let _alive = feed_alive;
                std::future::pending::<()>().await;
            }),
        };
        tokio::time::timeout(Duration::from_secs(5), tasks.run_until_first_exit())
            .await
            .unwrap();

        let receiver = tokio::time::timeout(Duration::from_secs(5), receiver_gone).await;
        assert!(matches!(receiver, Ok(Err(_))));
        let feed = tokio::time::timeout(Duration::from_secs(5), feed_gone).await;
        assert!(matches!(feed, Ok(Err(_))));
    }
}
