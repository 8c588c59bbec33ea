//! `GET /jobs/:id/events`: a per-job WebSocket stream of [`ProgressEvent`]s.
//!
//! Mirrors the ping/pong keepalive loop used for the factory's own
//! WebSocket endpoint: a periodic ping, a pong deadline, and broadcast
//! forwarding combined in one `select!`.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};

use crate::progress::ProgressEvent;

use super::state::SharedState;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const PONG_TIMEOUT: Duration = Duration::from_secs(45);

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, job_id: i64) {
    let (sender, receiver) = socket.split();
    let rx = state.progress.subscribe(job_id);
    run_socket_loop(sender, receiver, rx).await;
    state.progress.teardown(job_id);
}

async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: tokio::sync::broadcast::Receiver<ProgressEvent>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                        if matches!(event, ProgressEvent::Completed { .. } | ProgressEvent::Error { .. }) {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
