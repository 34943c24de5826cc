//! The WebSocket session multiplexer.
//!
//! One task pair per connection: the read loop parses inbound `{type,
//! data}` frames and forwards them to the owning room actor in arrival
//! order; the send task drains the per-connection outbound channel back to
//! the socket, preserving the order the room produced.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use berrypoker::room::{ConnectionId, RoomEvent, RoomHandle};
use berrypoker::{ClientMessage, ServerMessage};

use super::AppState;

/// Outbound buffer per connection. A room suspends on a full buffer, so
/// this bounds how far a slow client can lag the authoritative state.
const OUTBOUND_BUFFER: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

static CONNECTIONS_OPEN: AtomicU64 = AtomicU64::new(0);

/// `GET /ws/{room_id}` - upgrade to the bidirectional game channel.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

async fn handle_socket(socket: WebSocket, room_id: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let Some(room) = state.registry.get_room(&room_id).await else {
        let _ = sink
            .send(envelope(&ServerMessage::error("Room not found")))
            .await;
        let _ = sink.close().await;
        return;
    };

    let conn_id: ConnectionId = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let open = CONNECTIONS_OPEN.fetch_add(1, Ordering::Relaxed) + 1;
    crate::metrics::websocket_connections_total();
    crate::metrics::websocket_connections_active(open);
    info!("ws connected: room={room_id} conn={conn_id}");

    let (tx, rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    if room
        .send(RoomEvent::Attach {
            conn_id,
            sender: tx.clone(),
        })
        .await
        .is_err()
    {
        let _ = sink
            .send(envelope(&ServerMessage::error("Room is closed")))
            .await;
        let _ = sink.close().await;
        CONNECTIONS_OPEN.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let send_task = tokio::spawn(pump_outbound(rx, sink));
    read_inbound(&mut stream, &room, conn_id, &tx).await;

    // Cancel anything still queued for this connection and detach.
    let _ = room.send(RoomEvent::Detach { conn_id }).await;
    send_task.abort();
    let open = CONNECTIONS_OPEN.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    crate::metrics::websocket_connections_active(open);
    info!("ws disconnected: room={room_id} conn={conn_id}");
}

fn envelope(message: &ServerMessage) -> Message {
    Message::Text(
        serde_json::to_string(message)
            .unwrap_or_else(|_| r#"{"type":"error","data":{"message":"serialization"}}"#.into())
            .into(),
    )
}

async fn pump_outbound(
    mut rx: mpsc::Receiver<ServerMessage>,
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
) {
    while let Some(message) = rx.recv().await {
        if sink.send(envelope(&message)).await.is_err() {
            break;
        }
    }
}

async fn read_inbound(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
    room: &RoomHandle,
    conn_id: ConnectionId,
    tx: &mpsc::Sender<ServerMessage>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                crate::metrics::websocket_messages_received();
                match ClientMessage::parse(&text) {
                    Ok(message) => {
                        if room
                            .send(RoomEvent::Client { conn_id, message })
                            .await
                            .is_err()
                        {
                            let _ = tx.send(ServerMessage::error("Room is closed")).await;
                            break;
                        }
                    }
                    // Protocol errors keep the connection; the sender just
                    // hears about the bad frame.
                    Err(err) => {
                        let _ = tx.send(ServerMessage::error(err.to_string())).await;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!("ws read error on conn {conn_id}: {err}");
                break;
            }
        }
    }
    warn_if_backlogged(tx, conn_id);
}

fn warn_if_backlogged(tx: &mpsc::Sender<ServerMessage>, conn_id: ConnectionId) {
    if tx.capacity() == 0 {
        warn!("conn {conn_id} closed with a full outbound buffer");
    }
}
