//! WebSocket transport
//!
//! Each socket is split in two. A writer task drains the connection's
//! outbound queue into text frames; the read half is adapted to
//! [`MessageStream`] and handed to the signaling server, which owns the
//! connection from the join handshake until departure.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use huddle_core::connection::{self, OutboundReceiver, RecvError};
use huddle_core::validation::is_valid_id;
use huddle_core::{ConnectionHandle, Message, MessageStream};

use crate::http::{AppError, AppResult, AppState};

/// Read half of a websocket as a signaling message stream
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl MessageStream for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<Message, RecvError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(Message::decode(text.as_str()).map_err(RecvError::from));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return Some(match std::str::from_utf8(&bytes) {
                        Ok(text) => Message::decode(text).map_err(RecvError::from),
                        Err(e) => Err(RecvError::Transport(format!(
                            "binary frame is not UTF-8: {e}"
                        ))),
                    });
                }
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(RecvError::Transport(e.to_string()))),
                // Ping/pong are answered by the protocol layer
                Some(Ok(_)) => {}
            }
        }
    }
}

/// `GET /ws/{room_id}`
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    if !is_valid_id(&room_id) {
        return Err(AppError::bad_request("Invalid room ID"));
    }

    let max_message_size = state.config.signaling.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id))
        .into_response())
}

/// `GET /ws` without a room
pub async fn missing_room_id() -> AppError {
    AppError::bad_request("Missing room ID")
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String) {
    info!(room = %room_id, "WebSocket connection established");

    let (connection, outbound) = connection::channel(state.config.signaling.outbound_buffer);
    let (sink, receiver) = socket.split();
    let writer = tokio::spawn(write_frames(sink, outbound, connection.clone()));

    state
        .server
        .serve_connection(&room_id, connection.clone(), WebSocketStream { receiver })
        .await;

    connection.close();
    if let Err(e) = writer.await {
        error!(room = %room_id, "WebSocket writer task failed: {e}");
    }
    info!(room = %room_id, "WebSocket connection closed");
}

async fn write_frames<S>(mut sink: S, mut outbound: OutboundReceiver, connection: ConnectionHandle)
where
    S: futures::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %message.kind(), "Failed to encode outbound message: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            debug!("WebSocket send failed: {e}");
            connection.close();
            return;
        }
    }

    if let Err(e) = sink.send(WsMessage::Close(None)).await {
        debug!("WebSocket close frame not sent: {e}");
    }
}
