//! Per-socket tasks: a reader feeding the broker and a writer draining the
//! socket's outbound channel.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::error::ProtocolError;
use crate::protocol::ServerFrame;

/// Drive one WebSocket until the client leaves or the broker shuts down.
///
/// Frames from this socket are handled strictly in arrival order.
pub async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut shutdown = broker.subscribe_shutdown();

    let mut conn_id = broker.connect(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode {} frame: {}", frame.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if !broker.is_shut_down() {
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        conn_id = broker.handle_text(&conn_id, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        broker.reject(&conn_id, ProtocolError::Malformed).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong is answered by the transport.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    // Dropping the connection's sender lets the writer finish and close.
    broker.disconnect(&conn_id).await;
    if let Err(e) = writer.await {
        tracing::debug!("Writer task for {} ended abnormally: {}", conn_id, e);
    }
}
