//! WebSocket connection lifecycle.
//!
//! On upgrade: create the session and send the `session` frame. Three tasks
//! per connection: the read loop (this function), a single writer that owns
//! the sink and drains a bounded outbound frame channel (the gateway's
//! per-session send buffer), and a worker that executes queued messages
//! strictly serially. Keeping the read loop free of turn execution is what
//! lets a client disconnect fire the cancellation token while a turn is
//! still streaming.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use frame::{ClientFrame, ClientMessage, ErrorFrame, ServerFrame};
use quill::Session;

use crate::app::Gateway;
use crate::commands;
use crate::turn;

pub(crate) type Outbound = mpsc::Sender<ServerFrame>;

/// Admitted messages queued for the serial worker.
const WORKER_QUEUE: usize = 16;

async fn send_error(outbound: &Outbound, kind: &str, message: impl Into<String>) {
    let _ = outbound
        .send(ServerFrame::Error(ErrorFrame {
            kind: kind.to_string(),
            message: message.into(),
        }))
        .await;
}

pub(crate) async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, principal: String) {
    let (mut sink, mut stream) = socket.split();
    let session = gateway.backend.sessions.create();

    // Single writer: everything the client sees flows through this bounded
    // channel. An awaited send on a full buffer pauses the producer, which
    // transitively pauses the LLM stream.
    let (outbound, mut outbound_rx) =
        mpsc::channel::<ServerFrame>(gateway.backend.settings.session_buffer);
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = outbound
        .send(ServerFrame::Session {
            session_id: session.id.clone(),
        })
        .await;

    // Serial worker: strict FIFO within the session, while the read loop
    // stays responsive to the close.
    let (work_tx, mut work_rx) = mpsc::channel::<(Arc<Session>, ClientMessage)>(WORKER_QUEUE);
    let worker = {
        let gateway = gateway.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            while let Some((target, msg)) = work_rx.recv().await {
                if target.cancel.is_cancelled() {
                    continue;
                }
                let _admission = target.admission.lock().await;
                handle_message(&gateway, &target, &outbound, msg).await;
            }
        })
    };

    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(m) => m,
            Err(e) => {
                debug!(session = %session.id, error = %e, "read error, closing");
                break;
            }
        };
        let text = match &message {
            Message::Text(t) => t.clone(),
            Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                send_error(&outbound, "invalid_input", format!("frame parse: {e}")).await;
                continue;
            }
        };
        match parsed {
            ClientFrame::Ping { id, .. } => {
                let _ = outbound.send(ServerFrame::Pong { id }).await;
            }
            ClientFrame::Message(msg) => {
                if !gateway.admit(&principal) {
                    send_error(&outbound, "not_permitted", "rate limit exceeded").await;
                    continue;
                }
                let target = resolve_session(&gateway, &session, msg.session_id.as_deref());
                let Some(target) = target else {
                    send_error(&outbound, "invalid_input", "unknown session_id").await;
                    continue;
                };
                if work_tx.send((target, msg)).await.is_err() {
                    break;
                }
            }
        }
    }

    // Channel closed: fire the token; in-flight work unwinds cooperatively.
    gateway.backend.sessions.close(&session.id).await;
    drop(work_tx);
    let _ = worker.await;
    drop(outbound);
    let _ = writer.await;
    debug!(session = %session.id, "connection closed");
}

/// A client may address an existing session (reattach after reconnect);
/// otherwise the connection's own session is used.
fn resolve_session(
    gateway: &Gateway,
    own: &Arc<Session>,
    requested: Option<&str>,
) -> Option<Arc<Session>> {
    match requested {
        None => Some(own.clone()),
        Some(id) if id == own.id => Some(own.clone()),
        Some(id) => gateway.backend.sessions.get(id),
    }
}

async fn handle_message(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    outbound: &Outbound,
    msg: ClientMessage,
) {
    let trimmed = msg.content.trim();
    if trimmed.starts_with('/') {
        commands::dispatch(gateway, session, outbound, trimmed).await;
        return;
    }

    // Attachments become additional prompt context, byte-capped per upload
    // and sliced to the configured code-point budget.
    let mut prompt = msg.content.clone();
    if let Some(attachments) = &msg.attachments {
        let settings = &gateway.backend.settings;
        for attachment in attachments {
            if attachment.content.len() > settings.attachment_byte_cap {
                send_error(
                    outbound,
                    "invalid_input",
                    format!("attachment {} exceeds the upload cap", attachment.name),
                )
                .await;
                return;
            }
            let slice: String = attachment
                .content
                .chars()
                .take(settings.attachment_prompt_slice)
                .collect();
            prompt.push_str(&format!("\n\n--- attachment: {}\n{}", attachment.name, slice));
        }
    }

    if let Err(e) = turn::run_chat_turn(gateway, session, outbound, &msg.content, &prompt).await {
        warn!(session = %session.id, error = %e, "turn failed");
        send_error(outbound, e.kind(), e.sanitized_message()).await;
    }
}
