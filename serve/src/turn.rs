//! One chat turn: start frame, retrieval-enriched role run with streamed
//! chunks, end frame, memory write-back.

use std::sync::Arc;

use tokio::sync::mpsc;

use frame::ServerFrame;
use quill::{
    record_completed_turn, run_single_role, Result, RoleKind, RoleProfile, Session,
    ToolCallContext,
};

use crate::app::Gateway;
use crate::connection::Outbound;

/// Runs one turn to completion. `content` is the user's message as typed
/// (recorded to memory); `prompt` additionally carries attachment slices.
pub(crate) async fn run_chat_turn(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    outbound: &Outbound,
    content: &str,
    prompt: &str,
) -> Result<()> {
    let backend = &gateway.backend;
    let _ = outbound
        .send(ServerFrame::Start {
            session_id: session.id.clone(),
        })
        .await;

    let input = backend.context.build(session, prompt).await;
    let tool_ctx = ToolCallContext::new(
        backend.settings.workspace_root.clone(),
        backend.sensitive.clone(),
        session.id.clone(),
    )
    .with_cancel(session.cancel.clone())
    .with_deadline(backend.settings.tool_deadline);

    // Per-turn chunk adapter: forward role chunks into the outbound channel,
    // then await the forwarder so `end` can never overtake a chunk.
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(backend.settings.session_buffer);
    let forwarder = {
        let outbound = outbound.clone();
        tokio::spawn(async move {
            while let Some(content) = chunk_rx.recv().await {
                if outbound.send(ServerFrame::Chunk { content }).await.is_err() {
                    break;
                }
            }
        })
    };

    let profile = RoleProfile::for_kind(RoleKind::Developer);
    let task_id = format!("{}-chat", session.id);
    let result = run_single_role(
        &backend.roles,
        &profile,
        input,
        Some(chunk_tx),
        &tool_ctx,
        &session.cancel,
        &backend.pipeline_config,
        &task_id,
    )
    .await;
    let _ = forwarder.await;

    let report = result?;

    let user_index = session.next_turn_index();
    let assistant_index = session.next_turn_index();
    record_completed_turn(
        session,
        &backend.memory,
        content,
        &report.content,
        user_index,
        assistant_index,
    )
    .await?;

    let _ = outbound
        .send(ServerFrame::End {
            session_id: session.id.clone(),
            turn_index: assistant_index,
        })
        .await;
    Ok(())
}
