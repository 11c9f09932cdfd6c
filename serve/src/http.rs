//! HTTP surface: webhook ingress, operator commands, health, metrics.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use gh::{run_job, EventKind, PipelineDeps, WebhookEvent};
use quill::{Error, ToolCallContext};

use crate::app::{principal_from_headers, Gateway};

/// `POST /webhooks/:provider`: verify, parse, enqueue, 202. The pipeline
/// runs off the hot path; provider errors never leak to the sender.
pub(crate) async fn webhook_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let backend = &gateway.backend;
    let delivery = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    let verified = backend
        .settings
        .webhook_secret
        .as_deref()
        .map(|secret| gh::verify_signature(secret, &body, signature))
        .unwrap_or(false);
    if !verified {
        let _ = backend
            .audit
            .append(&delivery, "webhook", &provider, "signature_rejected", None)
            .await;
        metrics::counter!("quill_webhook_outcome_total", "outcome" => "signature_rejected")
            .increment(1);
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad signature"})));
    }

    if !gateway.admit(&format!("webhook:{provider}")) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limited"})),
        );
    }

    let kind = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .and_then(EventKind::from_header);
    let Some(kind) = kind else {
        // Verified but uninteresting event kinds are acked and dropped.
        return (StatusCode::ACCEPTED, Json(json!({"status": "ignored"})));
    };

    let event = match WebhookEvent::parse(kind, &delivery, &body) {
        Ok(e) => e,
        Err(e) => {
            warn!(delivery, error = %e, "webhook payload rejected");
            return (
                StatusCode::ACCEPTED,
                Json(json!({"status": "ignored", "reason": "unparseable payload"})),
            );
        }
    };

    if !gateway.jobs.should_dispatch(&event.delivery_id) {
        info!(delivery = %event.delivery_id, "duplicate delivery acked");
        return (StatusCode::ACCEPTED, Json(json!({"status": "duplicate"})));
    }
    let snapshot = match gateway.jobs.enqueue(&event) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "job enqueue failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "enqueue failed"})),
            );
        }
    };
    let _ = backend
        .audit
        .append(
            &event.delivery_id,
            "webhook_job",
            &event.repo.full_name,
            "received",
            Some(event.kind.as_str().to_string()),
        )
        .await;

    // Off the hot path: the ack does not wait for the pipeline.
    let Some(pr_api) = gateway.pr_api.clone() else {
        warn!("no pull-request API configured; job parked as received");
        return (
            StatusCode::ACCEPTED,
            Json(json!({"status": "received", "delivery": event.delivery_id})),
        );
    };
    let deps = PipelineDeps {
        backend: backend.clone(),
        jobs: gateway.jobs.clone(),
        pr_api,
        fix_config: gateway.fix_config.clone(),
    };
    let delivery_id = event.delivery_id.clone();
    tokio::spawn(async move {
        let done = run_job(&deps, snapshot).await;
        info!(delivery = %done.event.delivery_id, status = done.status.as_str(), "job finished");
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "enqueued", "delivery": delivery_id})),
    )
}

fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotPermitted(_) => StatusCode::FORBIDDEN,
        Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Tool(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /commands/:tool`: direct tool invocation for operators, plus the
/// explicit full-re-index command.
pub(crate) async fn operator_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let backend = &gateway.backend;
    let principal = principal_from_headers(&headers);
    if !gateway.admit(&principal) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limited"})),
        );
    }

    let args: serde_json::Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("body parse: {e}")})),
                )
            }
        }
    };

    if tool == "reindex" {
        let cancel = tokio_util::sync::CancellationToken::new();
        return match backend.indexer.reindex(&cancel).await {
            Ok(report) => {
                let _ = backend
                    .audit
                    .append("operator", "reindex", "codebase", "ok", None)
                    .await;
                (
                    StatusCode::OK,
                    Json(json!({
                        "files_indexed": report.files_indexed,
                        "files_skipped_unchanged": report.files_skipped_unchanged,
                        "chunks_written": report.chunks_written,
                    })),
                )
            }
            Err(e) => (error_status(&e), Json(json!({"error": e.sanitized_message()}))),
        };
    }

    let ctx = ToolCallContext::new(
        backend.settings.workspace_root.clone(),
        backend.sensitive.clone(),
        "operator",
    )
    .with_deadline(backend.settings.tool_deadline);
    match backend.tools.invoke(&tool, args, &ctx).await {
        Ok(out) => (StatusCode::OK, Json(json!({"result": out.text}))),
        Err(e) => (
            error_status(&e),
            Json(json!({"error": e.sanitized_message(), "kind": e.kind()})),
        ),
    }
}

/// `GET /jobs/:delivery`: snapshot of a webhook job, so a client can
/// reattach to work that survived its session.
pub(crate) async fn job_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(delivery): Path<String>,
) -> impl IntoResponse {
    match gateway.jobs.get(&delivery) {
        Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown delivery id"})),
        ),
    }
}

/// `GET /health`: 503 once the provider chain was exhausted on its last
/// call and no fallback succeeded since.
pub(crate) async fn health_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let backend = &gateway.backend;
    if backend.chain.is_exhausted() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "reason": "llm provider chain exhausted"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "sessions": backend.sessions.len(),
        })),
    )
}

/// `GET /metrics`: Prometheus text exposition.
pub(crate) async fn metrics_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gateway.render_metrics(),
    )
}
