//! Gateway state and router.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Router,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

use gh::{JobStore, PullRequestApi};
use quill::{Backend, FixLoopConfig};

use crate::connection::handle_socket;
use crate::http::{
    health_handler, job_handler, metrics_handler, operator_handler, webhook_handler,
};

pub struct Gateway {
    pub backend: Arc<Backend>,
    pub jobs: Arc<JobStore>,
    /// Absent when no GitHub token is configured; webhook jobs then fail at
    /// the posting step with a clear reason.
    pub pr_api: Option<Arc<dyn PullRequestApi>>,
    pub fix_config: FixLoopConfig,
    rate: DefaultKeyedRateLimiter<String>,
    prometheus: Option<PrometheusHandle>,
}

impl Gateway {
    pub fn new(
        backend: Arc<Backend>,
        pr_api: Option<Arc<dyn PullRequestApi>>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let jobs = Arc::new(JobStore::new(
            &backend.settings.data_root,
            backend.settings.webhook_idempotency_window,
        )?);
        let per_hour = NonZeroU32::new(backend.settings.rate_limit_per_hour.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let rate = RateLimiter::keyed(Quota::per_hour(per_hour));
        // One recorder per process; a second gateway (tests) shares it and
        // simply has no exposition handle.
        let prometheus = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "prometheus recorder already installed");
                None
            }
        };
        Ok(Arc::new(Self {
            backend: backend.clone(),
            jobs,
            pr_api,
            fix_config: FixLoopConfig {
                max_iterations: backend.settings.fix_loop_cap,
                ..Default::default()
            },
            rate,
            prometheus,
        }))
    }

    /// Token-bucket check per principal; a rejection is counted.
    pub fn admit(&self, principal: &str) -> bool {
        let admitted = self.rate.check_key(&principal.to_string()).is_ok();
        if !admitted {
            metrics::counter!("quill_rate_limit_rejected_total").increment(1);
        }
        admitted
    }

    pub fn render_metrics(&self) -> String {
        self.prometheus
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Bearer token when present, else the catch-all anonymous principal.
pub(crate) fn principal_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    let principal = principal_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, principal))
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/webhooks/:provider", post(webhook_handler))
        .route("/commands/:tool", post(operator_handler))
        .route("/jobs/:delivery", get(job_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(gateway)
}
