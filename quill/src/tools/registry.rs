//! Tool registry: lookup, validation, caps, deadlines, audit.
//!
//! Read-only after startup. `invoke` is the single entry point: it validates
//! arguments against the tool's schema before any side effect, takes one of
//! the process-wide permits, enforces the per-call deadline and cancellation,
//! and appends an audit line for audited capabilities and for every policy
//! rejection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::error::{Error, Result};

use super::{Tool, ToolCallContext, ToolOutput, ToolSpec};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    audit: Arc<AuditLog>,
    permits: Arc<Semaphore>,
}

/// Validates `args` against the subset of JSON Schema the tool specs use:
/// top-level object with `properties` (typed) and `required`.
fn validate_args(spec: &ToolSpec, args: &Value) -> Result<()> {
    let Some(obj) = args.as_object() else {
        return Err(Error::InvalidInput(format!(
            "{}: arguments must be an object",
            spec.name
        )));
    };
    let schema = &spec.input_schema;
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(Error::InvalidInput(format!(
                    "{}: missing required argument `{key}`",
                    spec.name
                )));
            }
        }
    }
    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(prop) = properties.get(key) else {
                return Err(Error::InvalidInput(format!(
                    "{}: unknown argument `{key}`",
                    spec.name
                )));
            };
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(Error::InvalidInput(format!(
                    "{}: argument `{key}` must be a {expected}",
                    spec.name
                )));
            }
        }
    }
    Ok(())
}

impl ToolRegistry {
    pub fn new(audit: Arc<AuditLog>, inflight_cap: usize) -> Self {
        Self {
            tools: HashMap::new(),
            audit,
            permits: Arc::new(Semaphore::new(inflight_cap.max(1))),
        }
    }

    /// Registration happens during startup only; the registry is then shared
    /// immutably.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invokes `name` with `args` under the context's deadline and token.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(name) else {
            return Err(Error::InvalidInput(format!("unknown tool: {name}")));
        };
        let capability = tool.capability();

        // Caller whitelist (a role's tool subset) before anything else; the
        // attempt is audited.
        if let Some(allowed) = &ctx.allowed_tools {
            if !allowed.iter().any(|t| t == name) {
                let e = Error::NotPermitted(format!("tool `{name}` is not in the caller's whitelist"));
                counter!("quill_tool_outcome_total", "tool" => name.to_string(), "outcome" => "not_permitted").increment(1);
                self.audit
                    .append(&ctx.actor, name, capability.as_str(), e.kind(), Some(e.to_string()))
                    .await?;
                return Err(e);
            }
        }

        if let Err(e) = validate_args(&tool.spec(), &args) {
            counter!("quill_tool_outcome_total", "tool" => name.to_string(), "outcome" => "invalid_args").increment(1);
            return Err(e);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("tool semaphore closed".to_string()))?;

        let started = Instant::now();
        let result = tokio::select! {
            r = tokio::time::timeout(ctx.deadline, tool.call(args, ctx)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout {
                    what: format!("tool {name}"),
                    elapsed_ms: ctx.deadline.as_millis() as u64,
                }),
            },
            _ = ctx.cancel.cancelled() => Err(Error::Timeout {
                what: format!("tool {name} cancelled"),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!("quill_tool_outcome_total", "tool" => name.to_string(), "outcome" => outcome.to_string()).increment(1);

        // Audit every mutating invocation with a matching outcome, and every
        // policy rejection regardless of capability.
        let rejected = matches!(result, Err(Error::NotPermitted(_)));
        if capability.is_audited() || rejected {
            let detail = match &result {
                Ok(out) => out.side_effect.clone(),
                Err(e) => Some(e.to_string()),
            };
            self.audit
                .append(&ctx.actor, name, capability.as_str(), outcome, detail)
                .await?;
        }

        match &result {
            Ok(_) => debug!(tool = name, elapsed_ms = elapsed.as_millis() as u64, "tool ok"),
            Err(e) => warn!(tool = name, error = %e, "tool failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Capability, SensitivePaths};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: Some("Echo text".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }

        fn capability(&self) -> Capability {
            Capability::ReadFs
        }

        async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput> {
            Ok(ToolOutput::text(
                args.get("text").and_then(|v| v.as_str()).unwrap_or(""),
            ))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "slow".into(),
                description: None,
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        fn capability(&self) -> Capability {
            Capability::RunCode
        }

        async fn call(&self, _args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("never"))
        }
    }

    struct DenyTool;

    #[async_trait]
    impl Tool for DenyTool {
        fn name(&self) -> &str {
            "deny"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "deny".into(),
                description: None,
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        fn capability(&self) -> Capability {
            Capability::WriteFs
        }

        async fn call(&self, _args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput> {
            Err(Error::NotPermitted("sensitive path".into()))
        }
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext::new("/tmp", Arc::new(SensitivePaths::default()), "test-session")
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new(AuditLog::sink(), 16);
        r.register(Arc::new(EchoTool));
        r.register(Arc::new(SlowTool));
        r.register(Arc::new(DenyTool));
        r
    }

    #[tokio::test]
    async fn invoke_validates_before_calling() {
        let r = registry();
        let err = r.invoke("echo", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = r
            .invoke("echo", json!({"text": 42}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = r
            .invoke("echo", json!({"text": "hi", "extra": true}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let out = r.invoke("echo", json!({"text": "hi"}), &ctx()).await.unwrap();
        assert_eq!(out.text, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_input() {
        let r = registry();
        let err = r.invoke("nope", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout() {
        let r = registry();
        let c = ctx().with_deadline(Duration::from_millis(50));
        let err = r.invoke("slow", json!({}), &c).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_unwinds_the_call() {
        let r = registry();
        let cancel = tokio_util::sync::CancellationToken::new();
        let c = ctx()
            .with_deadline(Duration::from_secs(60))
            .with_cancel(cancel.clone());
        let handle = tokio::spawn(async move { r.invoke("slow", json!({}), &c).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn policy_rejection_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::init(dir.path()).unwrap();
        let mut r = ToolRegistry::new(audit, 16);
        r.register(Arc::new(DenyTool));
        let err = r.invoke("deny", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));

        let records = AuditLog::read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "deny");
        assert_eq!(records[0].outcome, "not_permitted");
    }

    #[tokio::test]
    async fn specs_are_sorted_by_name() {
        let r = registry();
        let specs = r.specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["deny", "echo", "slow"]);
    }
}
