//! Outbound HTTP tool with a host deny list and byte caps.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::{Capability, Tool, ToolCallContext, ToolOutput, ToolSpec};

pub const TOOL_HTTP_REQUEST: &str = "http_request";

pub struct HttpRequestTool {
    client: reqwest::Client,
    deny_hosts: Vec<String>,
    byte_cap: usize,
}

impl HttpRequestTool {
    pub fn new(deny_hosts: Vec<String>, byte_cap: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            deny_hosts,
            byte_cap,
        }
    }

    fn host_allowed(&self, url: &reqwest::Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        !self
            .deny_hosts
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        TOOL_HTTP_REQUEST
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_HTTP_REQUEST.to_string(),
            description: Some(
                "Perform an outbound HTTP request. Denied hosts are rejected; request and response bodies are size-capped."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "method": { "type": "string", "description": "GET, POST, PUT, or DELETE." },
                    "url": { "type": "string" },
                    "headers": { "type": "object" },
                    "body": { "type": "string" }
                },
                "required": ["method", "url"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::HttpOut
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput> {
        let method = args
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing argument `method`".to_string()))?;
        let url_text = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing argument `url`".to_string()))?;
        let url: reqwest::Url = url_text
            .parse()
            .map_err(|e| Error::InvalidInput(format!("bad url: {e}")))?;
        if !self.host_allowed(&url) {
            return Err(Error::NotPermitted(format!(
                "host denied: {}",
                url.host_str().unwrap_or("<none>")
            )));
        }
        let method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad method: {method}")))?;

        let body = args
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if body.len() > self.byte_cap {
            return Err(Error::InvalidInput(format!(
                "request body exceeds cap of {} bytes",
                self.byte_cap
            )));
        }

        let mut request = self.client.request(method, url.clone());
        if let Some(headers) = args.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(value) = v.as_str() {
                    request = request.header(k, value);
                }
            }
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Tool(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Tool(format!("read response: {e}")))?;
        let truncated = bytes.len() > self.byte_cap;
        let body_text = String::from_utf8_lossy(&bytes[..bytes.len().min(self.byte_cap)]).to_string();

        let mut text = format!("status: {status}\n{body_text}");
        if truncated {
            text.push_str("\n[response truncated]");
        }
        Ok(ToolOutput::text(text).with_side_effect(format!("http:{url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SensitivePaths;
    use std::sync::Arc;

    fn ctx() -> ToolCallContext {
        ToolCallContext::new("/tmp", Arc::new(SensitivePaths::default()), "test")
    }

    fn tool() -> HttpRequestTool {
        HttpRequestTool::new(
            vec!["localhost".to_string(), "169.254.169.254".to_string()],
            1024,
        )
    }

    #[tokio::test]
    async fn denied_host_is_not_permitted() {
        let err = tool()
            .call(json!({"method": "GET", "url": "http://localhost/admin"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));

        let err = tool()
            .call(
                json!({"method": "GET", "url": "http://169.254.169.254/latest/meta-data"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));
    }

    #[tokio::test]
    async fn subdomains_of_denied_hosts_are_rejected() {
        let t = HttpRequestTool::new(vec!["internal.example".to_string()], 1024);
        let err = t
            .call(
                json!({"method": "GET", "url": "http://api.internal.example/x"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));
    }

    #[tokio::test]
    async fn oversized_body_is_invalid_input() {
        let err = tool()
            .call(
                json!({"method": "POST", "url": "http://example.com/", "body": "x".repeat(5000)}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bad_url_and_method_are_invalid_input() {
        let err = tool()
            .call(json!({"method": "GET", "url": "not a url"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
