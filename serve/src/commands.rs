//! Slash-command dispatch.
//!
//! A message starting with `/` goes straight to the tool layer. No model
//! call happens on the dispatch path, so commands keep working when the provider
//! chain is down. The result streams back as one `chunk` plus `end`.

use std::sync::Arc;

use serde_json::json;

use frame::{ErrorFrame, ServerFrame};
use quill::{
    run_test_fix, Error, FixOutcome, RoleInput, Session, ToolCallContext,
};

use crate::app::Gateway;
use crate::connection::Outbound;

const HELP_TEXT: &str = "Commands:\n\
    /help                      this text\n\
    /autofix [path]            run the test-and-fix loop on the workspace\n\
    /test [args...]            run the test suite\n\
    /git_commit \"message\"     stage everything and commit\n\
    /git_create_branch <name>  create and switch to a branch\n\
    /git_status                working tree status";

/// Splits `rest` respecting one level of double quotes, so
/// `/git_commit "fix the bug"` yields a single argument.
fn split_args(rest: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in rest.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

pub(crate) async fn dispatch(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    outbound: &Outbound,
    content: &str,
) {
    let mut parts = content.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    let args = split_args(rest);

    let _ = outbound
        .send(ServerFrame::Start {
            session_id: session.id.clone(),
        })
        .await;

    let result = run_command(gateway, session, command, &args).await;
    match result {
        Ok(text) => {
            let _ = outbound.send(ServerFrame::Chunk { content: text }).await;
            let _ = outbound
                .send(ServerFrame::End {
                    session_id: session.id.clone(),
                    turn_index: session.next_turn_index(),
                })
                .await;
        }
        Err(e) => {
            let _ = outbound
                .send(ServerFrame::Error(ErrorFrame {
                    kind: e.kind().to_string(),
                    message: e.sanitized_message(),
                }))
                .await;
        }
    }
}

async fn run_command(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    command: &str,
    args: &[String],
) -> Result<String, Error> {
    let backend = &gateway.backend;
    let tool_ctx = ToolCallContext::new(
        backend.settings.workspace_root.clone(),
        backend.sensitive.clone(),
        session.id.clone(),
    )
    .with_cancel(session.cancel.clone())
    .with_deadline(backend.settings.tool_deadline);

    session
        .tools_invoked
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    match command {
        "/help" => Ok(HELP_TEXT.to_string()),
        "/git_status" => Ok(backend
            .tools
            .invoke("git_status", json!({}), &tool_ctx)
            .await?
            .text),
        "/git_commit" => {
            let message = args.first().cloned().ok_or_else(|| {
                Error::InvalidInput("usage: /git_commit \"message\"".to_string())
            })?;
            Ok(backend
                .tools
                .invoke("git_commit", json!({ "message": message }), &tool_ctx)
                .await?
                .text)
        }
        "/git_create_branch" => {
            let name = args.first().cloned().ok_or_else(|| {
                Error::InvalidInput("usage: /git_create_branch <name>".to_string())
            })?;
            Ok(backend
                .tools
                .invoke("git_create_branch", json!({ "name": name }), &tool_ctx)
                .await?
                .text)
        }
        "/test" => {
            let mut argv = gateway.fix_config.test_argv.clone();
            argv.extend(args.iter().cloned());
            match backend
                .tools
                .invoke("run_shell", json!({ "argv": argv }), &tool_ctx)
                .await
            {
                Ok(out) => Ok(format!("tests passed\n{}", out.text)),
                // Failing tests are a result, not an error frame.
                Err(Error::Tool(output)) => Ok(format!("tests failed\n{output}")),
                Err(e) => Err(e),
            }
        }
        "/autofix" => {
            let ctx = match args.first() {
                // Optional path argument scopes the loop to a sub-directory.
                Some(path) => {
                    let scoped = backend
                        .sensitive
                        .check(&backend.settings.workspace_root, path)?;
                    tool_ctx.rebase(scoped)
                }
                None => tool_ctx,
            };
            let report = run_test_fix(
                &backend.roles,
                &gateway.fix_config,
                RoleInput::default(),
                &ctx,
                &session.cancel,
            )
            .await?;
            match report.outcome {
                FixOutcome::Fixed { iterations } => Ok(format!(
                    "tests pass after {iterations} fix iteration(s)"
                )),
                FixOutcome::Unfixed { last_output } => Ok(format!(
                    "unfixed after {} iterations; latest failing output:\n{last_output}",
                    gateway.fix_config.max_iterations
                )),
            }
        }
        other => Err(Error::InvalidInput(format!(
            "unknown command {other}; try /help"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_args_handles_quotes() {
        assert_eq!(split_args(""), Vec::<String>::new());
        assert_eq!(split_args("one two"), vec!["one", "two"]);
        assert_eq!(split_args("\"one two\" three"), vec!["one two", "three"]);
    }
}
