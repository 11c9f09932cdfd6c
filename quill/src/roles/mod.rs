//! Role agents: closed set of personas over one shared execution loop.
//!
//! A role is configuration, not code: system instruction, tool whitelist, and
//! sampling profile. The loop in [`run_role`] is identical for every role.

mod directives;
mod run_loop;

pub use directives::parse_directives;
pub use run_loop::{run_role, RoleInput, RoleOutcome, RoleServices};

use crate::llm::SamplingParams;
use crate::tools::{
    TOOL_GIT_BRANCHES, TOOL_GIT_COMMIT, TOOL_GIT_CREATE_BRANCH, TOOL_GIT_DIFF, TOOL_GIT_LOG,
    TOOL_GIT_STATUS, TOOL_LIST_FILES, TOOL_READ_FILE, TOOL_RUN_PYTHON, TOOL_RUN_SHELL,
    TOOL_WRITE_FILE,
};

/// The closed role set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Planner,
    Coder,
    Reviewer,
    PrReviewer,
    TestWriter,
    Completer,
    Developer,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Planner => "planner",
            RoleKind::Coder => "coder",
            RoleKind::Reviewer => "reviewer",
            RoleKind::PrReviewer => "pr_reviewer",
            RoleKind::TestWriter => "test_writer",
            RoleKind::Completer => "completer",
            RoleKind::Developer => "developer",
        }
    }
}

/// One role's configuration.
#[derive(Clone, Debug)]
pub struct RoleProfile {
    pub kind: RoleKind,
    pub system_prompt: String,
    /// Tools this role may call; everything else is rejected before dispatch.
    pub tools: Vec<String>,
    pub sampling: SamplingParams,
}

fn read_only_tools() -> Vec<String> {
    [
        TOOL_READ_FILE,
        TOOL_LIST_FILES,
        TOOL_GIT_STATUS,
        TOOL_GIT_DIFF,
        TOOL_GIT_LOG,
        TOOL_GIT_BRANCHES,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn editing_tools() -> Vec<String> {
    let mut tools = read_only_tools();
    tools.extend(
        [
            TOOL_WRITE_FILE,
            TOOL_RUN_PYTHON,
            TOOL_RUN_SHELL,
            TOOL_GIT_COMMIT,
            TOOL_GIT_CREATE_BRANCH,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    tools
}

impl RoleProfile {
    /// Default profile for a role kind. The sampling defaults are part of the
    /// configuration surface, overridable per deployment.
    pub fn for_kind(kind: RoleKind) -> Self {
        match kind {
            RoleKind::Planner => Self {
                kind,
                system_prompt: "You are a planning agent. Break the request into a short, \
                    concrete sequence of steps. Diagnose before prescribing; name the files \
                    and functions involved. Do not write code."
                    .to_string(),
                tools: read_only_tools(),
                sampling: SamplingParams {
                    temperature: 0.3,
                    max_tokens: 1000,
                },
            },
            RoleKind::Coder => Self {
                kind,
                system_prompt: "You are a coding agent. Implement exactly what the plan or \
                    request asks for. Prefer minimal diffs. When you change files, use the \
                    available tools; never describe changes you did not make."
                    .to_string(),
                tools: editing_tools(),
                sampling: SamplingParams {
                    temperature: 0.1,
                    max_tokens: 2000,
                },
            },
            RoleKind::Reviewer => Self {
                kind,
                system_prompt: "You are a code review agent. Check the proposed change for \
                    correctness, regressions, and missed edge cases. Be specific: file, line, \
                    problem, suggestion."
                    .to_string(),
                tools: read_only_tools(),
                sampling: SamplingParams {
                    temperature: 0.2,
                    max_tokens: 1500,
                },
            },
            RoleKind::PrReviewer => Self {
                kind,
                system_prompt: "You are a pull-request review agent. Summarize the change, \
                    flag risks, and give a merge recommendation with reasons."
                    .to_string(),
                tools: read_only_tools(),
                sampling: SamplingParams {
                    temperature: 0.2,
                    max_tokens: 1500,
                },
            },
            RoleKind::TestWriter => Self {
                kind,
                system_prompt: "You are a test-writing agent. Produce focused tests for the \
                    described behavior, covering the happy path and the edge cases the code \
                    actually has."
                    .to_string(),
                tools: editing_tools(),
                sampling: SamplingParams {
                    temperature: 0.2,
                    max_tokens: 2000,
                },
            },
            RoleKind::Completer => Self {
                kind,
                system_prompt: "You are a code-completion agent. Continue the given code \
                    fragment in the same style. Reply with code only, no commentary."
                    .to_string(),
                tools: Vec::new(),
                sampling: SamplingParams {
                    temperature: 0.1,
                    max_tokens: 500,
                },
            },
            RoleKind::Developer => Self {
                kind,
                system_prompt: "You are a software development assistant with access to the \
                    user's workspace. Answer questions, investigate code, and make changes \
                    when asked, using the available tools."
                    .to_string(),
                tools: editing_tools(),
                sampling: SamplingParams {
                    temperature: 0.2,
                    max_tokens: 2000,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::TOOL_HTTP_REQUEST;

    #[test]
    fn sampling_defaults_match_configuration() {
        let planner = RoleProfile::for_kind(RoleKind::Planner);
        assert_eq!(planner.sampling.temperature, 0.3);
        assert_eq!(planner.sampling.max_tokens, 1000);

        let coder = RoleProfile::for_kind(RoleKind::Coder);
        assert_eq!(coder.sampling.temperature, 0.1);
        assert_eq!(coder.sampling.max_tokens, 2000);

        let reviewer = RoleProfile::for_kind(RoleKind::Reviewer);
        assert_eq!(reviewer.sampling.temperature, 0.2);
        assert_eq!(reviewer.sampling.max_tokens, 1500);
    }

    #[test]
    fn planner_and_reviewer_cannot_mutate() {
        for kind in [RoleKind::Planner, RoleKind::Reviewer, RoleKind::PrReviewer] {
            let p = RoleProfile::for_kind(kind);
            assert!(!p.tools.contains(&TOOL_WRITE_FILE.to_string()), "{kind:?}");
            assert!(!p.tools.contains(&TOOL_GIT_COMMIT.to_string()), "{kind:?}");
        }
    }

    #[test]
    fn completer_has_no_tools() {
        assert!(RoleProfile::for_kind(RoleKind::Completer).tools.is_empty());
    }

    #[test]
    fn no_role_gets_outbound_http_by_default() {
        for kind in [
            RoleKind::Planner,
            RoleKind::Coder,
            RoleKind::Reviewer,
            RoleKind::Developer,
        ] {
            let p = RoleProfile::for_kind(kind);
            assert!(!p.tools.contains(&TOOL_HTTP_REQUEST.to_string()));
        }
    }
}
