//! Guardrails: the policy check that vetoes a proposed patch before any
//! mutation is applied.
//!
//! A patch is rejected when it touches a sensitive path, exceeds the size
//! cap, or modifies files outside the declared scope. The check runs on the
//! diff text alone; nothing has been written when it fires.

use quill::SensitivePaths;

use crate::diff::{diff_changed_lines, diff_paths};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Pass,
    /// Rejection with the machine-readable reason recorded in the audit log.
    Reject { reason: String, detail: String },
}

impl GuardrailVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GuardrailVerdict::Pass)
    }
}

/// Checks `diff` against the sensitive set, the changed-line cap, and an
/// optional declared scope (path prefixes the planner named).
pub fn check_patch(
    diff: &str,
    sensitive: &SensitivePaths,
    line_cap: usize,
    declared_scope: Option<&[String]>,
) -> GuardrailVerdict {
    let paths = diff_paths(diff);
    if paths.is_empty() {
        return GuardrailVerdict::Reject {
            reason: "empty_patch".into(),
            detail: "patch touches no files".into(),
        };
    }

    for path in &paths {
        if sensitive.is_sensitive(path) {
            return GuardrailVerdict::Reject {
                reason: "sensitive_path".into(),
                detail: format!("patch touches {path}"),
            };
        }
    }

    let changed = diff_changed_lines(diff);
    if changed > line_cap {
        return GuardrailVerdict::Reject {
            reason: "patch_too_large".into(),
            detail: format!("{changed} changed lines exceed the cap of {line_cap}"),
        };
    }

    if let Some(scope) = declared_scope {
        if !scope.is_empty() {
            for path in &paths {
                let in_scope = scope.iter().any(|prefix| {
                    path == prefix || path.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
                });
                if !in_scope {
                    return GuardrailVerdict::Reject {
                        reason: "out_of_scope".into(),
                        detail: format!("patch touches {path}, outside the declared scope"),
                    };
                }
            }
        }
    }

    GuardrailVerdict::Pass
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_for(path: &str) -> String {
        format!("--- a/{path}\n+++ b/{path}\n@@ -1,1 +1,1 @@\n-old\n+new\n")
    }

    #[test]
    fn clean_patch_passes() {
        let verdict = check_patch(&diff_for("src/app.py"), &SensitivePaths::default(), 500, None);
        assert!(verdict.is_pass());
    }

    #[test]
    fn env_file_is_rejected_as_sensitive() {
        let verdict = check_patch(&diff_for(".env"), &SensitivePaths::default(), 500, None);
        match verdict {
            GuardrailVerdict::Reject { reason, .. } => assert_eq!(reason, "sensitive_path"),
            GuardrailVerdict::Pass => panic!("sensitive patch passed"),
        }
    }

    #[test]
    fn vcs_internals_are_rejected() {
        let verdict = check_patch(
            &diff_for(".git/hooks/pre-commit"),
            &SensitivePaths::default(),
            500,
            None,
        );
        assert!(!verdict.is_pass());
    }

    #[test]
    fn oversized_patch_is_rejected() {
        let mut diff = String::from("--- a/big.py\n+++ b/big.py\n@@ -1,1 +1,60 @@\n-old\n");
        for i in 0..60 {
            diff.push_str(&format!("+line {i}\n"));
        }
        let verdict = check_patch(&diff, &SensitivePaths::default(), 10, None);
        match verdict {
            GuardrailVerdict::Reject { reason, .. } => assert_eq!(reason, "patch_too_large"),
            GuardrailVerdict::Pass => panic!("oversized patch passed"),
        }
    }

    #[test]
    fn out_of_scope_patch_is_rejected() {
        let scope = vec!["src".to_string()];
        assert!(check_patch(
            &diff_for("src/app.py"),
            &SensitivePaths::default(),
            500,
            Some(&scope)
        )
        .is_pass());

        let verdict = check_patch(
            &diff_for("deploy/secrets.yaml"),
            &SensitivePaths::default(),
            500,
            Some(&scope),
        );
        match verdict {
            GuardrailVerdict::Reject { reason, .. } => assert_eq!(reason, "out_of_scope"),
            GuardrailVerdict::Pass => panic!("out-of-scope patch passed"),
        }
    }

    #[test]
    fn empty_patch_is_rejected() {
        let verdict = check_patch("not a diff", &SensitivePaths::default(), 500, None);
        assert!(!verdict.is_pass());
    }
}
