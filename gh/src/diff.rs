//! Unified diff handling: path extraction, size accounting, application.
//!
//! The coder role is asked for a standard unified diff (`--- a/x` / `+++ b/x`
//! headers, `@@` hunks). Application is strict: every context and deletion
//! line must match the file on disk, or the whole patch is refused. A
//! mismatched patch must not leave a half-applied tree behind.

use std::collections::BTreeMap;
use std::path::Path;

use crate::GhError;

/// Workspace-relative paths a diff touches, in order of appearance.
pub fn diff_paths(diff: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in diff.lines() {
        let Some(rest) = line.strip_prefix("+++ ") else {
            continue;
        };
        let raw = rest.trim();
        if raw == "/dev/null" {
            // Deletion target; the source path was on the preceding --- line.
            continue;
        }
        let path = raw.strip_prefix("b/").unwrap_or(raw).to_string();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    // Deleted files only appear on `---` lines.
    for line in diff.lines() {
        let Some(rest) = line.strip_prefix("--- ") else {
            continue;
        };
        let raw = rest.trim();
        if raw == "/dev/null" {
            continue;
        }
        let path = raw.strip_prefix("a/").unwrap_or(raw).to_string();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Number of added plus removed lines.
pub fn diff_changed_lines(diff: &str) -> usize {
    diff.lines()
        .filter(|l| {
            (l.starts_with('+') && !l.starts_with("+++"))
                || (l.starts_with('-') && !l.starts_with("---"))
        })
        .count()
}

struct Hunk {
    old_start: usize,
    lines: Vec<(char, String)>,
}

struct FilePatch {
    path: String,
    is_new: bool,
    is_delete: bool,
    hunks: Vec<Hunk>,
}

fn parse(diff: &str) -> Result<Vec<FilePatch>, GhError> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut lines = diff.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("--- ") {
            continue;
        }
        let old_raw = line["--- ".len()..].trim();
        let Some(new_line) = lines.next() else {
            return Err(GhError::Event("diff truncated after ---".into()));
        };
        if !new_line.starts_with("+++ ") {
            return Err(GhError::Event("missing +++ after ---".into()));
        }
        let new_raw = new_line["+++ ".len()..].trim();

        let is_new = old_raw == "/dev/null";
        let is_delete = new_raw == "/dev/null";
        let raw = if is_delete { old_raw } else { new_raw };
        let path = raw
            .strip_prefix("a/")
            .or_else(|| raw.strip_prefix("b/"))
            .unwrap_or(raw)
            .to_string();

        let mut hunks = Vec::new();
        while let Some(peek) = lines.peek() {
            if !peek.starts_with("@@") {
                break;
            }
            let header = lines.next().unwrap_or_default();
            let old_start = parse_hunk_old_start(header)?;
            let mut body = Vec::new();
            while let Some(peek) = lines.peek() {
                match peek.chars().next() {
                    Some(' ') | Some('+') | Some('-') => {
                        let l = lines.next().unwrap_or_default();
                        let (tag, text) = l.split_at(1);
                        body.push((tag.chars().next().unwrap_or(' '), text.to_string()));
                    }
                    Some('\\') => {
                        // "\ No newline at end of file"
                        lines.next();
                    }
                    _ => break,
                }
            }
            hunks.push(Hunk {
                old_start,
                lines: body,
            });
        }
        patches.push(FilePatch {
            path,
            is_new,
            is_delete,
            hunks,
        });
    }
    Ok(patches)
}

/// Parses `@@ -<old_start>,<n> +<new_start>,<m> @@`.
fn parse_hunk_old_start(header: &str) -> Result<usize, GhError> {
    let inner = header.trim_start_matches('@').trim();
    let old_part = inner
        .split_whitespace()
        .find(|p| p.starts_with('-'))
        .ok_or_else(|| GhError::Event(format!("bad hunk header: {header}")))?;
    let start = old_part[1..]
        .split(',')
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| GhError::Event(format!("bad hunk header: {header}")))?;
    Ok(start)
}

fn apply_to_content(content: &str, patch: &FilePatch) -> Result<String, GhError> {
    let had_trailing_newline = content.ends_with('\n') || content.is_empty();
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    // Apply hunks bottom-up so earlier offsets stay valid.
    let mut ordered: BTreeMap<usize, &Hunk> = BTreeMap::new();
    for hunk in &patch.hunks {
        ordered.insert(hunk.old_start, hunk);
    }
    for (_, hunk) in ordered.iter().rev() {
        // Hunk numbering is 1-based; a start of 0 means an empty old file.
        let cursor = hunk.old_start.saturating_sub(1);
        let mut replacement = Vec::new();
        let mut consumed = 0usize;
        for (tag, text) in &hunk.lines {
            match tag {
                ' ' | '-' => {
                    let on_disk = lines.get(cursor + consumed).ok_or_else(|| {
                        GhError::Event(format!("patch context beyond end of {}", patch.path))
                    })?;
                    if on_disk != text {
                        return Err(GhError::Event(format!(
                            "patch does not apply to {} at line {}",
                            patch.path,
                            cursor + consumed + 1
                        )));
                    }
                    if *tag == ' ' {
                        replacement.push(text.clone());
                    }
                    consumed += 1;
                }
                '+' => replacement.push(text.clone()),
                _ => {}
            }
        }
        lines.splice(cursor..cursor + consumed, replacement);
    }

    let mut out = lines.join("\n");
    if had_trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Applies a unified diff under `root`. All-or-nothing: every file's new
/// content is computed first, then written.
pub fn apply_unified_diff(root: &Path, diff: &str) -> Result<Vec<String>, GhError> {
    let patches = parse(diff)?;
    if patches.is_empty() {
        return Err(GhError::Event("diff contains no file patches".into()));
    }

    let mut staged: Vec<(String, Option<String>)> = Vec::new();
    for patch in &patches {
        if patch.is_delete {
            staged.push((patch.path.clone(), None));
            continue;
        }
        let current = if patch.is_new {
            String::new()
        } else {
            std::fs::read_to_string(root.join(&patch.path))
                .map_err(|e| GhError::Event(format!("read {}: {e}", patch.path)))?
        };
        let updated = apply_to_content(&current, patch)?;
        staged.push((patch.path.clone(), Some(updated)));
    }

    let mut touched = Vec::new();
    for (path, content) in staged {
        let full = root.join(&path);
        match content {
            Some(text) => {
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| GhError::Event(format!("create parents for {path}: {e}")))?;
                }
                std::fs::write(&full, text)
                    .map_err(|e| GhError::Event(format!("write {path}: {e}")))?;
            }
            None => {
                std::fs::remove_file(&full)
                    .map_err(|e| GhError::Event(format!("delete {path}: {e}")))?;
            }
        }
        touched.push(path);
    }
    Ok(touched)
}
