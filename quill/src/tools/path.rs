//! Path policy: workspace confinement and the sensitive set.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves `candidate` under `root`, rejecting absolute paths and any `..`
/// traversal that would escape the root. Works on the lexical path so a file
/// that does not exist yet (a pending write) is still checked.
pub fn resolve_under(root: &Path, candidate: &str) -> Result<PathBuf> {
    let candidate_path = Path::new(candidate);
    if candidate_path.is_absolute() {
        return Err(Error::NotPermitted(format!(
            "absolute path not allowed: {candidate}"
        )));
    }
    let mut resolved = PathBuf::new();
    for component in candidate_path.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(Error::NotPermitted(format!(
                        "path escapes workspace: {candidate}"
                    )));
                }
            }
            _ => {
                return Err(Error::NotPermitted(format!(
                    "path component not allowed: {candidate}"
                )));
            }
        }
    }
    Ok(root.join(resolved))
}

/// Patterns of paths no tool (and no autonomous patch) may touch:
/// version-control internals, environment files, credential directories,
/// package caches. Matching is on the workspace-relative path.
#[derive(Clone, Debug)]
pub struct SensitivePaths {
    patterns: Vec<String>,
}

impl SensitivePaths {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn is_sensitive(&self, relative: &str) -> bool {
        let normalized = relative.replace('\\', "/");
        self.patterns.iter().any(|p| {
            let p = p.as_str();
            if let Some(dir) = p.strip_suffix('/') {
                // Directory pattern: the path is inside it or is the dir itself.
                normalized == dir
                    || normalized.starts_with(&format!("{dir}/"))
                    || normalized.contains(&format!("/{dir}/"))
            } else {
                // File pattern: exact name match on any path segment.
                normalized
                    .split('/')
                    .any(|segment| segment == p || segment.starts_with(&format!("{p}.")))
            }
        })
    }

    /// Checks a path for both confinement and sensitivity; returns the
    /// resolved path when clean.
    pub fn check(&self, root: &Path, candidate: &str) -> Result<PathBuf> {
        let resolved = resolve_under(root, candidate)?;
        let relative = resolved
            .strip_prefix(root)
            .unwrap_or(&resolved)
            .to_string_lossy()
            .to_string();
        if self.is_sensitive(&relative) {
            return Err(Error::NotPermitted(format!("sensitive path: {candidate}")));
        }
        Ok(resolved)
    }
}

impl Default for SensitivePaths {
    fn default() -> Self {
        Self::new(crate::settings::Settings::default().sensitive_paths)
    }
}
