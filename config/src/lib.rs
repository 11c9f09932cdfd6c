//! Load configuration from XDG `config.toml` and a project `.env`, then apply it to
//! the process environment with priority: **existing env > .env > XDG**.
//!
//! The `[env]` table of `~/.config/quill/config.toml` holds machine-wide defaults
//! (provider keys, data root); a project `.env` overrides them per checkout. Keys
//! already present in the environment are never touched, so operators can override
//! anything at launch.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns the `[env]` table of `$XDG_CONFIG_HOME/<app_name>/config.toml`.
/// A missing file yields an empty map.
fn xdg_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(HashMap::new());
    };
    let path = config_dir.join(app_name).join("config.toml");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::TomlRead)?;
    let parsed: ConfigFile = toml::from_str(&content)?;
    Ok(parsed.env)
}

/// Minimal `.env` parser: `KEY=VALUE` lines, `#` comments, surrounding single or
/// double quotes stripped (double quotes support the `\"` escape). No multiline.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let raw = raw.trim();
        let value = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            raw[1..raw.len() - 1].replace("\\\"", "\"")
        } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            raw[1..raw.len() - 1].to_string()
        } else {
            raw.to_string()
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Returns the parsed `.env` from `override_dir` (or the current directory).
/// A missing file yields an empty map.
fn dotenv_map(override_dir: Option<&Path>) -> Result<HashMap<String, String>, LoadError> {
    let dir = match override_dir {
        Some(d) => d.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(d) => d,
            Err(_) => return Ok(HashMap::new()),
        },
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::DotenvRead)?;
    Ok(parse_dotenv(&content))
}

/// Loads both sources and sets environment variables only for keys that are
/// **not** already set, so existing env always wins.
///
/// * `app_name`: XDG path segment, e.g. `"quill"` for `~/.config/quill/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` there instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg = xdg_env_map(app_name)?;
    let dotenv = dotenv_map(override_dir)?;

    let mut keys: std::collections::HashSet<&String> = xdg.keys().collect();
    keys.extend(dotenv.keys());

    for key in keys {
        if std::env::var(key).is_ok() {
            continue; // existing env wins
        }
        if let Some(v) = dotenv.get(key).or_else(|| xdg.get(key)) {
            std::env::set_var(key, v);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn parse_dotenv_basics() {
        let m = parse_dotenv("FOO=bar\n# note\nQUOTED=\"a b\"\nSINGLE='c d'\nEMPTY=\n");
        assert_eq!(m.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(m.get("QUOTED").map(String::as_str), Some("a b"));
        assert_eq!(m.get("SINGLE").map(String::as_str), Some("c d"));
        assert_eq!(m.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn parse_dotenv_skips_malformed_lines() {
        let m = parse_dotenv("NOEQUALS\n=orphan\nOK=1\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("OK").map(String::as_str), Some("1"));
    }

    #[test]
    fn existing_env_wins() {
        env::set_var("QUILL_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("quill-config-test-none", None);
        assert_eq!(
            env::var("QUILL_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("QUILL_CONFIG_TEST_EXISTING");
    }

    #[test]
    fn dotenv_applied_when_env_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "QUILL_CONFIG_TEST_DOTENV=fromfile\n").unwrap();
        env::remove_var("QUILL_CONFIG_TEST_DOTENV");
        load_and_apply("quill-config-test-none", Some(dir.path())).unwrap();
        let val = env::var("QUILL_CONFIG_TEST_DOTENV").unwrap();
        env::remove_var("QUILL_CONFIG_TEST_DOTENV");
        assert_eq!(val, "fromfile");
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("quilltest");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nQUILL_CONFIG_TEST_PRIO = \"from_xdg\"\n",
        )
        .unwrap();
        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "QUILL_CONFIG_TEST_PRIO=from_dotenv\n",
        )
        .unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("QUILL_CONFIG_TEST_PRIO");
        let _ = load_and_apply("quilltest", Some(dotenv_dir.path()));
        let val = env::var("QUILL_CONFIG_TEST_PRIO").unwrap();
        env::remove_var("QUILL_CONFIG_TEST_PRIO");
        restore("XDG_CONFIG_HOME", prev);

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn missing_everything_is_ok() {
        assert!(load_and_apply("quill-config-test-nonexistent-xyz", None).is_ok());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("quillbad");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not toml [[[\n").unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        let result = load_and_apply("quillbad", None);
        restore("XDG_CONFIG_HOME", prev);

        assert!(matches!(result, Err(LoadError::TomlParse(_))));
    }
}
