//! Configuration parsing.
//!
//! Precedence is CLI flags > `--config` file > `.flow/config` in the current
//! directory > built-in defaults. The parser is a plain `key=value` reader:
//! trim, skip blanks/comments, split on the first `=`, unquote, dispatch on
//! key.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Every option the core consumes from its environment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub attachments_dir: PathBuf,
    pub actor_id: Option<String>,
    /// Path-style selectors are rewritten to be relative to this root unless
    /// they already start with it. Never applied to friendly IDs or UUIDs.
    pub project_root: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".flow/flow.db"),
            attachments_dir: PathBuf::from(".flow/attachments"),
            actor_id: None,
            project_root: None,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file into `self` (later files win).
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };
            let key = key.trim();
            let value = Self::unquote(value.trim());
            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "db_path" => self.db_path = PathBuf::from(value),
            "attachments_dir" => self.attachments_dir = PathBuf::from(value),
            "actor_id" => {
                self.actor_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "project_root" => {
                self.project_root = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            // Unknown options fail loudly rather than being silently ignored.
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Apply a CLI-supplied override on top of the file/default config.
    /// CLI flags have the highest precedence, so `Some` values always win.
    pub fn apply_overrides(
        &mut self,
        db_path: Option<PathBuf>,
        attachments_dir: Option<PathBuf>,
        actor_id: Option<String>,
        project_root: Option<String>,
    ) {
        if let Some(v) = db_path {
            self.db_path = v;
        }
        if let Some(v) = attachments_dir {
            self.attachments_dir = v;
        }
        if actor_id.is_some() {
            self.actor_id = actor_id;
        }
        if project_root.is_some() {
            self.project_root = project_root;
        }
    }

    /// Resolve the effective config for a working directory following the
    /// precedence CLI flags > `--config` file > `.flow/config` > defaults.
    pub fn resolve(
        cwd: &Path,
        explicit_config: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let local = cwd.join(".flow/config");
        if local.is_file() {
            config.load_file(&local)?;
        }
        if let Some(explicit) = explicit_config {
            config.load_file(explicit)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_paths() {
        let c = Config::default();
        assert_eq!(c.db_path, PathBuf::from(".flow/flow.db"));
        assert_eq!(c.attachments_dir, PathBuf::from(".flow/attachments"));
        assert!(c.actor_id.is_none());
        assert!(c.project_root.is_none());
    }

    #[test]
    fn parses_key_value_lines() {
        let mut c = Config::default();
        c.parse_content(
            "db_path = /tmp/x.db\n# a comment\nproject_root = \"demo\"\nactor_id=alice\n",
        )
        .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(c.project_root.as_deref(), Some("demo"));
        assert_eq!(c.actor_id.as_deref(), Some("alice"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut c = Config::default();
        let err = c.parse_content("bogus_key = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "bogus_key"));
    }

    #[test]
    fn cli_overrides_win_over_file_values() {
        let mut c = Config::default();
        c.parse_content("project_root = demo\n").unwrap();
        c.apply_overrides(None, None, None, Some("override-root".to_string()));
        assert_eq!(c.project_root.as_deref(), Some("override-root"));
    }
}
