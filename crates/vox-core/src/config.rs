//! Configuration parsing for the orchestration daemon.
//!
//! Uses the key=value format of `.vox/config`.
//! Precedence: CLI flags > `--config` file > `.vox/config` > defaults.

use crate::types::LangConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Prefix for per-parser priority overrides (`parser_priority.<name>=<rank>`).
const PARSER_PRIORITY_PREFIX: &str = "parser_priority.";

/// Core configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Language
    pub lang_internal: String,
    pub lang_user: String,

    // Skills
    /// Directory holding file-based skills, one subdirectory per skill.
    pub skills_dir: PathBuf,
    /// Skill ids that are never loaded.
    pub skills_blacklist: Vec<String>,
    /// Install default skills on start (default: false).
    pub skills_auto_update: bool,
    /// Repository URLs of skills installed on start.
    pub default_skills: Vec<String>,
    /// URL of a newline-separated list of additional default skill URLs.
    pub default_skills_url: Option<String>,
    /// Seconds between checks for new or modified skills (default: 30).
    pub skills_reload_interval_sec: u64,
    /// Plugin skills share the manager's bus handle (default: true).
    pub shared_connection: bool,

    // Parsers
    /// Enabled parser modules by name.
    pub parsers: Vec<String>,
    /// Priority overrides by parser name; lower ranks run first.
    pub parser_priority: HashMap<String, u8>,

    // Converse
    /// Seconds after activation before a skill drops out of the active set (default: 300).
    pub converse_timeout_sec: u64,

    // Transcripts
    pub transcripts_enabled: bool,
    pub transcripts_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir =
            dirs::data_local_dir().map_or_else(|| PathBuf::from("~/.local/share/vox"), |d| d.join("vox"));
        Self {
            lang_internal: "en-us".to_string(),
            lang_user: "en-us".to_string(),
            skills_dir: data_dir.join("skills"),
            skills_blacklist: Vec::new(),
            skills_auto_update: false,
            default_skills: Vec::new(),
            default_skills_url: None,
            skills_reload_interval_sec: 30,
            shared_connection: true,
            parsers: Vec::new(),
            parser_priority: HashMap::new(),
            converse_timeout_sec: 300,
            transcripts_enabled: false,
            transcripts_dir: data_dir.join("transcripts"),
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

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    pub fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
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

    /// Language defaults handed to the intent service.
    pub fn lang_config(&self) -> LangConfig {
        LangConfig {
            internal: self.lang_internal.clone(),
            user: self.lang_user.clone(),
        }
    }

    pub fn is_blacklisted(&self, skill_id: &str) -> bool {
        self.skills_blacklist.iter().any(|id| id == skill_id)
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(parser) = key.strip_prefix(PARSER_PRIORITY_PREFIX) {
            if parser.is_empty() {
                return Err(ConfigError::InvalidLine(format!("{key}={value}")));
            }
            let rank = Self::parse_int(key, value)?;
            self.parser_priority.insert(parser.to_string(), rank);
            return Ok(());
        }

        match key {
            "lang_internal" => self.lang_internal = value.to_lowercase(),
            "lang_user" => self.lang_user = value.to_lowercase(),
            "skills_dir" => self.skills_dir = PathBuf::from(value),
            "skills_blacklist" => {
                self.skills_blacklist = value.split_whitespace().map(str::to_string).collect();
            }
            "skills_auto_update" => self.skills_auto_update = Self::parse_bool(key, value)?,
            "default_skills" => {
                self.default_skills = value.split_whitespace().map(str::to_string).collect();
            }
            "default_skills_url" => {
                self.default_skills_url = (!value.is_empty()).then(|| value.to_string());
            }
            "skills_reload_interval_sec" => {
                self.skills_reload_interval_sec = Self::parse_int(key, value)?;
            }
            "shared_connection" => self.shared_connection = Self::parse_bool(key, value)?,
            "parsers" => {
                self.parsers = value.split_whitespace().map(str::to_string).collect();
            }
            "converse_timeout_sec" => self.converse_timeout_sec = Self::parse_int(key, value)?,
            "transcripts_enabled" => self.transcripts_enabled = Self::parse_bool(key, value)?,
            "transcripts_dir" => self.transcripts_dir = PathBuf::from(value),
            _ => {
                // Unknown keys warn instead of failing so older daemons accept newer files.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative paths against a base directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.skills_dir.is_relative() {
            self.skills_dir = base.join(&self.skills_dir);
        }
        if self.transcripts_dir.is_relative() {
            self.transcripts_dir = base.join(&self.transcripts_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.lang_internal, "en-us");
        assert_eq!(config.lang_user, "en-us");
        assert!(config.skills_blacklist.is_empty());
        assert!(!config.skills_auto_update);
        assert!(config.shared_connection);
        assert_eq!(config.skills_reload_interval_sec, 30);
        assert_eq!(config.converse_timeout_sec, 300);
        assert!(!config.transcripts_enabled);
        assert!(config.parsers.is_empty());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# language
lang_user="DE-DE"
skills_auto_update=yes
skills_blacklist=weather  jokes
shared_connection=off
converse_timeout_sec=60
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.lang_user, "de-de");
        assert!(config.skills_auto_update);
        assert_eq!(config.skills_blacklist, vec!["weather", "jokes"]);
        assert!(!config.shared_connection);
        assert_eq!(config.converse_timeout_sec, 60);
        assert!(config.default_skills_url.is_none());
        assert!(config.is_blacklisted("jokes"));
        assert!(!config.is_blacklisted("timer"));
    }

    #[test]
    fn parse_parsers_and_priorities() {
        let mut config = Config::default();
        let content = "parsers=cleanup keywords\nparser_priority.cleanup=5\nparser_priority.keywords=90";
        config.parse_content(content).unwrap();
        assert_eq!(config.parsers, vec!["cleanup", "keywords"]);
        assert_eq!(config.parser_priority.get("cleanup"), Some(&5));
        assert_eq!(config.parser_priority.get("keywords"), Some(&90));
    }

    #[test]
    fn invalid_priority_is_rejected() {
        let mut config = Config::default();
        assert!(config.parse_content("parser_priority.cleanup=high").is_err());
        assert!(config.parse_content("parser_priority.=3").is_err());
    }

    #[test]
    fn line_without_equals_is_rejected() {
        let mut config = Config::default();
        let result = config.parse_content("skills_dir");
        assert!(matches!(result, Err(ConfigError::InvalidLine(_))));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut config = Config::default();
        let result = config.parse_content("transcripts_enabled=maybe");
        assert!(matches!(result, Err(ConfigError::InvalidBool { .. })));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("future_knob=1").unwrap();
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn lang_config_mirrors_fields() {
        let mut config = Config::default();
        config.parse_content("lang_internal=en-gb").unwrap();
        let lang = config.lang_config();
        assert_eq!(lang.internal, "en-gb");
        assert_eq!(lang.user, "en-us");
    }

    #[test]
    fn from_file_reads_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "skills_dir=skills\ntranscripts_dir=/var/vox/transcripts\n").unwrap();

        let mut config = Config::from_file(&path).unwrap();
        config.resolve_paths(dir.path());
        assert_eq!(config.skills_dir, dir.path().join("skills"));
        assert_eq!(config.transcripts_dir, PathBuf::from("/var/vox/transcripts"));
    }
}
