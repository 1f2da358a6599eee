//! Skill manifest parsing for file-based skills.
//!
//! A file-based skill is a directory under the skills directory holding a `SKILL.md`
//! whose YAML frontmatter names the factory (`entry`) the host registered for it:
//!
//! ```text
//! ---
//! entry: weather
//! name: Weather
//! description: Forecasts and current conditions.
//! ---
//! ```
//!
//! The skill id is the directory name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Manifest file every file-based skill directory carries.
pub const MANIFEST_FILE: &str = "SKILL.md";

/// Metadata extracted from a skill directory's `SKILL.md`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillManifest {
    /// Skill id (the directory name).
    pub skill_id: String,
    /// Name of the registered factory that constructs this skill.
    pub entry: String,
    /// Display name; defaults to the skill id.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Absolute path to the skill directory.
    pub path: PathBuf,
}

/// Error type for skill manifest parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("missing YAML frontmatter")]
    MissingFrontmatter,
    #[error("invalid YAML frontmatter: {0}")]
    InvalidYaml(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid skill id: {0}")]
    InvalidId(String),
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Raw frontmatter as parsed from YAML.
#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    entry: Option<String>,
    name: Option<String>,
    description: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

/// Validates a skill id taken from a directory name.
///
/// Rules:
/// - 1-128 characters
/// - ASCII letters, digits, `-`, `_` and `.` only
/// - Must not start with `.`
pub fn validate_skill_id(skill_id: &str) -> Result<(), ManifestError> {
    if skill_id.is_empty() {
        return Err(ManifestError::InvalidId("skill id cannot be empty".to_string()));
    }
    if skill_id.len() > 128 {
        return Err(ManifestError::InvalidId(format!(
            "skill id exceeds 128 characters (got {})",
            skill_id.len()
        )));
    }
    if skill_id.starts_with('.') {
        return Err(ManifestError::InvalidId(
            "skill id cannot start with '.'".to_string(),
        ));
    }
    if let Some(c) = skill_id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.'))
    {
        return Err(ManifestError::InvalidId(format!("invalid character '{c}'")));
    }
    Ok(())
}

/// Validates a factory entry name.
///
/// Rules:
/// - 1-64 characters
/// - Lowercase letters, numbers, hyphens and underscores only
pub fn validate_entry(entry: &str) -> Result<(), ManifestError> {
    if entry.is_empty() {
        return Err(ManifestError::InvalidEntry("entry cannot be empty".to_string()));
    }
    if entry.len() > 64 {
        return Err(ManifestError::InvalidEntry(format!(
            "entry exceeds 64 characters (got {})",
            entry.len()
        )));
    }
    for c in entry.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
            return Err(ManifestError::InvalidEntry(format!(
                "invalid character '{c}': only lowercase letters, numbers, '-' and '_' allowed"
            )));
        }
    }
    Ok(())
}

/// Extracts YAML frontmatter from `SKILL.md` content.
///
/// Frontmatter must be delimited by `---` lines at the start of the file.
fn extract_frontmatter(content: &str) -> Result<&str, ManifestError> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return Err(ManifestError::MissingFrontmatter);
    }

    let after_open = &trimmed[3..];
    let after_newline = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_newline
        .find("\n---")
        .or_else(|| after_newline.find("\r\n---"));

    match close_pos {
        Some(pos) => Ok(&after_newline[..pos]),
        None => Err(ManifestError::MissingFrontmatter),
    }
}

/// Skill id for a skill directory: its final path component.
pub fn skill_id_from_dir(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Parses `SKILL.md` content for the skill directory at `path`.
pub fn parse_manifest(content: &str, path: PathBuf) -> Result<SkillManifest, ManifestError> {
    let skill_id = skill_id_from_dir(&path)
        .ok_or_else(|| ManifestError::InvalidId(path.display().to_string()))?;
    validate_skill_id(&skill_id)?;

    let frontmatter = extract_frontmatter(content)?;
    let raw: RawFrontmatter =
        serde_yaml::from_str(frontmatter).map_err(|e| ManifestError::InvalidYaml(e.to_string()))?;

    let entry = raw.entry.ok_or(ManifestError::MissingField("entry"))?;
    validate_entry(&entry)?;

    let name = raw
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| skill_id.clone());

    Ok(SkillManifest {
        skill_id,
        entry,
        name,
        description: raw.description,
        metadata: raw.metadata.unwrap_or_default(),
        path,
    })
}
