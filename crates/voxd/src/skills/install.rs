//! Default skill installation.
//!
//! Installs the configured default skills into the skills directory before the first
//! load pass. Entries come from `default_skills` and, optionally, from a remote list
//! fetched from `default_skills_url` (one entry per non-empty line). A failing entry
//! is logged and skipped; nothing here is fatal to the daemon.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("cannot derive a skill directory from '{0}'")]
    InvalidUrl(String),
    #[error("failed to fetch skill list: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("skill list request returned {0}")]
    FetchStatus(u16),
}

pub type Result<T> = std::result::Result<T, InstallError>;

/// Installs one skill into a skills directory.
pub trait SkillInstaller: Send + Sync {
    /// Install or update the skill at `url`, returning its directory.
    fn install(&self, url: &str, skills_dir: &Path) -> Result<PathBuf>;
}

/// Installs skills by cloning their git repositories.
#[derive(Debug, Clone)]
pub struct GitInstaller {
    git_bin: PathBuf,
}

impl Default for GitInstaller {
    fn default() -> Self {
        Self {
            git_bin: PathBuf::from("git"),
        }
    }
}

impl GitInstaller {
    pub fn new(git_bin: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: git_bin.into(),
        }
    }

    fn run(&self, args: &[&str], cwd: &Path) -> Result<()> {
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(cwd)
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(InstallError::CommandFailed(stderr.trim().to_string()))
    }
}

impl SkillInstaller for GitInstaller {
    fn install(&self, url: &str, skills_dir: &Path) -> Result<PathBuf> {
        let name = skill_dir_name(url).ok_or_else(|| InstallError::InvalidUrl(url.to_string()))?;
        std::fs::create_dir_all(skills_dir)?;
        let dest = skills_dir.join(&name);

        if dest.join(".git").is_dir() {
            debug!(url, path = %dest.display(), "updating installed skill");
            self.run(&["pull", "--ff-only", "--quiet"], &dest)?;
        } else if dest.exists() {
            debug!(path = %dest.display(), "skill directory exists and is not a checkout, leaving it");
        } else {
            debug!(url, path = %dest.display(), "cloning skill");
            self.run(&["clone", "--depth", "1", "--quiet", url, &name], skills_dir)?;
        }
        Ok(dest)
    }
}

/// Directory name for a skill repository URL: its last path segment without `.git`.
pub fn skill_dir_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Split a remote skill list into entries, dropping blank lines.
pub fn parse_entries(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fetch a remote skill list.
pub async fn fetch_remote_entries(url: &str) -> Result<Vec<String>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(InstallError::FetchStatus(response.status().as_u16()));
    }
    let body = response.text().await?;
    Ok(parse_entries(&body))
}

/// Outcome of installing a list of skills.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<PathBuf>,
    pub failed: Vec<(String, String)>,
}

/// Install every entry, logging and skipping failures.
pub fn install_skills_from_list(
    installer: &dyn SkillInstaller,
    urls: &[String],
    skills_dir: &Path,
) -> InstallReport {
    let mut report = InstallReport::default();
    for url in urls {
        match installer.install(url, skills_dir) {
            Ok(path) => report.installed.push(path),
            Err(e) => {
                warn!(url = %url, error = %e, "failed to install skill");
                report.failed.push((url.clone(), e.to_string()));
            }
        }
    }
    info!(
        installed = report.installed.len(),
        failed = report.failed.len(),
        "default skills installed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn skill_dir_name_strips_git_suffix() {
        assert_eq!(
            skill_dir_name("https://github.com/vox/skill-weather.git").as_deref(),
            Some("skill-weather")
        );
        assert_eq!(
            skill_dir_name("https://github.com/vox/skill-alarm/").as_deref(),
            Some("skill-alarm")
        );
        assert_eq!(
            skill_dir_name("git@github.com:vox/skill-timer.git").as_deref(),
            Some("skill-timer")
        );
        assert_eq!(skill_dir_name(""), None);
        assert_eq!(skill_dir_name("https://host/.git"), None);
    }

    #[test]
    fn parse_entries_drops_blank_lines() {
        let body = "https://a/skill-one\n\n   \nhttps://a/skill-two  \r\n";
        assert_eq!(
            parse_entries(body),
            vec!["https://a/skill-one", "https://a/skill-two"]
        );
    }

    struct FakeInstaller {
        calls: Mutex<Vec<String>>,
    }

    impl SkillInstaller for FakeInstaller {
        fn install(&self, url: &str, skills_dir: &Path) -> Result<PathBuf> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("broken") {
                return Err(InstallError::CommandFailed("repository not found".to_string()));
            }
            Ok(skills_dir.join(skill_dir_name(url).unwrap()))
        }
    }

    #[test]
    fn install_list_continues_past_failures() {
        let installer = FakeInstaller {
            calls: Mutex::new(Vec::new()),
        };
        let urls = vec![
            "https://a/skill-one".to_string(),
            "https://a/broken".to_string(),
            "https://a/skill-two".to_string(),
        ];

        let report = install_skills_from_list(&installer, &urls, Path::new("/skills"));

        assert_eq!(installer.calls.lock().unwrap().len(), 3);
        assert_eq!(
            report.installed,
            vec![PathBuf::from("/skills/skill-one"), PathBuf::from("/skills/skill-two")]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "https://a/broken");
    }

    #[test]
    fn git_installer_leaves_plain_directories_alone() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("skill-local")).unwrap();

        let installer = GitInstaller::new("/nonexistent/git");
        let path = installer
            .install("https://a/skill-local", tmp.path())
            .unwrap();
        assert_eq!(path, tmp.path().join("skill-local"));
    }

    #[test]
    fn git_installer_reports_missing_binary() {
        let tmp = tempfile::TempDir::new().unwrap();
        let installer = GitInstaller::new("/nonexistent/git");
        let err = installer
            .install("https://a/skill-new", tmp.path())
            .unwrap_err();
        assert!(matches!(err, InstallError::Execution(_)));
    }
}
