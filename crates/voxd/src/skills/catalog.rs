//! Skill catalogs.
//!
//! File skills are discovered by scanning the skills directory for subdirectories that
//! carry a `SKILL.md`. Plugin skills and file-skill entries resolve to factories the
//! host registered in a [`FactoryCatalog`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use vox_core::skills::{parse_manifest, skill_id_from_dir, ManifestError, SkillManifest, MANIFEST_FILE};

use super::skill::SkillFactory;

/// Result of skill discovery with potential errors.
#[derive(Debug)]
pub struct DiscoveryResult {
    /// Successfully parsed manifests, ordered by skill id.
    pub skills: Vec<SkillManifest>,
    /// Parse/load errors encountered.
    pub errors: Vec<DiscoveryError>,
}

/// Parse/load error details for a skill.
#[derive(Debug)]
pub struct DiscoveryError {
    /// Skill id (directory name).
    pub skill_id: String,
    /// Path to the SKILL.md file that failed.
    pub path: PathBuf,
    pub error: ManifestError,
}

/// Discover file skills under `skills_dir`.
///
/// - Missing directory: nothing found, no error
/// - Subdirectory without `SKILL.md`: not a skill, skipped
/// - Invalid `SKILL.md`: skipped, error recorded
pub fn discover_skills(skills_dir: &Path) -> DiscoveryResult {
    let mut skills = Vec::new();
    let mut errors = Vec::new();

    if !skills_dir.is_dir() {
        debug!(path = %skills_dir.display(), "skills directory not found, skipping");
        return DiscoveryResult { skills, errors };
    }

    let entries = match fs::read_dir(skills_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                path = %skills_dir.display(),
                error = %e,
                "failed to read skills directory"
            );
            return DiscoveryResult { skills, errors };
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let skill_dir = entry.path();
        if !skill_dir.is_dir() {
            continue;
        }

        let manifest_path = skill_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            debug!(path = %skill_dir.display(), "no SKILL.md found, skipping");
            continue;
        }

        let skill_id = skill_id_from_dir(&skill_dir).unwrap_or_else(|| "unknown".to_string());

        let content = match fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "failed to read SKILL.md"
                );
                errors.push(DiscoveryError {
                    skill_id,
                    path: manifest_path,
                    error: ManifestError::InvalidYaml(format!("IO error: {e}")),
                });
                continue;
            }
        };

        match parse_manifest(&content, skill_dir) {
            Ok(manifest) => skills.push(manifest),
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "failed to parse SKILL.md"
                );
                errors.push(DiscoveryError {
                    skill_id,
                    path: manifest_path,
                    error: e,
                });
            }
        }
    }

    skills.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));

    debug!(
        count = skills.len(),
        errors = errors.len(),
        "discovered file skills"
    );

    DiscoveryResult { skills, errors }
}

/// Named skill factories registered by the host binary.
#[derive(Default)]
pub struct FactoryCatalog {
    factories: RwLock<BTreeMap<String, Arc<dyn SkillFactory>>>,
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("names", &self.names())
            .finish()
    }
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: SkillFactory + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SkillFactory>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Registered `(name, factory)` pairs in name order.
    pub fn entries(&self) -> Vec<(String, Arc<dyn SkillFactory>)> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, factory)| (name.clone(), Arc::clone(factory)))
            .collect()
    }
}
