//! Unified registry of file and plugin skills.
//!
//! One map keyed by skill id. Each entry's loader carries its [`SkillSource`]. Plugin
//! entries take precedence: a file skill never replaces a plugin skill with the same id.
//! Single-entry updates are atomic with respect to readers; there are no cross-entry
//! transactions.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{info, warn};
use vox_core::{SkillListEntry, SkillSource, SkillStatus, ALL_SKILLS};

use super::loader::SkillLoader;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("skill id '{0}' is already registered by a plugin")]
    ShadowedByPlugin(String),
}

#[derive(Debug, Default)]
pub struct SkillRegistry {
    entries: RwLock<BTreeMap<String, Arc<SkillLoader>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<SkillLoader>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<SkillLoader>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a loader, returning the one it replaced.
    pub fn insert(&self, loader: Arc<SkillLoader>) -> Result<Option<Arc<SkillLoader>>, RegistryError> {
        let mut entries = self.write();
        if let Some(existing) = entries.get(loader.skill_id()) {
            if existing.source() == SkillSource::Plugin && loader.source() == SkillSource::File {
                return Err(RegistryError::ShadowedByPlugin(loader.skill_id().to_string()));
            }
        }
        Ok(entries.insert(loader.skill_id().to_string(), loader))
    }

    pub fn remove(&self, skill_id: &str) -> Option<Arc<SkillLoader>> {
        self.write().remove(skill_id)
    }

    pub fn get(&self, skill_id: &str) -> Option<Arc<SkillLoader>> {
        self.read().get(skill_id).map(Arc::clone)
    }

    pub fn contains(&self, skill_id: &str) -> bool {
        self.read().contains_key(skill_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All loaders in id order, released from the lock.
    pub fn loaders(&self) -> Vec<Arc<SkillLoader>> {
        self.read().values().map(Arc::clone).collect()
    }

    /// Loaders of one source in id order.
    pub fn loaders_from(&self, source: SkillSource) -> Vec<Arc<SkillLoader>> {
        self.read()
            .values()
            .filter(|loader| loader.source() == source)
            .map(Arc::clone)
            .collect()
    }

    /// Activate one skill, or every skill for `"all"`. Returns how many changed.
    pub fn activate(&self, target: &str) -> usize {
        let changed = self
            .loaders()
            .iter()
            .filter(|loader| target == ALL_SKILLS || loader.skill_id() == target)
            .filter(|loader| loader.activate())
            .count();
        if target != ALL_SKILLS && !self.contains(target) {
            warn!(skill_id = %target, "activate requested for unknown skill");
        }
        changed
    }

    /// Deactivate one skill. Returns false for unknown ids.
    pub fn deactivate(&self, skill_id: &str) -> bool {
        match self.get(skill_id) {
            Some(loader) => {
                loader.deactivate();
                true
            }
            None => {
                warn!(skill_id = %skill_id, "deactivate requested for unknown skill");
                false
            }
        }
    }

    /// Deactivate every skill except `skill_id`.
    ///
    /// Unknown ids change nothing. Returns whether the request was applied.
    pub fn deactivate_except(&self, skill_id: &str) -> bool {
        let loaders = self.loaders();
        if !loaders.iter().any(|loader| loader.skill_id() == skill_id) {
            info!(skill_id = %skill_id, "couldn't find skill to keep active");
            return false;
        }
        for loader in loaders.iter().filter(|loader| loader.skill_id() != skill_id) {
            loader.deactivate();
        }
        true
    }

    /// Skill-list outcome: id to entry, active meaning active and loaded.
    pub fn list(&self) -> BTreeMap<String, SkillListEntry> {
        self.read()
            .iter()
            .map(|(id, loader)| (id.clone(), loader.list_entry()))
            .collect()
    }

    pub fn statuses(&self) -> Vec<SkillStatus> {
        self.loaders().iter().map(|loader| loader.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusHandle, MessageBus};
    use crate::skills::loader::tests::TestSkill;
    use crate::skills::skill::{Result, Skill};
    use std::path::PathBuf;
    use vox_core::skills::SkillManifest;

    fn loaded_plugin(bus: &Arc<MessageBus>, id: &str) -> Arc<SkillLoader> {
        let loader = SkillLoader::plugin(id, BusHandle::shared(bus, id));
        loader.load(
            &|| -> Result<Box<dyn Skill>> { Ok(Box::new(TestSkill::default())) },
            false,
        );
        Arc::new(loader)
    }

    fn unloaded_file(bus: &Arc<MessageBus>, id: &str) -> Arc<SkillLoader> {
        let manifest = SkillManifest {
            skill_id: id.to_string(),
            entry: "entry".to_string(),
            name: id.to_string(),
            description: None,
            metadata: Default::default(),
            path: PathBuf::from("/skills").join(id),
        };
        Arc::new(SkillLoader::file(&manifest, BusHandle::shared(bus, id)))
    }

    fn registry_with(ids: &[&str]) -> SkillRegistry {
        let bus = Arc::new(MessageBus::new());
        let registry = SkillRegistry::new();
        for id in ids {
            registry.insert(loaded_plugin(&bus, id)).unwrap();
        }
        registry
    }

    #[test]
    fn plugin_entries_take_precedence() {
        let bus = Arc::new(MessageBus::new());
        let registry = SkillRegistry::new();
        registry.insert(loaded_plugin(&bus, "timer")).unwrap();

        let err = registry.insert(unloaded_file(&bus, "timer")).unwrap_err();
        assert_eq!(err, RegistryError::ShadowedByPlugin("timer".to_string()));
        assert_eq!(registry.get("timer").unwrap().source(), SkillSource::Plugin);
    }

    #[test]
    fn plugin_replaces_file_entry() {
        let bus = Arc::new(MessageBus::new());
        let registry = SkillRegistry::new();
        registry.insert(unloaded_file(&bus, "timer")).unwrap();

        let replaced = registry.insert(loaded_plugin(&bus, "timer")).unwrap();
        assert_eq!(replaced.unwrap().source(), SkillSource::File);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn activate_all_then_list_reports_every_loaded_skill_active() {
        let registry = registry_with(&["alarm", "timer", "weather"]);
        registry.deactivate("alarm");
        registry.deactivate("weather");

        assert_eq!(registry.activate(ALL_SKILLS), 2);
        let list = registry.list();
        assert_eq!(list.len(), 3);
        assert!(list.values().all(|entry| entry.active));
    }

    #[test]
    fn activate_all_covers_both_sources() {
        let bus = Arc::new(MessageBus::new());
        let registry = SkillRegistry::new();
        let file = unloaded_file(&bus, "notes");
        file.deactivate();
        registry.insert(file).unwrap();
        let plugin = loaded_plugin(&bus, "timer");
        plugin.deactivate();
        registry.insert(plugin).unwrap();

        assert_eq!(registry.activate(ALL_SKILLS), 2);
        assert!(registry.loaders().iter().all(|l| l.is_active()));
        // Active but not loaded still lists inactive.
        assert!(!registry.list()["notes"].active);
        assert!(registry.list()["timer"].active);
    }

    #[test]
    fn deactivate_unknown_is_reported_not_fatal() {
        let registry = registry_with(&["timer"]);
        assert!(!registry.deactivate("nope"));
        assert!(registry.deactivate("timer"));
        assert!(!registry.list()["timer"].active);
    }

    #[test]
    fn deactivate_except_known_keeps_only_target() {
        let registry = registry_with(&["alarm", "timer", "weather"]);
        assert!(registry.deactivate_except("timer"));
        let list = registry.list();
        assert!(list["timer"].active);
        assert!(!list["alarm"].active);
        assert!(!list["weather"].active);
    }

    #[test]
    fn deactivate_except_unknown_changes_nothing() {
        let registry = registry_with(&["alarm", "timer"]);
        registry.deactivate("alarm");
        let before = registry.list();

        assert!(!registry.deactivate_except("ghost"));
        assert_eq!(registry.list(), before);
    }

    #[test]
    fn activate_single_skill() {
        let registry = registry_with(&["alarm", "timer"]);
        registry.deactivate("alarm");
        registry.deactivate("timer");
        assert_eq!(registry.activate("timer"), 1);
        assert_eq!(registry.activate("timer"), 0);
        assert_eq!(registry.activate("ghost"), 0);
        assert!(registry.list()["timer"].active);
        assert!(!registry.list()["alarm"].active);
    }

    #[test]
    fn loaders_from_filters_by_source() {
        let bus = Arc::new(MessageBus::new());
        let registry = SkillRegistry::new();
        registry.insert(unloaded_file(&bus, "notes")).unwrap();
        registry.insert(loaded_plugin(&bus, "timer")).unwrap();

        let files = registry.loaders_from(SkillSource::File);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].skill_id(), "notes");
        assert_eq!(registry.statuses().len(), 2);
    }
}
