//! Skill manager.
//!
//! Owns the skill registry and keeps it in step with the plugin catalog and the skills
//! directory: loads new skills, reloads modified file skills, drops file skills whose
//! directory disappeared, answers skill-management requests from the bus, and shuts
//! every instance down on stop.
//!
//! Loads run one at a time on a blocking thread. There is no per-skill load timeout, so
//! a skill whose initialize hook hangs holds up the loads queued behind it.

use serde_json::Map;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vox_core::events::{MessageType, SkillTargetPayload};
use vox_core::message::to_data;
use vox_core::skills::{parse_manifest, SkillManifest, MANIFEST_FILE};
use vox_core::{Config, LoadPhase, Message, SkillSource};

use super::catalog::{discover_skills, FactoryCatalog};
use super::converse::ConverseDispatcher;
use super::install::{fetch_remote_entries, install_skills_from_list, SkillInstaller};
use super::loader::SkillLoader;
use super::metrics::SkillsMetrics;
use super::registry::SkillRegistry;
use super::skill::{Skill, SkillError, SkillFactory};
use crate::bus::{BusHandle, MessageBus};

pub struct SkillManager {
    config: Arc<Config>,
    bus: Arc<MessageBus>,
    registry: Arc<SkillRegistry>,
    /// Plugin skills by skill id.
    plugins: Arc<FactoryCatalog>,
    /// File-skill factories by manifest entry name.
    entries: Arc<FactoryCatalog>,
    dispatcher: Arc<ConverseDispatcher>,
    metrics: Arc<SkillsMetrics>,
    installer: Option<Arc<dyn SkillInstaller>>,
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for SkillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillManager")
            .field("skills_dir", &self.config.skills_dir)
            .field("registered", &self.registry.len())
            .field("installer", &self.installer.is_some())
            .finish()
    }
}

impl SkillManager {
    pub fn new(
        config: Arc<Config>,
        bus: Arc<MessageBus>,
        plugins: Arc<FactoryCatalog>,
        entries: Arc<FactoryCatalog>,
    ) -> Self {
        let registry = Arc::new(SkillRegistry::new());
        let metrics = Arc::new(SkillsMetrics::new());
        let dispatcher = Arc::new(ConverseDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));
        Self {
            config,
            bus,
            registry,
            plugins,
            entries,
            dispatcher,
            metrics,
            installer: None,
            load_lock: Mutex::new(()),
        }
    }

    /// Install default skills with `installer` before the first load pass.
    pub fn with_installer(mut self, installer: Arc<dyn SkillInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ConverseDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<SkillsMetrics> {
        &self.metrics
    }

    /// Bus handle for a newly loaded skill.
    fn skill_bus(&self, skill_id: &str) -> BusHandle {
        if self.config.shared_connection {
            BusHandle::shared(&self.bus, skill_id)
        } else {
            BusHandle::scoped(&self.bus, skill_id)
        }
    }

    fn record(&self, loader: &SkillLoader) {
        match loader.phase() {
            LoadPhase::Loaded => self.metrics.inc_loaded(),
            LoadPhase::Skipped => self.metrics.inc_skipped(),
            _ => self.metrics.inc_load_failed(),
        }
    }

    /// Load every plugin skill and file skill that is not registered yet.
    ///
    /// Returns how many skills loaded successfully.
    pub fn load_new_skills(&self) -> usize {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut loaded = 0;

        for (skill_id, factory) in self.plugins.entries() {
            let known_plugin = self
                .registry
                .get(&skill_id)
                .is_some_and(|loader| loader.source() == SkillSource::Plugin);
            if known_plugin {
                continue;
            }
            if self.load_plugin_skill(&skill_id, factory.as_ref()) {
                loaded += 1;
            }
        }

        let discovery = discover_skills(&self.config.skills_dir);
        for manifest in &discovery.skills {
            match self.registry.get(&manifest.skill_id) {
                Some(existing) if existing.source() == SkillSource::Plugin => {
                    debug!(skill_id = %manifest.skill_id, "file skill shadowed by plugin skill");
                    continue;
                }
                Some(_) => continue,
                None => {}
            }
            if self.load_file_skill(manifest) {
                loaded += 1;
            }
        }

        loaded
    }

    /// Load a plugin skill and register it, replacing a file skill with the same id.
    pub fn load_plugin_skill(&self, skill_id: &str, factory: &dyn SkillFactory) -> bool {
        let loader = Arc::new(SkillLoader::plugin(skill_id, self.skill_bus(skill_id)));
        let loaded = loader.load(factory, self.config.is_blacklisted(skill_id));
        self.record(&loader);
        self.register(loader);
        loaded
    }

    fn load_file_skill(&self, manifest: &SkillManifest) -> bool {
        let loader = Arc::new(SkillLoader::file(
            manifest,
            self.skill_bus(&manifest.skill_id),
        ));
        let loaded = self.load_from_entry(&loader);
        self.register(loader);
        loaded
    }

    fn load_from_entry(&self, loader: &SkillLoader) -> bool {
        let entry = loader.entry().unwrap_or_default().to_string();
        let blacklisted = self.config.is_blacklisted(loader.skill_id());
        let factory = self.entries.get(&entry);
        let loaded = match factory {
            Some(factory) => loader.load(factory.as_ref(), blacklisted),
            None => {
                let missing = move || -> Result<Box<dyn Skill>, SkillError> {
                    Err(SkillError::UnknownEntry(entry.clone()))
                };
                loader.load(&missing, blacklisted)
            }
        };
        self.record(loader);
        loaded
    }

    fn register(&self, loader: Arc<SkillLoader>) {
        match self.registry.insert(Arc::clone(&loader)) {
            Ok(Some(replaced)) => {
                info!(
                    skill_id = %replaced.skill_id(),
                    source = replaced.source().as_str(),
                    "replacing registered skill"
                );
                replaced.shutdown();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "skill not registered");
                loader.shutdown();
            }
        }
    }

    /// Reload file skills whose manifest changed and drop those that were removed.
    ///
    /// Returns how many skills were reloaded.
    pub fn reload_modified(&self) -> usize {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reloaded = 0;

        for loader in self.registry.loaders_from(SkillSource::File) {
            let Some(dir) = loader.directory().map(|d| d.to_path_buf()) else {
                continue;
            };
            let manifest_path = dir.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                info!(skill_id = %loader.skill_id(), "skill removed, unloading");
                loader.shutdown();
                self.registry.remove(loader.skill_id());
                continue;
            }
            if !loader.reload_needed() {
                continue;
            }

            let manifest = match fs::read_to_string(&manifest_path)
                .map_err(|e| e.to_string())
                .and_then(|content| parse_manifest(&content, dir.clone()).map_err(|e| e.to_string()))
            {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(skill_id = %loader.skill_id(), error = %e, "modified SKILL.md is invalid, keeping current instance");
                    continue;
                }
            };

            info!(skill_id = %loader.skill_id(), "reloading modified skill");
            let ok = if loader.entry() == Some(manifest.entry.as_str()) {
                self.load_from_entry(&loader)
            } else {
                loader.shutdown();
                self.registry.remove(loader.skill_id());
                self.load_file_skill(&manifest)
            };
            if ok {
                reloaded += 1;
            }
        }

        reloaded
    }

    /// Shut down every loaded skill.
    pub fn stop(&self) {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for loader in self.registry.loaders() {
            loader.shutdown();
        }
        info!("all skills shut down");
    }

    /// Emit the skill list, as a reply to `request` when there is one.
    pub fn send_skill_list(&self, request: Option<&Message>) {
        let data = to_data(&self.registry.list());
        let message = match request {
            Some(request) => request.reply(MessageType::SkillList.as_str(), data),
            None => Message::new(MessageType::SkillList.as_str(), data),
        };
        self.bus.emit(message);
    }

    fn target(message: &Message) -> Option<String> {
        match message.payload::<SkillTargetPayload>() {
            Ok(payload) => Some(payload.skill),
            Err(e) => {
                warn!(msg_type = %message.msg_type, error = %e, "missing skill in request");
                None
            }
        }
    }

    /// Attach skill-management handlers to the bus.
    pub fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::SkillListRequest, move |message| {
            if let Some(manager) = weak.upgrade() {
                manager.send_skill_list(Some(message));
            }
        });

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::SkillActivate, move |message| {
            if let (Some(manager), Some(skill)) = (weak.upgrade(), Self::target(message)) {
                manager.registry.activate(&skill);
            }
        });

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::SkillDeactivate, move |message| {
            if let (Some(manager), Some(skill)) = (weak.upgrade(), Self::target(message)) {
                manager.registry.deactivate(&skill);
            }
        });

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::SkillKeep, move |message| {
            if let (Some(manager), Some(skill)) = (weak.upgrade(), Self::target(message)) {
                manager.registry.deactivate_except(&skill);
            }
        });

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::ConverseRequest, move |message| {
            if let Some(manager) = weak.upgrade() {
                manager
                    .dispatcher
                    .handle_request(message, &manager.config.lang_user);
            }
        });
    }

    /// Install or update default skills. Failures are logged.
    pub async fn download_or_update_defaults(&self) {
        if !self.config.skills_auto_update {
            return;
        }
        let Some(installer) = self.installer.as_ref().map(Arc::clone) else {
            debug!("no skill installer configured");
            return;
        };

        let mut urls = self.config.default_skills.clone();
        if let Some(list_url) = &self.config.default_skills_url {
            match fetch_remote_entries(list_url).await {
                Ok(entries) => urls.extend(entries),
                Err(e) => warn!(url = %list_url, error = %e, "failed to fetch default skill list"),
            }
        }
        if urls.is_empty() {
            return;
        }

        let skills_dir = self.config.skills_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            install_skills_from_list(installer.as_ref(), &urls, &skills_dir)
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "default skill installation failed");
        }
    }

    /// Install defaults, load skills, then check for new and modified skills until
    /// cancelled. Loaded skills are shut down on the way out.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.download_or_update_defaults().await;

        let manager = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || manager.load_new_skills()).await {
            Ok(count) => info!(loaded = count, registered = self.registry.len(), "skills loaded"),
            Err(e) => error!(error = %e, "initial skill load failed"),
        }
        self.bus
            .emit(Message::new(MessageType::SkillsInitialized.as_str(), Map::new()));

        let period = Duration::from_secs(self.config.skills_reload_interval_sec.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let manager = Arc::clone(&self);
                    let result = tokio::task::spawn_blocking(move || {
                        let reloaded = manager.reload_modified();
                        let added = manager.load_new_skills();
                        (reloaded, added)
                    })
                    .await;
                    match result {
                        Ok((0, 0)) => {}
                        Ok((reloaded, added)) => info!(reloaded, added, "skills updated"),
                        Err(e) => error!(error = %e, "skill update pass failed"),
                    }
                }
            }
        }

        let manager = Arc::clone(&self);
        if let Err(e) = tokio::task::spawn_blocking(move || manager.stop()).await {
            error!(error = %e, "skill shutdown failed");
        }
    }
}
