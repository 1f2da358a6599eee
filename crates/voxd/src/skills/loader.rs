//! Per-skill load lifecycle.
//!
//! A [`SkillLoader`] owns at most one live skill instance and drives each load attempt
//! through [`LoadPhase`]:
//!
//! ```text
//! PREPARING -> BLACKLISTED -> SKIPPED
//! PREPARING -> CONSTRUCTING -> FAILED
//!                           -> CONSTRUCTED -> INITIALIZING -> FAILED_ROLLBACK
//!                                                          -> LOADED
//! ```
//!
//! Construction failures leave nothing to clean up. Initialization failures run the
//! instance's shutdown hook before it is dropped; a failing shutdown is only logged
//! at debug level. Skill code runs under [`contain`] so panics take the same paths.
//!
//! Converse calls hold their own reference to the instance rather than the loader's
//! lock, so a skill may trigger an unload of itself from inside converse. The shutdown
//! hook then runs once that call returns.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};
use vox_core::events::{MessageType, SkillLoadedPayload, SkillLoadingFailurePayload, SpeakPayload};
use vox_core::skills::{SkillManifest, MANIFEST_FILE};
use vox_core::{LoadPhase, Message, SkillListEntry, SkillSource, SkillStatus};

use super::skill::{
    contain, ConverseStyle, Result, Skill, SkillContext, SkillError, SkillFactory, SkillSettings,
    FIRST_RUN_KEY,
};
use crate::bus::BusHandle;

/// Settings metadata files looked up in a skill's root directory, in order.
const SETTINGS_META_FILES: [&str; 2] = ["settingsmeta.json", "settingsmeta.yaml"];

#[derive(Debug, Default)]
struct LoaderState {
    phase: LoadPhase,
    converse_style: ConverseStyle,
    name: Option<String>,
    root_dir: Option<PathBuf>,
    last_loaded: Option<DateTime<Utc>>,
    activated_at: Option<DateTime<Utc>>,
    settings_meta: Option<Value>,
}

/// A loaded skill instance. Its shutdown hook runs when the last holder drops it.
struct LiveInstance {
    skill_id: String,
    skill: Box<dyn Skill>,
}

impl Drop for LiveInstance {
    fn drop(&mut self) {
        let skill = &mut self.skill;
        if let Err(e) = contain(|| skill.shutdown()) {
            error!(skill_id = %self.skill_id, error = %e, "skill shutdown failed");
        }
    }
}

/// Load record for one skill.
pub struct SkillLoader {
    skill_id: String,
    source: SkillSource,
    /// Skill directory; only file skills have one.
    directory: Option<PathBuf>,
    /// Factory entry named by the manifest; only file skills have one.
    entry: Option<String>,
    bus: BusHandle,
    settings: SkillSettings,
    instance: RwLock<Option<Arc<LiveInstance>>>,
    state: Mutex<LoaderState>,
    loaded: AtomicBool,
    active: AtomicBool,
}

impl fmt::Debug for SkillLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillLoader")
            .field("skill_id", &self.skill_id)
            .field("source", &self.source)
            .field("loaded", &self.is_loaded())
            .field("active", &self.is_active())
            .field("phase", &self.phase())
            .finish()
    }
}

impl SkillLoader {
    /// Loader for a plugin skill registered under `skill_id`.
    pub fn plugin(skill_id: impl Into<String>, bus: BusHandle) -> Self {
        Self::new(skill_id.into(), SkillSource::Plugin, None, None, bus)
    }

    /// Loader for a file skill described by `manifest`.
    pub fn file(manifest: &SkillManifest, bus: BusHandle) -> Self {
        Self::new(
            manifest.skill_id.clone(),
            SkillSource::File,
            Some(manifest.path.clone()),
            Some(manifest.entry.clone()),
            bus,
        )
    }

    fn new(
        skill_id: String,
        source: SkillSource,
        directory: Option<PathBuf>,
        entry: Option<String>,
        bus: BusHandle,
    ) -> Self {
        let state = LoaderState {
            root_dir: directory.clone(),
            ..LoaderState::default()
        };
        Self {
            skill_id,
            source,
            directory,
            entry,
            bus,
            settings: SkillSettings::new(),
            instance: RwLock::new(None),
            state: Mutex::new(state),
            loaded: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    pub fn skill_id(&self) -> &str {
        &self.skill_id
    }

    pub fn source(&self) -> SkillSource {
        self.source
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn settings(&self) -> &SkillSettings {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> LoadPhase {
        self.state().phase
    }

    pub fn converse_style(&self) -> ConverseStyle {
        self.state().converse_style
    }

    pub fn last_loaded(&self) -> Option<DateTime<Utc>> {
        self.state().last_loaded
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.state().activated_at
    }

    pub fn settings_meta(&self) -> Option<Value> {
        self.state().settings_meta.clone()
    }

    /// Display name reported by the instance, falling back to the id.
    pub fn name(&self) -> String {
        self.state()
            .name
            .clone()
            .unwrap_or_else(|| self.skill_id.clone())
    }

    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, next: LoadPhase) {
        let mut state = self.state();
        if next != LoadPhase::Preparing && !state.phase.can_transition_to(next) {
            warn!(
                skill_id = %self.skill_id,
                from = state.phase.as_str(),
                to = next.as_str(),
                "unexpected load phase transition"
            );
        }
        state.phase = next;
    }

    /// Mark active. Returns false when the skill already was.
    pub fn activate(&self) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state().activated_at = Some(Utc::now());
        true
    }

    /// Mark inactive. Returns false when the skill already was.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Entry for the skill-list outcome: active means active and loaded.
    pub fn list_entry(&self) -> SkillListEntry {
        SkillListEntry {
            active: self.is_active() && self.is_loaded(),
            id: self.skill_id.clone(),
        }
    }

    pub fn status(&self) -> SkillStatus {
        let state = self.state();
        SkillStatus {
            skill_id: self.skill_id.clone(),
            source: self.source,
            loaded: self.is_loaded(),
            active: self.is_active(),
            phase: state.phase,
            directory: self.directory.as_ref().map(|d| d.display().to_string()),
            last_loaded: state.last_loaded,
        }
    }

    /// Whether the skill must be reloaded from disk.
    ///
    /// Plugin skills never are. File skills are when their manifest changed after
    /// the last load attempt.
    pub fn reload_needed(&self) -> bool {
        let Some(dir) = &self.directory else {
            return false;
        };
        if self.source == SkillSource::Plugin {
            return false;
        }
        let Some(last_loaded) = self.last_loaded() else {
            return true;
        };
        match fs::metadata(dir.join(MANIFEST_FILE)).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified) > last_loaded,
            Err(_) => false,
        }
    }

    /// Run one load attempt. Returns whether the skill ended up loaded.
    ///
    /// A previously loaded instance is shut down first.
    pub fn load(&self, factory: &dyn SkillFactory, blacklisted: bool) -> bool {
        self.prepare();

        let loaded = if blacklisted {
            self.set_phase(LoadPhase::Blacklisted);
            info!(skill_id = %self.skill_id, "skill is blacklisted, it will not be loaded");
            self.set_phase(LoadPhase::Skipped);
            false
        } else {
            match self.create_instance(factory) {
                Some(instance) => {
                    self.check_for_first_run(instance.as_ref());
                    self.store_instance(instance);
                    self.set_phase(LoadPhase::Loaded);
                    true
                }
                None => false,
            }
        };

        self.state().last_loaded = Some(Utc::now());
        self.loaded.store(loaded, Ordering::SeqCst);

        if loaded {
            info!(skill_id = %self.skill_id, source = self.source.as_str(), "skill loaded");
            self.prepare_settings_meta();
        }
        self.communicate_load_status(loaded);
        loaded
    }

    fn prepare(&self) {
        if self.instance_present() {
            self.shutdown();
        }
        self.loaded.store(false, Ordering::SeqCst);
        self.set_phase(LoadPhase::Preparing);
    }

    fn instance_present(&self) -> bool {
        self.instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn create_instance(&self, factory: &dyn SkillFactory) -> Option<Box<dyn Skill>> {
        self.set_phase(LoadPhase::Constructing);
        let mut instance = match contain(|| factory.create()) {
            Ok(instance) => instance,
            Err(e) => {
                error!(skill_id = %self.skill_id, error = %e, "skill construction failed");
                self.set_phase(LoadPhase::Failed);
                return None;
            }
        };
        self.set_phase(LoadPhase::Constructed);

        self.set_phase(LoadPhase::Initializing);
        if let Err(e) = self.initialize_instance(instance.as_mut()) {
            error!(skill_id = %self.skill_id, error = %e, "skill initialization failed");
            if let Err(shutdown_err) = contain(|| instance.shutdown()) {
                debug!(
                    skill_id = %self.skill_id,
                    error = %shutdown_err,
                    "shutdown of partially initialized skill failed"
                );
            }
            self.bus.detach();
            self.set_phase(LoadPhase::FailedRollback);
            return None;
        }

        Some(instance)
    }

    fn initialize_instance(&self, instance: &mut dyn Skill) -> Result<()> {
        let context = SkillContext {
            skill_id: self.skill_id.clone(),
            bus: self.bus.clone(),
            settings: self.settings.clone(),
            root_dir: self.directory.clone(),
        };
        contain(|| {
            instance.bind(context);
            instance.load_data_files()?;
            instance.register_intents()?;
            instance.register_resting_screen()?;
            instance.initialize()
        })
    }

    fn store_instance(&self, instance: Box<dyn Skill>) {
        {
            let mut state = self.state();
            state.converse_style = instance.converse_style();
            state.name = Some(instance.name().to_string());
            if let Some(root) = instance.root_dir() {
                state.root_dir = Some(root);
            }
            state.settings_meta = instance.settings_meta();
        }
        let live = Arc::new(LiveInstance {
            skill_id: self.skill_id.clone(),
            skill: instance,
        });
        *self.instance.write().unwrap_or_else(PoisonError::into_inner) = Some(live);
    }

    fn check_for_first_run(&self, instance: &dyn Skill) {
        let first_run = self
            .settings
            .get(FIRST_RUN_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if !first_run {
            return;
        }

        info!(skill_id = %self.skill_id, "first run of skill");
        self.settings.set(FIRST_RUN_KEY, false);
        if let Some(intro) = instance.intro_message().filter(|m| !m.is_empty()) {
            self.bus.emit(Message::from_payload(
                MessageType::Speak,
                &SpeakPayload {
                    utterance: intro,
                    expect_response: false,
                },
            ));
        }
    }

    fn prepare_settings_meta(&self) {
        let root = {
            let state = self.state();
            if state.settings_meta.is_some() {
                return;
            }
            state.root_dir.clone()
        };
        let Some(root) = root else {
            return;
        };

        for file in SETTINGS_META_FILES {
            let path = root.join(file);
            if !path.exists() {
                continue;
            }
            match read_settings_meta(&path) {
                Ok(meta) => {
                    debug!(skill_id = %self.skill_id, path = %path.display(), "settings metadata loaded");
                    self.state().settings_meta = Some(meta);
                }
                Err(e) => {
                    warn!(
                        skill_id = %self.skill_id,
                        path = %path.display(),
                        error = %e,
                        "failed to read settings metadata"
                    );
                }
            }
            return;
        }
    }

    fn communicate_load_status(&self, loaded: bool) {
        let path = self
            .directory
            .as_ref()
            .map_or_else(|| self.skill_id.clone(), |d| d.display().to_string());
        let message = if loaded {
            Message::from_payload(
                MessageType::SkillLoaded,
                &SkillLoadedPayload {
                    path,
                    id: self.skill_id.clone(),
                    name: self.name(),
                },
            )
        } else {
            Message::from_payload(
                MessageType::SkillLoadingFailure,
                &SkillLoadingFailurePayload {
                    path,
                    id: self.skill_id.clone(),
                },
            )
        };
        self.bus.emit(message);
    }

    /// Shut the instance down and drop it.
    ///
    /// When a converse call is still running on the instance, its shutdown hook runs as
    /// soon as that call returns.
    pub fn shutdown(&self) {
        let instance = self
            .instance
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.loaded.store(false, Ordering::SeqCst);

        let Some(instance) = instance else {
            return;
        };
        if Arc::strong_count(&instance) > 1 {
            debug!(skill_id = %self.skill_id, "skill busy in converse, deferring its shutdown hook");
        }
        drop(instance);
        let detached = self.bus.detach();
        debug!(skill_id = %self.skill_id, handlers = detached, "skill unloaded");
    }

    /// Offer a turn to the instance through its declared converse style.
    pub fn converse(&self, message: &Message, utterances: &[String], lang: &str) -> Result<bool> {
        let style = self.converse_style();
        let instance = self
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone);
        let Some(instance) = instance else {
            return Err(SkillError::NotLoaded);
        };
        contain(|| match style {
            ConverseStyle::Context => instance.skill.converse_with_context(message),
            ConverseStyle::Utterances => instance.skill.converse_with_utterances(utterances, lang),
            ConverseStyle::None => Ok(false),
        })
    }
}

fn read_settings_meta(path: &Path) -> std::result::Result<Value, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
    }
}
