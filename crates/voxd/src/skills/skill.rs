//! The skill capability interface.
//!
//! A skill is any type implementing [`Skill`]. Every lifecycle hook has a no-op default,
//! so a minimal skill only names itself. Converse support is declared through
//! [`Skill::converse_style`], which the loader reads once when the skill loads.

use serde_json::{Map, Value};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use vox_core::Message;

use crate::bus::BusHandle;

/// Settings key marking that a skill has not yet completed its first load.
pub const FIRST_RUN_KEY: &str = "__first_run";

/// Errors raised by skill code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkillError {
    #[error("{0}")]
    Failed(String),
    #[error("skill panicked: {0}")]
    Panicked(String),
    #[error("skill instance is not loaded")]
    NotLoaded,
    #[error("no factory registered for entry '{0}'")]
    UnknownEntry(String),
}

impl SkillError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SkillError>;

/// Which converse call convention a skill implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConverseStyle {
    /// Does not converse; every request is declined.
    #[default]
    None,
    /// Receives the whole turn message.
    Context,
    /// Receives utterances and language separately.
    Utterances,
}

/// Per-skill settings shared between the loader and the skill instance.
#[derive(Debug, Clone, Default)]
pub struct SkillSettings(Arc<Mutex<Map<String, Value>>>);

impl SkillSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.into());
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Runtime services bound to a skill instance before it initializes.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub skill_id: String,
    pub bus: BusHandle,
    pub settings: SkillSettings,
    /// Skill directory for file skills.
    pub root_dir: Option<PathBuf>,
}

/// A loadable conversational skill.
pub trait Skill: Send + Sync {
    /// Display name.
    fn name(&self) -> &str;

    /// Receive runtime services. Called once, before any other hook.
    fn bind(&mut self, _context: SkillContext) {}

    fn load_data_files(&mut self) -> Result<()> {
        Ok(())
    }

    fn register_intents(&mut self) -> Result<()> {
        Ok(())
    }

    fn register_resting_screen(&mut self) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Spoken the first time the skill loads.
    fn intro_message(&self) -> Option<String> {
        None
    }

    /// Directory holding the skill's resources, if any.
    fn root_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Settings metadata supplied in code; overrides a `settingsmeta` file.
    fn settings_meta(&self) -> Option<Value> {
        None
    }

    fn converse_style(&self) -> ConverseStyle {
        ConverseStyle::None
    }

    /// Claim a turn given its full message. Return `true` to claim it.
    fn converse_with_context(&self, _message: &Message) -> Result<bool> {
        Ok(false)
    }

    /// Claim a turn given its utterances and language. Return `true` to claim it.
    fn converse_with_utterances(&self, _utterances: &[String], _lang: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Constructs fresh skill instances.
pub trait SkillFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Skill>>;
}

impl<F> SkillFactory for F
where
    F: Fn() -> Result<Box<dyn Skill>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Skill>> {
        self()
    }
}

/// Run skill code, turning a panic into [`SkillError::Panicked`].
pub(crate) fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(SkillError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl Skill for Minimal {
        fn name(&self) -> &str {
            "minimal"
        }
    }

    #[test]
    fn defaults_decline_converse() {
        let skill = Minimal;
        assert_eq!(skill.converse_style(), ConverseStyle::None);
        let msg = Message::default();
        assert_eq!(skill.converse_with_context(&msg), Ok(false));
        assert_eq!(skill.converse_with_utterances(&[], "en-us"), Ok(false));
    }

    #[test]
    fn closures_are_factories() {
        let factory = || -> Result<Box<dyn Skill>> { Ok(Box::new(Minimal)) };
        let skill = factory.create().unwrap();
        assert_eq!(skill.name(), "minimal");
    }

    #[test]
    fn contain_converts_panics() {
        let result: Result<()> = contain(|| panic!("kaboom"));
        assert_eq!(result, Err(SkillError::Panicked("kaboom".to_string())));

        let formatted: Result<()> = contain(|| panic!("code {}", 7));
        assert_eq!(formatted, Err(SkillError::Panicked("code 7".to_string())));
    }

    #[test]
    fn contain_passes_through_results() {
        assert_eq!(contain(|| Ok(3)), Ok(3));
        assert_eq!(
            contain::<()>(|| Err(SkillError::failed("nope"))),
            Err(SkillError::Failed("nope".to_string()))
        );
    }

    #[test]
    fn settings_are_shared_between_clones() {
        let settings = SkillSettings::new();
        let other = settings.clone();
        other.set(FIRST_RUN_KEY, false);
        assert_eq!(settings.get(FIRST_RUN_KEY), Some(Value::Bool(false)));
    }
}
