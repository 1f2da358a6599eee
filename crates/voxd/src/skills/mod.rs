//! Skill lifecycle for the daemon.
//!
//! Skills come from two places: plugin factories registered by the host binary, and
//! directories under the skills directory whose `SKILL.md` names a registered entry.
//! Both end up in one [`SkillRegistry`] keyed by skill id.

mod catalog;
mod converse;
mod install;
pub(crate) mod loader;
mod manager;
mod metrics;
mod registry;
mod skill;

pub use catalog::{discover_skills, DiscoveryError, DiscoveryResult, FactoryCatalog};
pub use converse::{ConverseDispatcher, ConverseFailure, ConverseOutcome};
pub use install::{
    fetch_remote_entries, install_skills_from_list, parse_entries, skill_dir_name, GitInstaller,
    InstallError, InstallReport, SkillInstaller,
};
pub use loader::SkillLoader;
pub use manager::SkillManager;
pub use metrics::{MetricsSnapshot, SkillsMetrics};
pub use registry::{RegistryError, SkillRegistry};
pub(crate) use skill::panic_message;
pub use skill::{
    ConverseStyle, Skill, SkillContext, SkillError, SkillFactory, SkillSettings, FIRST_RUN_KEY,
};
