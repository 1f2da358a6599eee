//! Core types shared by the daemon and the control client.
//!
//! Skill identity, load lifecycle phases, and the shapes reported by skill-list queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wildcard skill id accepted by activation requests.
pub const ALL_SKILLS: &str = "all";

/// Where a skill was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    /// A directory under the managed skills directory.
    File,
    /// A factory registered with the plugin catalog.
    Plugin,
}

impl SkillSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Plugin => "plugin",
        }
    }
}

/// Phase of a single skill load attempt.
///
/// `Preparing -> Blacklisted -> Skipped`, or
/// `Preparing -> Constructing -> (Failed | Constructed) -> Initializing -> (FailedRollback | Loaded)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadPhase {
    #[default]
    Preparing,
    Blacklisted,
    Skipped,
    Constructing,
    Failed,
    Constructed,
    Initializing,
    FailedRollback,
    Loaded,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "PREPARING",
            Self::Blacklisted => "BLACKLISTED",
            Self::Skipped => "SKIPPED",
            Self::Constructing => "CONSTRUCTING",
            Self::Failed => "FAILED",
            Self::Constructed => "CONSTRUCTED",
            Self::Initializing => "INITIALIZING",
            Self::FailedRollback => "FAILED_ROLLBACK",
            Self::Loaded => "LOADED",
        }
    }

    /// Check whether `next` is a legal successor of this phase.
    pub fn can_transition_to(&self, next: LoadPhase) -> bool {
        matches!(
            (self, next),
            (Self::Preparing, Self::Blacklisted)
                | (Self::Preparing, Self::Constructing)
                | (Self::Blacklisted, Self::Skipped)
                | (Self::Constructing, Self::Failed)
                | (Self::Constructing, Self::Constructed)
                | (Self::Constructed, Self::Initializing)
                | (Self::Initializing, Self::FailedRollback)
                | (Self::Initializing, Self::Loaded)
        )
    }
}

/// One entry of the skill-list outcome (`mycroft.skills.list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillListEntry {
    /// True only when the skill is both active and loaded.
    pub active: bool,
    pub id: String,
}

/// Detailed view of one registered skill, used by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStatus {
    pub skill_id: String,
    pub source: SkillSource,
    pub loaded: bool,
    pub active: bool,
    pub phase: LoadPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_loaded: Option<DateTime<Utc>>,
}

/// Default language codes supplied at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangConfig {
    /// Language the assistant uses internally.
    pub internal: String,
    /// Language assumed for user input when a message carries none.
    pub user: String,
}

impl Default for LangConfig {
    fn default() -> Self {
        Self {
            internal: "en-us".to_string(),
            user: "en-us".to_string(),
        }
    }
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_phase_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&LoadPhase::FailedRollback).unwrap(),
            "\"FAILED_ROLLBACK\""
        );
        assert_eq!(LoadPhase::FailedRollback.as_str(), "FAILED_ROLLBACK");
    }

    #[test]
    fn load_phase_transitions_follow_lifecycle() {
        assert!(LoadPhase::Preparing.can_transition_to(LoadPhase::Constructing));
        assert!(LoadPhase::Preparing.can_transition_to(LoadPhase::Blacklisted));
        assert!(LoadPhase::Constructed.can_transition_to(LoadPhase::Initializing));
        assert!(!LoadPhase::Constructing.can_transition_to(LoadPhase::Loaded));
        assert!(!LoadPhase::Failed.can_transition_to(LoadPhase::Initializing));
        assert!(!LoadPhase::Blacklisted.can_transition_to(LoadPhase::Constructing));
    }

    #[test]
    fn skill_source_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SkillSource::Plugin).unwrap(), "\"plugin\"");
        assert_eq!(SkillSource::File.as_str(), "file");
    }

    #[test]
    fn epoch_seconds_keeps_fraction() {
        let at = DateTime::from_timestamp(10, 500_000_000).unwrap();
        assert!((epoch_seconds(at) - 10.5).abs() < f64::EPSILON);
    }
}
