//! Bus channel names and payloads.
//!
//! Channel names keep the wire names the rest of the assistant stack already listens on,
//! including the legacy converse error and activation channels.

use serde::{Deserialize, Serialize};

/// Bus channels the orchestration core subscribes or publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A spoken or typed turn arrived.
    Utterance,
    /// Acknowledges that an utterance turn was accepted for handling.
    UtteranceAccepted,
    /// Turn dropped because no usable utterance survived finalization.
    IntentAborted,
    /// Neither converse nor intent matching handled the turn.
    CompleteIntentFailure,
    /// Speech recognition failed for the current turn.
    RecognitionUnknown,
    ConverseRequest,
    ConverseResponse,
    /// Legacy converse error channel.
    ConverseError,
    ConverseActivateSkill,
    ConverseDeactivateSkill,
    /// Legacy activation request.
    ActiveSkillRequest,
    SkillListRequest,
    SkillList,
    SkillActivate,
    SkillDeactivate,
    /// Deactivate every skill except the named one.
    SkillKeep,
    SkillLoaded,
    SkillLoadingFailure,
    SkillsInitialized,
    Speak,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utterance => "recognizer_loop:utterance",
            Self::UtteranceAccepted => "recognizer_loop:utterance.response",
            Self::IntentAborted => "intent_aborted",
            Self::CompleteIntentFailure => "complete_intent_failure",
            Self::RecognitionUnknown => "mycroft.speech.recognition.unknown",
            Self::ConverseRequest => "skill.converse.request",
            Self::ConverseResponse => "skill.converse.response",
            Self::ConverseError => "skill.converse.error",
            Self::ConverseActivateSkill => "skill.converse.activate_skill",
            Self::ConverseDeactivateSkill => "skill.converse.deactivate_skill",
            Self::ActiveSkillRequest => "active_skill_request",
            Self::SkillListRequest => "skillmanager.list",
            Self::SkillList => "mycroft.skills.list",
            Self::SkillActivate => "skillmanager.activate",
            Self::SkillDeactivate => "skillmanager.deactivate",
            Self::SkillKeep => "skillmanager.keep",
            Self::SkillLoaded => "mycroft.skills.loaded",
            Self::SkillLoadingFailure => "mycroft.skills.loading_failure",
            Self::SkillsInitialized => "mycroft.skills.initialized",
            Self::Speak => "speak",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converse error text when the target id is in neither registry.
pub const ERR_SKILL_NOT_FOUND: &str = "skill id does not exist";
/// Converse error text when a file skill is known but not loaded.
pub const ERR_SKILL_NOT_LOADED: &str = "converse requested but skill not loaded";
/// Converse error text when the skill's converse capability failed.
pub const ERR_CONVERSE_EXCEPTION: &str = "exception in converse method";

/// Payload for `recognizer_loop:utterance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtterancePayload {
    pub utterances: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Payload for `intent_aborted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAbortedPayload {
    /// The utterances as they arrived, before parsing and filtering.
    pub utterances: Vec<String>,
    pub lang: String,
}

/// Payload for `skill.converse.request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequestPayload {
    pub skill_id: String,
    #[serde(default)]
    pub utterances: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Successful payload for `skill.converse.response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseResponsePayload {
    pub skill_id: String,
    pub result: bool,
}

/// Error payload for `skill.converse.response` and the legacy `skill.converse.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseErrorPayload {
    pub skill_id: String,
    pub error: String,
}

/// Payload for converse activation channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSkillPayload {
    pub skill_id: String,
}

/// Payload for `skillmanager.activate`, `skillmanager.deactivate` and `skillmanager.keep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillTargetPayload {
    pub skill: String,
}

/// Payload for `mycroft.skills.loaded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLoadedPayload {
    pub path: String,
    pub id: String,
    pub name: String,
}

/// Payload for `mycroft.skills.loading_failure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillLoadingFailurePayload {
    pub path: String,
    pub id: String,
}

/// Payload for `speak`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakPayload {
    pub utterance: String,
    #[serde(default)]
    pub expect_response: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_wire_names() {
        assert_eq!(MessageType::Utterance.as_str(), "recognizer_loop:utterance");
        assert_eq!(
            MessageType::UtteranceAccepted.as_str(),
            "recognizer_loop:utterance.response"
        );
        assert_eq!(MessageType::ConverseError.as_str(), "skill.converse.error");
        assert_eq!(MessageType::SkillList.as_str(), "mycroft.skills.list");
        assert_eq!(MessageType::SkillKeep.to_string(), "skillmanager.keep");
    }

    #[test]
    fn converse_error_payload_serializes() {
        let payload = ConverseErrorPayload {
            skill_id: "weather".to_string(),
            error: ERR_SKILL_NOT_FOUND.to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["skill_id"], "weather");
        assert_eq!(json["error"], "skill id does not exist");
    }

    #[test]
    fn converse_request_defaults_missing_fields() {
        let payload: ConverseRequestPayload =
            serde_json::from_str(r#"{"skill_id":"timer"}"#).unwrap();
        assert!(payload.utterances.is_empty());
        assert!(payload.lang.is_none());
    }
}
