//! Converse dispatch.
//!
//! Resolves a skill id through the registry, invokes the skill's converse capability in
//! its declared style, and reports the outcome on the bus. Errors are reported on
//! `skill.converse.response` and, for older listeners, on `skill.converse.error`.
//! Nothing raised by a skill escapes [`ConverseDispatcher::converse`].

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use vox_core::events::{
    ConverseErrorPayload, ConverseRequestPayload, ConverseResponsePayload, MessageType,
    ERR_CONVERSE_EXCEPTION, ERR_SKILL_NOT_FOUND, ERR_SKILL_NOT_LOADED,
};
use vox_core::{Message, SkillSource};

use super::metrics::SkillsMetrics;
use super::registry::SkillRegistry;
use crate::bus::MessageBus;

/// Why a converse request produced an error outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverseFailure {
    /// No skill with that id is registered.
    NotFound,
    /// A file skill is registered but not loaded.
    NotLoaded,
    /// The skill's converse capability failed.
    Exception,
}

impl ConverseFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => ERR_SKILL_NOT_FOUND,
            Self::NotLoaded => ERR_SKILL_NOT_LOADED,
            Self::Exception => ERR_CONVERSE_EXCEPTION,
        }
    }
}

impl fmt::Display for ConverseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one converse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverseOutcome {
    /// The skill claimed the turn.
    Handled,
    /// The skill declined.
    Declined,
    Error(ConverseFailure),
}

impl ConverseOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

#[derive(Debug)]
pub struct ConverseDispatcher {
    registry: Arc<SkillRegistry>,
    bus: Arc<MessageBus>,
    metrics: Arc<SkillsMetrics>,
}

impl ConverseDispatcher {
    pub fn new(
        registry: Arc<SkillRegistry>,
        bus: Arc<MessageBus>,
        metrics: Arc<SkillsMetrics>,
    ) -> Self {
        Self {
            registry,
            bus,
            metrics,
        }
    }

    /// Offer a turn to `skill_id` and report the outcome as a reply to `request`.
    pub fn converse(
        &self,
        request: &Message,
        skill_id: &str,
        utterances: &[String],
        lang: &str,
    ) -> ConverseOutcome {
        let outcome = self.invoke(request, skill_id, utterances, lang);
        match outcome {
            ConverseOutcome::Handled | ConverseOutcome::Declined => {
                if outcome.is_handled() {
                    self.metrics.inc_converse_handled();
                }
                self.bus.emit(request.reply_with(
                    MessageType::ConverseResponse,
                    &ConverseResponsePayload {
                        skill_id: skill_id.to_string(),
                        result: outcome.is_handled(),
                    },
                ));
            }
            ConverseOutcome::Error(failure) => self.emit_error(request, skill_id, failure),
        }
        outcome
    }

    /// Bus entry point for `skill.converse.request`.
    pub fn handle_request(&self, message: &Message, default_lang: &str) {
        let payload: ConverseRequestPayload = match message.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "malformed converse request");
                return;
            }
        };
        let lang = payload.lang.as_deref().unwrap_or(default_lang);
        self.converse(message, &payload.skill_id, &payload.utterances, lang);
    }

    fn invoke(
        &self,
        request: &Message,
        skill_id: &str,
        utterances: &[String],
        lang: &str,
    ) -> ConverseOutcome {
        let Some(loader) = self.registry.get(skill_id) else {
            warn!(skill_id = %skill_id, "converse requested for unknown skill");
            return ConverseOutcome::Error(ConverseFailure::NotFound);
        };

        if loader.source() == SkillSource::File && !loader.is_loaded() {
            warn!(skill_id = %skill_id, "converse requested but skill not loaded");
            return ConverseOutcome::Error(ConverseFailure::NotLoaded);
        }

        match loader.converse(request, utterances, lang) {
            Ok(true) => ConverseOutcome::Handled,
            Ok(false) => {
                debug!(skill_id = %skill_id, "skill declined to converse");
                ConverseOutcome::Declined
            }
            Err(e) => {
                error!(skill_id = %skill_id, error = %e, "converse failed");
                ConverseOutcome::Error(ConverseFailure::Exception)
            }
        }
    }

    fn emit_error(&self, request: &Message, skill_id: &str, failure: ConverseFailure) {
        self.metrics.inc_converse_error();
        let payload = ConverseErrorPayload {
            skill_id: skill_id.to_string(),
            error: failure.as_str().to_string(),
        };
        self.bus
            .emit(request.reply_with(MessageType::ConverseResponse, &payload));
        self.bus
            .emit(request.reply_with(MessageType::ConverseError, &payload));
    }
}
