//! Utterance turn handling.
//!
//! One turn: acknowledge, resolve language, stamp timing, optionally write a transcript,
//! run the parser pipeline, finalize, then offer the turn to active skills (most recently
//! activated first) before asking the intent matcher.
//!
//! A turn that yields no usable utterance is answered with `intent_aborted`. A turn whose
//! parser chain fails is dropped silently; only the log knows.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vox_core::events::{
    ActiveSkillPayload, ConverseErrorPayload, IntentAbortedPayload, MessageType,
    ERR_SKILL_NOT_FOUND,
};
use vox_core::{epoch_seconds, LangConfig, Message};

use crate::bus::MessageBus;
use crate::normalize::{BasicNormalizer, Normalizer};
use crate::parsers::{ParserError, ParserPipeline};
use crate::skills::{panic_message, ConverseDispatcher};
use crate::transcripts::TranscriptWriter;

/// Timing key stamped when a turn was transcribed.
pub const TRANSCRIBED_TIMING: &str = "transcribed";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Parser(#[from] ParserError),
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing usable was left after finalization.
    Aborted,
    /// An active skill claimed the turn.
    Conversed(String),
    /// The intent matcher handled the turn.
    Matched,
    /// Nobody handled the turn.
    Unhandled,
}

/// Downstream intent resolution.
pub trait IntentMatcher: Send + Sync {
    /// Handle the finalized turn. Return `true` if an intent claimed it.
    fn match_intent(&self, message: &Message) -> bool;
}

/// Matcher that never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMatcher;

impl IntentMatcher for NoMatcher {
    fn match_intent(&self, _message: &Message) -> bool {
        false
    }
}

/// Entry of the active skill set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSkill {
    pub skill_id: String,
    pub activated_at: DateTime<Utc>,
}

/// Raw utterances followed by their novel normalized forms, blanks removed.
pub fn finalize_utterances(
    utterances: &[String],
    lang: &str,
    normalizer: &dyn Normalizer,
) -> Vec<String> {
    let mut combined: Vec<String> = utterances.to_vec();
    for utterance in utterances {
        let normalized = normalizer.normalize(&utterance.to_lowercase(), lang, false);
        if !combined.contains(&normalized) {
            combined.push(normalized);
        }
    }
    combined.retain(|u| !u.trim().is_empty());
    combined
}

pub struct IntentService {
    bus: Arc<MessageBus>,
    dispatcher: Arc<ConverseDispatcher>,
    lang: LangConfig,
    pipeline: ParserPipeline,
    normalizer: Arc<dyn Normalizer>,
    matcher: Arc<dyn IntentMatcher>,
    transcripts: Option<Arc<dyn TranscriptWriter>>,
    /// Age after which an active skill drops out; zero keeps skills forever.
    converse_timeout: Duration,
    active_skills: Mutex<Vec<ActiveSkill>>,
}

impl std::fmt::Debug for IntentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentService")
            .field("lang", &self.lang)
            .field("pipeline", &self.pipeline)
            .field("transcripts", &self.transcripts.is_some())
            .field("converse_timeout", &self.converse_timeout)
            .finish()
    }
}

impl IntentService {
    pub fn new(bus: Arc<MessageBus>, dispatcher: Arc<ConverseDispatcher>, lang: LangConfig) -> Self {
        Self {
            bus,
            dispatcher,
            lang,
            pipeline: ParserPipeline::default(),
            normalizer: Arc::new(BasicNormalizer),
            matcher: Arc::new(NoMatcher),
            transcripts: None,
            converse_timeout: Duration::from_secs(300),
            active_skills: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: ParserPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn IntentMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_transcripts(mut self, writer: Arc<dyn TranscriptWriter>) -> Self {
        self.transcripts = Some(writer);
        self
    }

    pub fn with_converse_timeout(mut self, timeout: Duration) -> Self {
        self.converse_timeout = timeout;
        self
    }

    fn active(&self) -> MutexGuard<'_, Vec<ActiveSkill>> {
        self.active_skills.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put `skill_id` at the front of the active set, replacing any older entry.
    pub fn add_active_skill(&self, skill_id: &str) {
        let mut active = self.active();
        active.retain(|entry| entry.skill_id != skill_id);
        active.insert(
            0,
            ActiveSkill {
                skill_id: skill_id.to_string(),
                activated_at: Utc::now(),
            },
        );
    }

    pub fn remove_active_skill(&self, skill_id: &str) {
        self.active().retain(|entry| entry.skill_id != skill_id);
    }

    /// Current active set, most recent first.
    pub fn active_skills(&self) -> Vec<ActiveSkill> {
        self.active().clone()
    }

    /// Drop expired entries and return the ids still eligible to converse.
    pub fn active_skill_ids(&self) -> Vec<String> {
        let mut active = self.active();
        if !self.converse_timeout.is_zero() {
            let now = Utc::now();
            let timeout = self.converse_timeout;
            active.retain(|entry| {
                (now - entry.activated_at)
                    .to_std()
                    .map_or(true, |age| age <= timeout)
            });
        }
        active.iter().map(|entry| entry.skill_id.clone()).collect()
    }

    /// Top-level turn handler. Logs and drops anything that goes wrong.
    pub fn handle_utterance(&self, message: Message) {
        match catch_unwind(AssertUnwindSafe(|| self.process_utterance(message))) {
            Ok(Ok(outcome)) => debug!(?outcome, "utterance turn finished"),
            Ok(Err(e)) => error!(error = %e, "utterance turn failed"),
            Err(payload) => error!(
                error = %panic_message(payload.as_ref()),
                "utterance turn panicked"
            ),
        }
    }

    /// Run one turn.
    pub fn process_utterance(&self, mut message: Message) -> Result<TurnOutcome, TurnError> {
        self.bus.emit(message.response(Map::new()));

        let lang = message
            .data_str("lang")
            .map_or_else(|| self.lang.user.clone(), str::to_string);
        let original = message.data_strings("utterances");

        let mut context = message.context.clone();
        if !context.has_timing() {
            warn!("no timing data available for utterance turn");
        }
        if context.timing(TRANSCRIBED_TIMING).is_none() {
            context.set_timing(TRANSCRIBED_TIMING, epoch_seconds(Utc::now()));
        }

        if let Some(writer) = &self.transcripts {
            self.record_transcript(writer.as_ref(), &original, &mut context);
        }

        let parsed = self.pipeline.run(original.clone(), &lang, &mut context)?;
        message.context = context;

        let finalized = finalize_utterances(&parsed, &lang, self.normalizer.as_ref());
        if finalized.is_empty() {
            debug!("received empty utterance");
            self.bus.emit(message.reply_with(
                MessageType::IntentAborted,
                &IntentAbortedPayload {
                    utterances: original,
                    lang,
                },
            ));
            return Ok(TurnOutcome::Aborted);
        }

        message.data.insert("lang".to_string(), Value::from(lang.clone()));
        message
            .data
            .insert("utterances".to_string(), Value::from(parsed.clone()));

        for skill_id in self.active_skill_ids() {
            if self
                .dispatcher
                .converse(&message, &skill_id, &parsed, &lang)
                .is_handled()
            {
                info!(skill_id = %skill_id, "active skill handled utterance");
                self.add_active_skill(&skill_id);
                return Ok(TurnOutcome::Conversed(skill_id));
            }
        }

        if self.matcher.match_intent(&message) {
            return Ok(TurnOutcome::Matched);
        }

        self.bus.emit(message.reply(
            MessageType::CompleteIntentFailure.as_str(),
            message.data.clone(),
        ));
        Ok(TurnOutcome::Unhandled)
    }

    fn record_transcript(
        &self,
        writer: &dyn TranscriptWriter,
        utterances: &[String],
        context: &mut vox_core::Context,
    ) {
        let user = context
            .get_str("user")
            .or_else(|| context.get_str("username"))
            .unwrap_or("local")
            .to_string();
        let first = utterances.first().map_or("", String::as_str);
        let timestamp = context.timing(TRANSCRIBED_TIMING).unwrap_or_default();
        let audio = context.get_str("raw_audio").and_then(|path| match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path, error = %e, "failed to read raw audio");
                None
            }
        });

        match writer.write_transcript(&user, first, timestamp, audio.as_deref()) {
            Ok(path) => {
                context.insert("audio_file", path.display().to_string());
            }
            Err(e) => warn!(error = %e, "failed to write transcript"),
        }
    }

    /// Let every active skill react to a failed recognition.
    pub fn reset_converse(&self, message: &Message) {
        let lang = message
            .data_str("lang")
            .map_or_else(|| self.lang.user.clone(), str::to_string);
        for skill_id in self.active_skill_ids() {
            self.dispatcher.converse(message, &skill_id, &[], &lang);
        }
    }

    /// Forget skills the dispatcher reports as nonexistent.
    pub fn handle_converse_error(&self, message: &Message) {
        let Ok(payload) = message.payload::<ConverseErrorPayload>() else {
            return;
        };
        if payload.error == ERR_SKILL_NOT_FOUND {
            self.remove_active_skill(&payload.skill_id);
            info!(skill_id = %payload.skill_id, "removed nonexistent skill from active set");
        }
    }

    fn skill_id_of(message: &Message) -> Option<String> {
        match message.payload::<ActiveSkillPayload>() {
            Ok(payload) => Some(payload.skill_id),
            Err(e) => {
                warn!(msg_type = %message.msg_type, error = %e, "missing skill_id");
                None
            }
        }
    }

    /// Attach active-set and recognition handlers to the bus.
    pub fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::ConverseError, move |message| {
            if let Some(service) = weak.upgrade() {
                service.handle_converse_error(message);
            }
        });

        for msg_type in [MessageType::ConverseActivateSkill, MessageType::ActiveSkillRequest] {
            let weak = Arc::downgrade(self);
            self.bus.on(msg_type, move |message| {
                if let (Some(service), Some(skill_id)) = (weak.upgrade(), Self::skill_id_of(message)) {
                    service.add_active_skill(&skill_id);
                }
            });
        }

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::ConverseDeactivateSkill, move |message| {
            if let (Some(service), Some(skill_id)) = (weak.upgrade(), Self::skill_id_of(message)) {
                service.remove_active_skill(&skill_id);
            }
        });

        let weak = Arc::downgrade(self);
        self.bus.on(MessageType::RecognitionUnknown, move |message| {
            if let Some(service) = weak.upgrade() {
                service.reset_converse(message);
            }
        });
    }

    /// Queue utterance events and process them one turn at a time until cancelled.
    pub fn spawn_worker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.bus.on(MessageType::Utterance, move |message| {
            if tx.send(message.clone()).is_err() {
                warn!("utterance worker stopped, dropping utterance");
            }
        });

        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let turn = Arc::clone(&service);
                if let Err(e) = tokio::task::spawn_blocking(move || turn.handle_utterance(message)).await {
                    error!(error = %e, "utterance worker task failed");
                }
            }
            debug!("utterance worker stopped");
        })
    }
}
