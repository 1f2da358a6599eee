//! Text parser pipeline.
//!
//! Parser modules enrich or rewrite an utterance set before intent handling. The
//! pipeline orders its modules once, at construction, by ascending priority rank (ties
//! keep registration order) and folds the utterance set through them. Each module's
//! metadata is deep-merged into the turn context. The elapsed time of the whole chain is
//! recorded as `timing.text_parsers`.
//!
//! A failing or panicking module aborts the turn; there is no per-stage isolation.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};
use vox_core::{Config, Context};

use crate::skills::panic_message;

/// Rank for modules that do not state one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Timing key for the parser chain.
pub const TEXT_PARSERS_TIMING: &str = "text_parsers";

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("parser '{parser}' failed: {message}")]
    Failed { parser: String, message: String },
    #[error("parser '{parser}' panicked: {message}")]
    Panicked { parser: String, message: String },
}

impl ParserError {
    pub fn failed(parser: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            parser: parser.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// Utterances and metadata produced by one parser module.
pub type ParseOutput = (Vec<String>, Map<String, Value>);

/// A pipeline stage.
pub trait ParserModule: Send + Sync {
    fn name(&self) -> &str;

    /// Lower ranks run first.
    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    fn parse(&self, utterances: Vec<String>, lang: &str) -> Result<ParseOutput>;
}

/// Identity and rank of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserDescriptor {
    pub name: String,
    pub priority: u8,
}

struct Stage {
    descriptor: ParserDescriptor,
    module: Arc<dyn ParserModule>,
}

/// Ordered chain of parser modules.
#[derive(Default)]
pub struct ParserPipeline {
    stages: Vec<Stage>,
}

impl fmt::Debug for ParserPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| &s.descriptor))
            .finish()
    }
}

impl ParserPipeline {
    /// Build a pipeline. `overrides` replace a module's own rank by name.
    pub fn new(modules: Vec<Arc<dyn ParserModule>>, overrides: &HashMap<String, u8>) -> Self {
        let mut stages: Vec<Stage> = modules
            .into_iter()
            .map(|module| {
                let name = module.name().to_string();
                let priority = overrides
                    .get(&name)
                    .copied()
                    .unwrap_or_else(|| module.priority());
                Stage {
                    descriptor: ParserDescriptor { name, priority },
                    module,
                }
            })
            .collect();
        stages.sort_by_key(|stage| stage.descriptor.priority);
        Self { stages }
    }

    /// Pipeline of the built-in modules enabled in `config`, followed by `extra`.
    ///
    /// Unknown names are logged and skipped.
    pub fn from_config(config: &Config, extra: Vec<Arc<dyn ParserModule>>) -> Self {
        let mut modules: Vec<Arc<dyn ParserModule>> = Vec::new();
        for name in &config.parsers {
            match builtin_parser(name) {
                Some(module) => modules.push(module),
                None => warn!(parser = %name, "unknown parser module, skipping"),
            }
        }
        modules.extend(extra);
        Self::new(modules, &config.parser_priority)
    }

    pub fn descriptors(&self) -> Vec<ParserDescriptor> {
        self.stages.iter().map(|s| s.descriptor.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold `utterances` through every stage, merging metadata into `context`.
    pub fn run(&self, utterances: Vec<String>, lang: &str, context: &mut Context) -> Result<Vec<String>> {
        let started = Instant::now();
        let mut current = utterances;

        for stage in &self.stages {
            let name = &stage.descriptor.name;
            let module = Arc::clone(&stage.module);
            let input = current;
            let (next, metadata) = match catch_unwind(AssertUnwindSafe(|| module.parse(input, lang))) {
                Ok(result) => result?,
                Err(payload) => {
                    return Err(ParserError::Panicked {
                        parser: name.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                }
            };
            debug!(parser = %name, utterances = next.len(), "parser stage complete");
            context.merge(metadata);
            current = next;
        }

        context.set_timing(TEXT_PARSERS_TIMING, started.elapsed().as_secs_f64());
        Ok(current)
    }
}

/// Look up a built-in parser module by name.
pub fn builtin_parser(name: &str) -> Option<Arc<dyn ParserModule>> {
    match name {
        CleanupParser::NAME => Some(Arc::new(CleanupParser)),
        _ => None,
    }
}

/// Collapses whitespace and drops blank or repeated alternates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupParser;

impl CleanupParser {
    pub const NAME: &'static str = "cleanup";
}

impl ParserModule for CleanupParser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> u8 {
        10
    }

    fn parse(&self, utterances: Vec<String>, _lang: &str) -> Result<ParseOutput> {
        let total = utterances.len();
        let mut cleaned: Vec<String> = Vec::with_capacity(total);
        for utterance in utterances {
            let collapsed = utterance.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() && !cleaned.contains(&collapsed) {
                cleaned.push(collapsed);
            }
        }

        let mut metadata = Map::new();
        let removed = total - cleaned.len();
        if removed > 0 {
            metadata.insert("cleanup".to_string(), json!({ "removed": removed }));
        }
        Ok((cleaned, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Appends its tag to every utterance and records the call order.
    struct Tagger {
        name: &'static str,
        priority: u8,
        metadata: Value,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ParserModule for Tagger {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn parse(&self, utterances: Vec<String>, _lang: &str) -> Result<ParseOutput> {
            self.calls.lock().unwrap().push(self.name);
            let out = utterances
                .into_iter()
                .map(|u| format!("{u}+{}", self.name))
                .collect();
            let metadata = self.metadata.as_object().cloned().unwrap_or_default();
            Ok((out, metadata))
        }
    }

    fn tagger(
        name: &'static str,
        priority: u8,
        metadata: Value,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ParserModule> {
        Arc::new(Tagger {
            name,
            priority,
            metadata,
            calls: Arc::clone(calls),
        })
    }

    struct Hint;

    impl ParserModule for Hint {
        fn name(&self) -> &str {
            "hint"
        }

        fn parse(&self, utterances: Vec<String>, _lang: &str) -> Result<ParseOutput> {
            let metadata = json!({"intent_hint": "device_control"});
            Ok((utterances, metadata.as_object().cloned().unwrap_or_default()))
        }
    }

    struct Failing;

    impl ParserModule for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn parse(&self, _utterances: Vec<String>, _lang: &str) -> Result<ParseOutput> {
            Err(ParserError::failed("failing", "translation backend unavailable"))
        }
    }

    struct Panicking;

    impl ParserModule for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn parse(&self, _utterances: Vec<String>, _lang: &str) -> Result<ParseOutput> {
            panic!("index out of range")
        }
    }

    #[test]
    fn stages_fold_in_priority_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ParserPipeline::new(
            vec![
                tagger("late", 90, json!({}), &calls),
                tagger("early", 5, json!({}), &calls),
                tagger("middle", 50, json!({}), &calls),
            ],
            &HashMap::new(),
        );

        let mut context = Context::new();
        let out = pipeline
            .run(vec!["hi".to_string()], "en-us", &mut context)
            .unwrap();

        assert_eq!(out, vec!["hi+early+middle+late"]);
        assert_eq!(*calls.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn ties_keep_registration_order_and_overrides_apply() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let overrides = HashMap::from([("b".to_string(), 1)]);
        let pipeline = ParserPipeline::new(
            vec![
                tagger("a", 50, json!({}), &calls),
                tagger("c", 50, json!({}), &calls),
                tagger("b", 99, json!({}), &calls),
            ],
            &overrides,
        );

        let names: Vec<_> = pipeline.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn metadata_deep_merges_with_later_stages_winning() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ParserPipeline::new(
            vec![
                tagger(
                    "first",
                    1,
                    json!({"lang_detect": {"lang": "en", "confidence": 0.4}, "tag": "a"}),
                    &calls,
                ),
                tagger(
                    "second",
                    2,
                    json!({"lang_detect": {"confidence": 0.9}, "tag": "b"}),
                    &calls,
                ),
            ],
            &HashMap::new(),
        );

        let mut context = Context::new();
        pipeline
            .run(vec!["x".to_string()], "en-us", &mut context)
            .unwrap();

        assert_eq!(
            context.get("lang_detect"),
            Some(&json!({"lang": "en", "confidence": 0.9}))
        );
        assert_eq!(context.get_str("tag"), Some("b"));
    }

    #[test]
    fn hint_parser_leaves_utterances_and_records_timing() {
        let pipeline = ParserPipeline::new(vec![Arc::new(Hint)], &HashMap::new());
        let mut context = Context::new();

        let out = pipeline
            .run(vec!["turn on the lights".to_string()], "en-us", &mut context)
            .unwrap();

        assert_eq!(out, vec!["turn on the lights"]);
        assert_eq!(context.get_str("intent_hint"), Some("device_control"));
        assert!(context.timing(TEXT_PARSERS_TIMING).unwrap() >= 0.0);
    }

    #[test]
    fn empty_pipeline_still_records_timing() {
        let pipeline = ParserPipeline::default();
        let mut context = Context::new();
        let out = pipeline
            .run(vec!["a".to_string()], "en-us", &mut context)
            .unwrap();
        assert_eq!(out, vec!["a"]);
        assert!(context.timing(TEXT_PARSERS_TIMING).is_some());
    }

    #[test]
    fn failing_stage_aborts_chain() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ParserPipeline::new(
            vec![
                Arc::new(Failing),
                tagger("after", 90, json!({}), &calls),
            ],
            &HashMap::new(),
        );

        let err = pipeline
            .run(vec!["hi".to_string()], "en-us", &mut Context::new())
            .unwrap_err();

        assert!(matches!(err, ParserError::Failed { ref parser, .. } if parser == "failing"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_stage_becomes_error() {
        let pipeline = ParserPipeline::new(vec![Arc::new(Panicking)], &HashMap::new());
        let err = pipeline
            .run(vec!["hi".to_string()], "en-us", &mut Context::new())
            .unwrap_err();
        assert!(matches!(err, ParserError::Panicked { .. }));
    }

    #[test]
    fn cleanup_collapses_and_dedupes() {
        let (out, metadata) = CleanupParser
            .parse(
                vec![
                    "  what   time is it ".to_string(),
                    "what time is it".to_string(),
                    "   ".to_string(),
                    "what time's it".to_string(),
                ],
                "en-us",
            )
            .unwrap();
        assert_eq!(out, vec!["what time is it", "what time's it"]);
        assert_eq!(metadata.get("cleanup"), Some(&json!({"removed": 2})));
    }

    #[test]
    fn from_config_skips_unknown_modules() {
        let mut config = Config::default();
        config.parsers = vec!["cleanup".to_string(), "nonexistent".to_string()];
        config.parser_priority.insert("cleanup".to_string(), 70);

        let pipeline = ParserPipeline::from_config(&config, vec![Arc::new(Hint)]);

        assert_eq!(
            pipeline.descriptors(),
            vec![
                ParserDescriptor {
                    name: "hint".to_string(),
                    priority: DEFAULT_PRIORITY
                },
                ParserDescriptor {
                    name: "cleanup".to_string(),
                    priority: 70
                },
            ]
        );
    }
}
