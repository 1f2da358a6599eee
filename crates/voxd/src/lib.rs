//! voxd - voice assistant orchestration daemon
//!
//! Library components for the daemon process: the message bus, the utterance turn
//! pipeline, skill loading and management, and the local HTTP bridge.

pub mod bus;
pub mod intent;
pub mod normalize;
pub mod parsers;
pub mod server;
pub mod skills;
pub mod transcripts;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bus::MessageBus;
use intent::{IntentMatcher, IntentService};
use parsers::{ParserModule, ParserPipeline};
use skills::{FactoryCatalog, GitInstaller, SkillManager};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use transcripts::FileTranscriptWriter;
use vox_core::config::ConfigError;
use vox_core::Config;

/// Project-local config file, relative to the working directory.
pub const PROJECT_CONFIG: &str = ".vox/config";

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP server port (default: 7710).
    pub port: u16,
    /// Auth token for the HTTP bridge (optional).
    pub auth_token: Option<String>,
    /// Explicit config file, applied over `.vox/config`.
    pub config_path: Option<PathBuf>,
    /// Skills directory override.
    pub skills_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 7710,
            auth_token: std::env::var("VOXD_AUTH_TOKEN").ok(),
            config_path: None,
            skills_dir: None,
        }
    }
}

impl DaemonConfig {
    /// Resolve the assistant config: CLI overrides, then `--config`, then
    /// `.vox/config`, then defaults.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.load_from(&cwd)
    }

    fn load_from(&self, cwd: &Path) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        let project = cwd.join(PROJECT_CONFIG);
        if project.exists() {
            config.load_file(&project)?;
        }
        if let Some(path) = &self.config_path {
            config.load_file(path)?;
        }
        if let Some(dir) = &self.skills_dir {
            config.skills_dir = dir.clone();
        }

        config.resolve_paths(cwd);
        Ok(config)
    }
}

/// Host-supplied pieces the daemon cannot discover on its own.
#[derive(Default)]
pub struct Components {
    /// Plugin skills, keyed by skill id.
    pub plugins: FactoryCatalog,
    /// Entries that `SKILL.md` files may name.
    pub entries: FactoryCatalog,
    /// Parser modules in addition to the built-in ones.
    pub parsers: Vec<Arc<dyn ParserModule>>,
    pub matcher: Option<Arc<dyn IntentMatcher>>,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("plugins", &self.plugins)
            .field("entries", &self.entries)
            .field("parsers", &self.parsers.len())
            .field("matcher", &self.matcher.is_some())
            .finish()
    }
}

/// Daemon state.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    bus: Arc<MessageBus>,
    manager: Arc<SkillManager>,
    intent: Arc<IntentService>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Create a daemon with no host-supplied skills or parsers.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_components(config, Components::default())
    }

    pub fn with_components(config: DaemonConfig, components: Components) -> Result<Self, DaemonError> {
        let settings = Arc::new(config.load()?);
        let bus = Arc::new(MessageBus::new());

        let manager = Arc::new(
            SkillManager::new(
                Arc::clone(&settings),
                Arc::clone(&bus),
                Arc::new(components.plugins),
                Arc::new(components.entries),
            )
            .with_installer(Arc::new(GitInstaller::default())),
        );
        manager.register_handlers();

        let pipeline = ParserPipeline::from_config(&settings, components.parsers);
        let mut service = IntentService::new(
            Arc::clone(&bus),
            Arc::clone(manager.dispatcher()),
            settings.lang_config(),
        )
        .with_pipeline(pipeline)
        .with_converse_timeout(Duration::from_secs(settings.converse_timeout_sec));
        if settings.transcripts_enabled {
            service = service.with_transcripts(Arc::new(FileTranscriptWriter::new(
                settings.transcripts_dir.clone(),
            )));
        }
        if let Some(matcher) = components.matcher {
            service = service.with_matcher(matcher);
        }
        let intent = Arc::new(service);
        intent.register_handlers();

        Ok(Self {
            config,
            bus,
            manager,
            intent,
            cancel: CancellationToken::new(),
        })
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<SkillManager> {
        &self.manager
    }

    pub fn intent(&self) -> &Arc<IntentService> {
        &self.intent
    }

    /// Run until [`Daemon::shutdown`] is called.
    pub async fn run(&self) -> Result<(), DaemonError> {
        info!("voxd starting on port {}", self.config.port);
        info!("skills dir: {}", self.manager.config().skills_dir.display());
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }

        let worker = self.intent.spawn_worker(self.cancel.clone());
        let skills = tokio::spawn(Arc::clone(&self.manager).run(self.cancel.clone()));

        let http_bus = Arc::clone(&self.bus);
        let http_manager = Arc::clone(&self.manager);
        let http_port = self.config.port;
        let http_token = self.config.auth_token.clone();
        let http_handle = tokio::spawn(async move {
            if let Err(e) = server::start_server(http_bus, http_manager, http_port, http_token).await {
                error!("HTTP server error: {}", e);
            }
        });

        self.cancel.cancelled().await;
        info!("shutdown signal received, stopping");

        if let Err(e) = skills.await {
            warn!(error = %e, "skill manager task ended abnormally");
        }
        if let Err(e) = worker.await {
            warn!(error = %e, "utterance worker ended abnormally");
        }
        http_handle.abort();

        Ok(())
    }

    /// Signal the daemon to shut down.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn project_config_is_overridden_by_explicit_file_and_flags() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".vox")).unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG),
            "lang_user=de-de\nconverse_timeout_sec=60\nskills_dir=project-skills\n",
        )
        .unwrap();
        let explicit = tmp.path().join("voxd.conf");
        fs::write(&explicit, "converse_timeout_sec=90\n").unwrap();

        let daemon_config = DaemonConfig {
            config_path: Some(explicit),
            ..Default::default()
        };
        let config = daemon_config.load_from(tmp.path()).unwrap();
        assert_eq!(config.lang_user, "de-de");
        assert_eq!(config.converse_timeout_sec, 90);
        assert_eq!(config.skills_dir, tmp.path().join("project-skills"));

        let daemon_config = DaemonConfig {
            skills_dir: Some(PathBuf::from("/srv/skills")),
            ..daemon_config
        };
        let config = daemon_config.load_from(tmp.path()).unwrap();
        assert_eq!(config.skills_dir, PathBuf::from("/srv/skills"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let daemon_config = DaemonConfig {
            config_path: Some(tmp.path().join("absent.conf")),
            ..Default::default()
        };
        assert!(matches!(
            daemon_config.load_from(tmp.path()),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn components_reach_the_skill_manager() {
        let tmp = TempDir::new().unwrap();
        let components = Components::default();
        components.plugins.register(
            "hello",
            || -> Result<Box<dyn skills::Skill>, skills::SkillError> {
                Ok(Box::new(skills::loader::tests::TestSkill::default()))
            },
        );
        let daemon = Daemon::with_components(
            DaemonConfig {
                skills_dir: Some(tmp.path().join("skills")),
                ..Default::default()
            },
            components,
        )
        .unwrap();

        assert_eq!(daemon.manager().load_new_skills(), 1);
        assert!(daemon.manager().registry().contains("hello"));
    }

    #[tokio::test]
    async fn shutdown_stops_run() {
        let tmp = TempDir::new().unwrap();
        let daemon = Daemon::new(DaemonConfig {
            port: 0,
            skills_dir: Some(tmp.path().join("skills")),
            auth_token: None,
            config_path: None,
        })
        .unwrap();

        daemon.shutdown();
        daemon.run().await.unwrap();
    }
}
