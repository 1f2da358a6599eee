//! voxd - voice assistant orchestration daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use voxd::{Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "voxd", about = "Voice assistant orchestration daemon", version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "7710")]
    port: u16,

    /// Config file applied over .vox/config
    #[arg(short, long, env = "VOXD_CONFIG")]
    config: Option<PathBuf>,

    /// Skills directory (overrides skills_dir from config)
    #[arg(long)]
    skills_dir: Option<PathBuf>,
}

/// `<config dir>/vox/voxd.conf`, when it exists.
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("vox").join("voxd.conf"))
        .filter(|p| p.exists())
}

fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DaemonConfig {
        port: cli.port,
        config_path: cli.config.or_else(user_config_path),
        skills_dir: cli.skills_dir,
        ..Default::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        let daemon = match Daemon::new(config) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                std::process::exit(1);
            }
        };

        let run = daemon.run();
        tokio::pin!(run);

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

            tokio::select! {
                result = &mut run => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                    return;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, initiating graceful shutdown");
                    daemon.shutdown();
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating graceful shutdown");
                    daemon.shutdown();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = &mut run => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                    return;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, initiating graceful shutdown");
                    daemon.shutdown();
                }
            }
        }

        if let Err(e) = run.await {
            error!("daemon error: {}", e);
        }
    });
}
