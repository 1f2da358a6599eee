//! voxctl - CLI client for voxd
//!
//! Talks to the daemon's local HTTP bridge: inject utterances, manage skills,
//! request converse and tail bus traffic.

mod client;
mod render;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, ConverseRequest, UtteranceRequest};
use serde_json::{Map, Value};

/// CLI client for the voxd orchestration daemon.
#[derive(Parser)]
#[command(name = "voxctl")]
#[command(about = "Control plane for the voxd voice assistant daemon")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7710)
    #[arg(long, global = true, env = "VOXD_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "VOXD_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send an utterance turn, as if it had been spoken
    Say {
        /// Utterance alternatives, most likely first
        #[arg(required = true)]
        utterances: Vec<String>,

        /// Language of the utterance (default: the daemon's user language)
        #[arg(long)]
        lang: Option<String>,

        /// User the turn is attributed to
        #[arg(long)]
        user: Option<String>,
    },

    /// List registered skills
    Skills,

    /// Activate a skill ("all" activates every skill)
    Activate {
        /// Skill ID
        skill_id: String,
    },

    /// Deactivate a skill
    Deactivate {
        /// Skill ID
        skill_id: String,
    },

    /// Deactivate every skill except this one
    Keep {
        /// Skill ID
        skill_id: String,
    },

    /// Offer utterances to one skill's converse handler
    Converse {
        /// Skill ID
        skill_id: String,

        /// Utterances to offer (none to signal a recognition failure)
        utterances: Vec<String>,

        /// Language of the utterances
        #[arg(long)]
        lang: Option<String>,
    },

    /// Show skill lifecycle counters
    Metrics,

    /// Print bus messages as they happen
    Events {
        /// Only show messages on this channel
        #[arg(long = "type")]
        msg_type: Option<String>,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:7710".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Say {
            utterances,
            lang,
            user,
        } => run_say(&client, utterances, lang, user).await,
        Command::Skills => run_skills(&client).await,
        Command::Activate { skill_id } => run_action(&client, &skill_id, "activate").await,
        Command::Deactivate { skill_id } => run_action(&client, &skill_id, "deactivate").await,
        Command::Keep { skill_id } => run_action(&client, &skill_id, "keep").await,
        Command::Converse {
            skill_id,
            utterances,
            lang,
        } => run_converse(&client, &skill_id, utterances, lang).await,
        Command::Metrics => run_metrics(&client).await,
        Command::Events { msg_type, limit } => client.tail_events(msg_type.as_deref(), limit).await,
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run_say(
    client: &Client,
    utterances: Vec<String>,
    lang: Option<String>,
    user: Option<String>,
) -> Result<(), ClientError> {
    let context = user.map(|user| {
        let mut context = Map::new();
        context.insert("user".to_string(), Value::String(user));
        context
    });
    let count = utterances.len();
    client
        .say(UtteranceRequest {
            utterances,
            lang,
            context,
        })
        .await?;
    println!("Sent {} utterance(s)", count);
    Ok(())
}

async fn run_skills(client: &Client) -> Result<(), ClientError> {
    let skills = client.list_skills().await?;
    render::print_skill_list(&skills);
    Ok(())
}

async fn run_action(client: &Client, skill_id: &str, action: &str) -> Result<(), ClientError> {
    client.skill_action(skill_id, action).await?;
    println!("{}: {}", skill_id, action);
    Ok(())
}

async fn run_converse(
    client: &Client,
    skill_id: &str,
    utterances: Vec<String>,
    lang: Option<String>,
) -> Result<(), ClientError> {
    let response = client
        .converse(skill_id, ConverseRequest { utterances, lang })
        .await?;
    render::print_converse(&response);
    Ok(())
}

async fn run_metrics(client: &Client) -> Result<(), ClientError> {
    let metrics = client.metrics().await?;
    render::print_metrics(&metrics);
    Ok(())
}
