//! Binary entry point for ragmcp.
//!
//! This binary provides the CLI interface for the HR question-answering
//! orchestrator.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragmcp::adapters::{RecordStoreAdapter, build_adapters};
use ragmcp::config::RagMcpConfig;
use ragmcp::llm::build_model;
use ragmcp::observability::{self, LoggingConfig};
use ragmcp::{AccessLevel, Dispatcher, Orchestrator, Session, SessionId, SessionStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// ragmcp - HR assistant that routes questions to employee, announcement
/// and policy backends.
#[derive(Parser)]
#[command(name = "ragmcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "RAGMCP_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Session id; reuses the configured access level for that id.
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Access level for new sessions: public, restricted or confidential.
    #[arg(short, long, global = true)]
    access_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Answer a single question.
    Ask {
        /// The question.
        question: String,

        /// Print the answer and tool usage as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation.
    Chat {
        /// Restore a session from a saved turn log.
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// List the tool catalog.
    Tools,

    /// Load the sample employee records.
    Seed,

    /// Expose one backend over HTTP for remote use.
    #[cfg(feature = "http")]
    ServeAdapter {
        /// Backend: records, announcements or policies.
        adapter: String,

        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:7401")]
        addr: std::net::SocketAddr,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = LoggingConfig::from_settings(config.logging.as_ref(), cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, config: RagMcpConfig) -> Result<()> {
    match cli.command {
        Commands::Ask { ref question, json } => cmd_ask(&cli, &config, question, json).await,
        Commands::Chat { ref resume } => cmd_chat(&cli, &config, resume.as_deref()).await,
        Commands::Tools => cmd_tools(&config).await,
        Commands::Seed => cmd_seed(&config),
        #[cfg(feature = "http")]
        Commands::ServeAdapter { ref adapter, addr } => {
            cmd_serve_adapter(&config, adapter, addr).await
        },
    }
}

/// Loads configuration from `path`, or the default location, then applies
/// environment overrides.
fn load_config(path: Option<&Path>) -> Result<RagMcpConfig> {
    let config = match path {
        Some(path) => RagMcpConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => RagMcpConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Seeds the sample employees when the local record store is empty.
fn ensure_records(config: &RagMcpConfig) -> Result<()> {
    let records = RecordStoreAdapter::open(&config.data.records_db)?;
    if records.employee_count()? == 0 {
        records.seed_sample_data()?;
    }
    Ok(())
}

async fn build_orchestrator(config: &RagMcpConfig) -> Result<Orchestrator> {
    ensure_records(config)?;
    let adapters = build_adapters(config)
        .await
        .context("connecting backends")?;
    let dispatcher = Dispatcher::from_adapters(adapters)?
        .with_tool_timeout(config.orchestrator.tool_timeout);
    let model = build_model(&config.llm);
    Ok(Orchestrator::new(
        dispatcher,
        model,
        config.orchestrator.clone(),
    ))
}

/// Opens the session named on the command line, or a fresh one.
fn open_session(cli: &Cli, config: &RagMcpConfig, sessions: &SessionStore) -> Result<SessionId> {
    let explicit = cli
        .access_level
        .as_deref()
        .map(str::parse::<AccessLevel>)
        .transpose()?;

    Ok(match &cli.session {
        Some(id) => {
            let level = explicit.unwrap_or_else(|| config.access.level_for(id));
            sessions.open_with_id(id.as_str(), level)
        },
        None => sessions.open(explicit.unwrap_or_else(|| config.access.default_level())),
    })
}

/// Answers one question.
async fn cmd_ask(cli: &Cli, config: &RagMcpConfig, question: &str, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let sessions = SessionStore::new();
    let session_id = open_session(cli, config, &sessions)?;

    let answer = ask_interruptible(&orchestrator, &sessions, &session_id, question).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.text);
        if cli.verbose {
            let tools: Vec<&str> = answer.usage.calls.iter().map(|c| c.name.as_str()).collect();
            eprintln!(
                "\n[{} cycle(s), tools: {}, {} ms]",
                answer.usage.cycles,
                if tools.is_empty() { "none".to_string() } else { tools.join(", ") },
                answer.usage.latency_ms
            );
        }
    }
    Ok(())
}

/// Runs a query that Ctrl-C cancels without ending the process.
async fn ask_interruptible(
    orchestrator: &Orchestrator,
    sessions: &SessionStore,
    session_id: &SessionId,
    question: &str,
) -> ragmcp::AnswerResult {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = orchestrator
        .ask_with_cancel(sessions, session_id, question, &cancel)
        .await;
    watcher.abort();
    result
}

/// Interactive conversation loop.
async fn cmd_chat(cli: &Cli, config: &RagMcpConfig, resume: Option<&Path>) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let sessions = SessionStore::new();
    let session_id = match resume {
        Some(path) => {
            let log = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            sessions.insert(Session::from_turn_log(&log)?)
        },
        None => open_session(cli, config, &sessions)?,
    };

    println!(
        "HR assistant ready ({} tools). Commands: reset, stats, save <path>, quit",
        orchestrator.dispatcher().catalog().len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => {},
            "quit" | "exit" | "q" => break,
            "reset" => {
                sessions.reset(&session_id).await?;
                println!("Conversation cleared.");
            },
            "stats" => print_stats(&sessions.get(&session_id).await?),
            _ if line.starts_with("save ") => {
                let path = line.trim_start_matches("save ").trim();
                let log = sessions.get(&session_id).await?.to_turn_log()?;
                std::fs::write(path, log).with_context(|| format!("writing {path}"))?;
                println!("Saved to {path}.");
            },
            question => {
                match ask_interruptible(&orchestrator, &sessions, &session_id, question).await {
                    Ok(answer) => println!("\n{}", answer.text),
                    Err(e) => println!("\n{e}. Your conversation is unchanged; try again."),
                }
            },
        }
    }
    Ok(())
}

fn print_stats(session: &Session) {
    let stats = session.stats();
    println!("Session {} ({})", session.id(), session.access_level());
    println!("  Queries answered: {}", stats.queries_answered);
    println!("  Tools used:       {}", stats.distinct_tools());
    println!(
        "  Latency:          {} ms total, {} ms mean",
        stats.cumulative_latency().as_millis(),
        stats.mean_latency().as_millis()
    );
    for (tool, count) in &stats.tool_invocations {
        println!("    {tool}: {count}");
    }
}

/// Prints the tool catalog.
async fn cmd_tools(config: &RagMcpConfig) -> Result<()> {
    ensure_records(config)?;
    let adapters = build_adapters(config).await?;
    let dispatcher = Dispatcher::from_adapters(adapters)?;
    let catalog = dispatcher.catalog();

    let mut owner = "";
    for tool in catalog.all() {
        if tool.adapter != owner {
            owner = &tool.adapter;
            println!("\n[{owner}]");
        }
        let params: Vec<String> = tool
            .parameters
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}: {}", p.name, p.param_type.as_str())
                } else {
                    format!("{}?: {}", p.name, p.param_type.as_str())
                }
            })
            .collect();
        println!("  {}({})", tool.name, params.join(", "));
        println!("      {}", tool.description);
    }
    Ok(())
}

/// Loads the sample employee records.
fn cmd_seed(config: &RagMcpConfig) -> Result<()> {
    let records = RecordStoreAdapter::open(&config.data.records_db)?;
    records.seed_sample_data()?;
    println!(
        "Seeded {} employees into {}",
        records.employee_count()?,
        config.data.records_db.display()
    );
    Ok(())
}

/// Serves one local backend over HTTP until Ctrl-C.
#[cfg(feature = "http")]
async fn cmd_serve_adapter(
    config: &RagMcpConfig,
    name: &str,
    addr: std::net::SocketAddr,
) -> Result<()> {
    use ragmcp::Adapter;
    use ragmcp::adapters::{AnnouncementAdapter, PolicyIndexAdapter, RetrievalSettings};
    use ragmcp::embedding::policy_embedder;
    use std::sync::Arc;

    let adapter: Arc<dyn Adapter> = match name {
        RecordStoreAdapter::NAME => {
            ensure_records(config)?;
            Arc::new(RecordStoreAdapter::open(&config.data.records_db)?)
        },
        AnnouncementAdapter::NAME => {
            Arc::new(AnnouncementAdapter::new(&config.data.announcements_dir))
        },
        PolicyIndexAdapter::NAME => Arc::new(PolicyIndexAdapter::load_dir(
            &config.data.policies_dir,
            policy_embedder(&config.retrieval),
            RetrievalSettings::from(&config.retrieval),
        )?),
        other => anyhow::bail!("unknown adapter '{other}' (expected records, announcements or policies)"),
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }
    ragmcp::adapters::http::serve_adapter(adapter, addr, shutdown).await?;
    Ok(())
}
