//! Command-line interface
//!
//! Every command works against one session's history log, so a run that was
//! interrupted (Ctrl-C or a crash) can be inspected, recovered or aborted
//! from a later invocation.

use crate::config::{Config, HistoryBackend};
use crate::history::open_log;
use crate::sequencer::{LeaseRegistry, RecoveryReport, ScriptSession, TurnOutcome};
use crate::synthesize::CompletionReason;
use crate::tools::builtin::host_tools;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - crash-safe script runs for agent sessions", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// History backend (overrides config file and env vars)
    #[arg(long, global = true, value_enum)]
    pub backend: Option<HistoryBackend>,

    /// Directory for JSONL history files
    #[arg(long, global = true)]
    pub history_dir: Option<PathBuf>,

    /// Database URL for the sqlite backend
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run script files as the blocks of one turn
    Run {
        /// Session ID
        session: String,

        /// Script files, run in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Assistant text recorded with the turn
        #[arg(short = 'm', long = "message", default_value = "")]
        message: String,

        /// Root directory for the file tools
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Finish or fail whatever a crashed run left pending
    Recover {
        /// Session ID
        session: String,

        /// Root directory for the file tools
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Show the pending phase of a session as JSON
    Pending {
        /// Session ID
        session: String,
    },

    /// Abort the pending execution and answer open tool calls
    Abort {
        /// Session ID
        session: String,
    },

    /// Print a session's history records, one JSON object per line
    History {
        /// Session ID
        session: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_env("CADENCE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn open_session(config: &Config, session_id: &str, root: PathBuf) -> Result<ScriptSession> {
    let log = open_log(&config.history, session_id)
        .await
        .with_context(|| format!("Failed to open history for session {}", session_id))?;
    let session = ScriptSession::open(
        session_id,
        log,
        Arc::new(host_tools(root)),
        config.limits(),
        LeaseRegistry::new(),
    )
    .await
    .context("Failed to open session")?;
    Ok(session)
}

/// Cancellation token fired by Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; leaving the run paused");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load config before any command so errors show up front
    let config = Config::builder()
        .config_path(cli.config)
        .backend(cli.backend)
        .history_dir(cli.history_dir)
        .database_url(cli.database_url)
        .build()
        .context("Failed to load configuration")?;
    init_tracing(&config);

    match cli.command {
        Commands::Run {
            session,
            files,
            message,
            root,
        } => {
            let mut codes = Vec::with_capacity(files.len());
            for file in &files {
                let code = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("Failed to read script {}", file.display()))?;
                codes.push(code);
            }

            let session = open_session(&config, &session, root).await?;
            let outcome = session
                .run_turn(&message, &codes, &interrupt_token())
                .await
                .context("Failed to run turn")?;
            print_outcome(&outcome);
        }

        Commands::Recover { session, root } => {
            let session = open_session(&config, &session, root).await?;
            let RecoveryReport {
                phase,
                outcome,
                backfilled,
                synthesized,
            } = session
                .recover(&interrupt_token())
                .await
                .context("Failed to recover session")?;

            match (phase, outcome) {
                (Some(phase), Some(outcome)) => {
                    println!("Recovered block {} of {}", phase.block_index + 1, phase.blocks.len());
                    print_outcome(&outcome);
                }
                _ => println!("Nothing pending"),
            }
            if backfilled > 0 {
                println!("Recorded {} finished block result(s)", backfilled);
            }
            if synthesized > 0 {
                println!("Answered {} open tool call(s)", synthesized);
            }
        }

        Commands::Pending { session } => {
            let session = open_session(&config, &session, PathBuf::from(".")).await?;
            match session.pending_phase().await? {
                Some(phase) => println!("{}", serde_json::to_string_pretty(&phase)?),
                None => println!("Nothing pending"),
            }
        }

        Commands::Abort { session } => {
            let session = open_session(&config, &session, PathBuf::from(".")).await?;
            let report = session
                .abort(CompletionReason::UserAborted)
                .await
                .context("Failed to abort session")?;

            match report.closed_execution {
                Some(call_id) => println!("Aborted execution {}", call_id),
                None => println!("No execution in flight"),
            }
            println!("Answered {} open tool call(s)", report.synthesized);
        }

        Commands::History { session } => {
            let log = open_log(&config.history, &session)
                .await
                .with_context(|| format!("Failed to open history for session {}", session))?;
            for record in log.load_all().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Completed { results } => {
            for result in results {
                println!("{}", result.message().joined_text());
            }
        }
        TurnOutcome::Failed { results, message } => {
            for result in results {
                println!("{}", result.message().joined_text());
            }
            eprintln!("Turn failed: {}", message);
        }
        TurnOutcome::Interrupted { block_index } => {
            eprintln!(
                "Interrupted in block {}; run `cadence recover` or `cadence abort`",
                block_index + 1
            );
        }
    }
}
