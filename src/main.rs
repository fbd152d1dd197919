//! AI CLI Bridge - Run Claude Code prompts over the stream-json protocol.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aicli_bridge::config::{BridgeConfig, ConfigLoader};
use aicli_bridge::permission::{LogNotifier, PermissionManager};
use aicli_bridge::runner::{AiCliRunner, Session};

#[derive(Parser)]
#[command(
    name = "aicli-bridge",
    about = "Run Claude Code prompts over the stream-json protocol",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a config file (defaults to the standard search paths).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt to the AI CLI and print the final result.
    Run {
        /// The prompt to send.
        prompt: String,
        /// Working directory for the session.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Use this session id instead of a fresh one.
        #[arg(long)]
        session_id: Option<String>,
        /// Continue the session given by --session-id.
        #[arg(long, requires = "session_id")]
        resume: bool,
        /// Permission mode (default, acceptEdits, bypassPermissions, plan).
        #[arg(long)]
        permission_mode: Option<String>,
        /// Tools the CLI may use without asking.
        #[arg(long, value_delimiter = ',')]
        allowed_tools: Vec<String>,
        /// Tools the CLI may not use.
        #[arg(long, value_delimiter = ',')]
        disallowed_tools: Vec<String>,
        /// Skip all permission checks.
        #[arg(long)]
        skip_permissions: bool,
    },
    /// Run a diagnostic check against the AI CLI (version, help, simple).
    Test {
        /// Check to run.
        kind: String,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<BridgeConfig, String> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let permissions = match PermissionManager::from_config(&config.permissions, Arc::new(LogNotifier)) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let runner = AiCliRunner::new(config.runner).with_permission_manager(permissions);

    match cli.command {
        Commands::Run {
            prompt,
            cwd,
            session_id,
            resume,
            permission_mode,
            allowed_tools,
            disallowed_tools,
            skip_permissions,
        } => {
            if let Some(mode) = permission_mode {
                if !runner.set_permission_mode(&mode) {
                    eprintln!("error: unknown permission mode '{mode}'");
                    return ExitCode::FAILURE;
                }
            }
            if !allowed_tools.is_empty() {
                runner.set_allowed_tools(allowed_tools);
            }
            if !disallowed_tools.is_empty() {
                runner.set_disallowed_tools(disallowed_tools);
            }
            if skip_permissions {
                runner.set_skip_permissions(true);
            }

            let dir = match cwd {
                Some(dir) => dir,
                None => match std::env::current_dir() {
                    Ok(dir) => dir,
                    Err(e) => {
                        eprintln!("error: {e}");
                        return ExitCode::FAILURE;
                    }
                },
            };
            let mut session = match session_id {
                Some(id) => Session::with_id(id, dir),
                None => Session::new(dir),
            };
            session.conversation_started = resume;

            tracing::info!(session_id = %session.session_id, resume, "Running prompt");
            match runner.execute_command(&mut session, &prompt, None).await {
                Ok(result) => {
                    match serde_json::to_string_pretty(&result) {
                        Ok(text) => println!("{text}"),
                        Err(e) => {
                            eprintln!("error: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Test { kind } => match runner.test_command(&kind).await {
            Ok(output) => {
                println!("{output}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
