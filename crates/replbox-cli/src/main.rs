//! Replbox CLI
//!
//! Drives one hybrid script-then-REPL execution from a terminal: the
//! engine's outbound messages are printed as JSON lines, and terminal
//! input lines are forwarded to the running child.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replbox::{ClientCommand, Config, EXAMPLE_CONFIG, ExecutionRouter, Payload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replbox")]
#[command(about = "A tool for running scripts that hand over to an interactive REPL")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: replbox.toml)
        #[arg(short, long, default_value = "replbox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Execute a script and enter its REPL
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// User whose workspace directory the child runs in
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Identifier tagging every message of this execution
        #[arg(long, default_value = "cli")]
        cmd_id: String,
    },

    /// Show default configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            user,
            cmd_id,
        } => run_execution(config, &source, user, cmd_id).await,
        Commands::ShowConfig => {
            print!("{EXAMPLE_CONFIG}");
            Ok(())
        }
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(path = %output.display(), "wrote starter configuration");
    Ok(())
}

async fn run_execution(
    mut config: Config,
    source: &Path,
    user: String,
    cmd_id: String,
) -> Result<()> {
    let source = std::fs::canonicalize(source)
        .with_context(|| format!("failed to resolve {}", source.display()))?;

    // Local runs get a workspace next to the user's temp dir unless the
    // configured root already exists.
    if !config.workspace_root.exists() {
        config.workspace_root = std::env::temp_dir().join("replbox-workspaces");
    }
    let workspace = config.workspace_dir(&user);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    let router = ExecutionRouter::new(Arc::new(config));
    let (channel, mut messages) = replbox::ClientChannel::new();

    router
        .dispatch(
            &channel,
            ClientCommand::ExecuteScript {
                cmd_id: cmd_id.clone(),
                file_path: source,
                username: Some(user),
            },
        )
        .context("failed to start execution")?;

    // Terminal stdin becomes send_input frames; EOF asks for termination
    let input_router = router.clone();
    let input_channel = channel.clone();
    let input_cmd_id = cmd_id.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = input_router.dispatch(
                &input_channel,
                ClientCommand::SendInput {
                    cmd_id: input_cmd_id.clone(),
                    text: line,
                },
            );
        }
        let _ = input_router.dispatch(
            &input_channel,
            ClientCommand::StopExecution {
                cmd_id: input_cmd_id.clone(),
            },
        );
    });

    let mut exit_code = 0;
    while let Some(message) = messages.recv().await {
        let terminal = match &message.payload {
            Payload::Complete { exit_code: code, .. } => {
                exit_code = *code;
                true
            }
            _ => false,
        };

        println!("{}", message.encode().context("failed to encode message")?);

        if terminal {
            break;
        }
    }

    router.shutdown().await;

    if exit_code != 0 {
        anyhow::bail!("execution finished with exit code {exit_code}");
    }
    Ok(())
}
