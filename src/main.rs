//! RAGFlow bridge — console host entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the pipeline and run `on_startup`
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run the console until stdin closes or shutdown
//!   8. Run `on_shutdown`

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ragflow_bridge::console::{Console, PullMode};
use ragflow_bridge::error::AppError;
use ragflow_bridge::{Pipeline, RagFlowPipeline, config, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level, config.log_file.as_deref())?;

    info!(
        backend = %config.ragflow.base_url(),
        agent_id = %config.ragflow.agent_id,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let missing = config.missing_settings();
    if !missing.is_empty() {
        warn!(?missing, "RAGFlow settings are empty; requests will be malformed");
    }

    let pipeline = Arc::new(RagFlowPipeline::from_config(&config)?);
    pipeline.on_startup().await;

    // Shared shutdown token; Ctrl-C cancels it.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                shutdown.cancel();
            }
        });
    }

    let chat_id = args.chat_id.unwrap_or_else(|| format!("console-{}", std::process::id()));
    let mode = if args.blocking { PullMode::Blocking } else { PullMode::Async };

    let result = Console::new(pipeline.clone(), chat_id, mode).run(shutdown).await;

    pipeline.on_shutdown().await;
    result
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    chat_id: Option<String>,
    blocking: bool,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut chat_id = None;
    let mut blocking = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: ragflow-bridge [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -c, --chat <ID>            Conversation id sent as metadata.chat_id (default: per process)");
                println!("      --blocking             Pull answers through the synchronous iterator");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                println!();
                println!("Environment:");
                println!("  RAGFLOW_API_KEY            Bearer token (never read from the config file)");
                println!("  RAGFLOW_HOST, RAGFLOW_PORT, RAGFLOW_AGENT_ID, RAGFLOW_LOG_LEVEL");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "-c" | "--chat" => {
                if let Some(id) = iter.next() {
                    chat_id = Some(id);
                } else {
                    eprintln!("error: -c/--chat requires an id argument");
                    std::process::exit(1);
                }
            }
            "--blocking" => blocking = true,
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier:
    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug  (session reuse, stream lifecycle)
    //   -vvvv+  → trace  (request payloads and curl equivalents)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, chat_id, blocking }
}
