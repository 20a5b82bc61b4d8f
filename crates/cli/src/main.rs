mod cli;
mod commands;
mod output;

use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tilepush_core::{load_config, RunContext, SanitizedConfig};

use cli::Cli;
use commands::{CliError, RunStatus};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match dispatch(cli).await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            error!("{}", e.display_message());
            eprintln!("error: {}", e.display_message());
            e.exit_code()
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,tilepush_core={level},tilepush={level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn dispatch(cli: Cli) -> Result<RunStatus, CliError> {
    info!(version = VERSION, command = cli.command.label(), "Starting tilepush");

    let config = load_config(cli.config.as_deref())?;
    let config = commands::prepare_config(&cli.command, config)?;

    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        workers = config.upload.workers,
        monitor = %commands::describe_monitor(&config.monitor),
        "Configuration loaded"
    );

    let ctx = RunContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            interrupt.abort("interrupted");
        }
    });

    let status = commands::execute(cli.command, &config, &ctx).await?;
    info!(?status, "Done");
    Ok(status)
}
