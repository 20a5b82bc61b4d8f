//! Command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tilepush_core::{
    validate_config, validate_tiles_config, ArchiveManager, AssetStatus, BatchResult, Config,
    ConfigError, IonClient, MonitorConfig, Pipeline, PipelineError, ProcessingMonitor, RetryPolicy,
    RetryingService, RunContext, S3ArtifactStore, TileUploader, TilingService,
};
use tracing::info;

use crate::cli::{
    ArchiveDownloadArgs, ArchivesCommand, AssetsArgs, Command, StatusArgs, TilesArgs, UploadArgs,
};
use crate::output;

/// How a command finished, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything requested was done.
    Success,
    /// At least one item failed, timed out or was skipped.
    Incomplete,
    /// The run was interrupted or hit a fatal error.
    Aborted,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Incomplete => 1,
            RunStatus::Aborted => 2,
        }
    }

    pub fn from_batch(result: &BatchResult) -> Self {
        if result.aborted.is_some() {
            RunStatus::Aborted
        } else if result.is_success() {
            RunStatus::Success
        } else {
            RunStatus::Incomplete
        }
    }

    fn from_flags(all_ok: bool, ctx: &RunContext) -> Self {
        if ctx.abort_reason().is_some() {
            RunStatus::Aborted
        } else if all_ok {
            RunStatus::Success
        } else {
            RunStatus::Incomplete
        }
    }
}

#[derive(Debug)]
pub enum CliError {
    /// Bad or missing configuration.
    Config(String),
    Failure(anyhow::Error),
}

pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Failure(_) => 1,
        }
    }

    pub fn display_message(&self) -> String {
        match self {
            CliError::Config(message) => message.clone(),
            CliError::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        CliError::Config(error.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        CliError::Failure(error)
    }
}

/// Apply command-line overrides to the loaded config and validate it.
pub fn prepare_config(command: &Command, mut config: Config) -> CliResult<Config> {
    match command {
        Command::Upload(args) => args.apply(&mut config),
        Command::Status(args) => args.apply(&mut config),
        Command::Archives(ArchivesCommand::Download(args)) => args.apply(&mut config),
        Command::Tiles(args) => {
            args.apply(&mut config);
            validate_tiles_config(&config)?;
            return Ok(config);
        }
        Command::Assets(_) | Command::Archives(ArchivesCommand::List) => {}
    }
    validate_config(&config)?;
    Ok(config)
}

/// Tiling service client with retries, stopped by the run's cancellation.
fn build_service(config: &Config, ctx: &RunContext) -> CliResult<Arc<dyn TilingService>> {
    let client = IonClient::new(config.ion.clone()).context("Failed to create tiling service client")?;
    let service = RetryingService::new(Arc::new(client), RetryPolicy::from_config(&config.retry))
        .with_cancel(ctx.cancel_token().clone());
    info!(service = service.name(), url = %config.ion.url, "Tiling service ready");
    Ok(Arc::new(service))
}

pub async fn execute(command: Command, config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    match command {
        Command::Upload(args) => upload(args, config, ctx).await,
        Command::Status(args) => status(args, config, ctx).await,
        Command::Assets(args) => assets(args, config, ctx).await,
        Command::Archives(ArchivesCommand::List) => list_archives(config, ctx).await,
        Command::Archives(ArchivesCommand::Download(args)) => {
            download_archives(args, config, ctx).await
        }
        Command::Tiles(args) => tiles(args, config, ctx).await,
    }
}

async fn upload(args: UploadArgs, config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    let service = build_service(config, ctx)?;
    let pipeline = Pipeline::new(service, config);

    let result = match pipeline.run_dir(args.stages(), ctx).await {
        Ok(result) => result,
        Err(PipelineError::Scan(e)) => return Err(CliError::Config(e.to_string())),
        Err(e) => return Err(CliError::Failure(e.into())),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
        println!("{json}");
    } else {
        print!("{}", output::render_batch(&result));
    }
    Ok(RunStatus::from_batch(&result))
}

async fn status(args: StatusArgs, config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    let service = build_service(config, ctx)?;

    if args.monitor {
        let monitor = ProcessingMonitor::new(service, &config.monitor);
        let watches = monitor
            .watch_assets(args.ids, ctx)
            .await
            .context("Failed to start monitor")?;
        print!("{}", output::render_watches(&watches));
        let all_complete = watches
            .iter()
            .all(|w| w.status() == Some(AssetStatus::Complete));
        return Ok(RunStatus::from_flags(all_complete, ctx));
    }

    let mut assets = Vec::with_capacity(args.ids.len());
    let mut all_ok = true;
    for id in args.ids {
        match service.get_status(id).await {
            Ok(info) => assets.push(info),
            Err(e) => {
                all_ok = false;
                eprintln!("asset {id}: {e}");
                if e.is_auth() {
                    return Err(CliError::Failure(e.into()));
                }
            }
        }
    }
    print!("{}", output::render_assets(&assets));
    Ok(RunStatus::from_flags(all_ok, ctx))
}

async fn assets(args: AssetsArgs, config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    let service = build_service(config, ctx)?;
    let assets = service
        .list_assets(args.limit)
        .await
        .context("Failed to list assets")?;
    print!("{}", output::render_assets(&assets));
    Ok(RunStatus::Success)
}

async fn list_archives(config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    let service = build_service(config, ctx)?;
    let archives = service
        .list_archives()
        .await
        .context("Failed to list archives")?;
    print!("{}", output::render_archives(&archives));
    Ok(RunStatus::Success)
}

async fn download_archives(
    args: ArchiveDownloadArgs,
    config: &Config,
    ctx: &RunContext,
) -> CliResult<RunStatus> {
    let service = build_service(config, ctx)?;
    let manager = ArchiveManager::new(service, &config.archive);

    let reports = if args.ids.is_empty() {
        manager
            .download_all_completed(ctx)
            .await
            .context("Failed to list archives")?
    } else {
        manager
            .download_by_ids(args.ids, ctx)
            .await
            .context("Failed to start downloads")?
    };

    print!("{}", output::render_downloads(&reports));
    Ok(RunStatus::from_flags(
        reports.iter().all(|r| r.is_success()),
        ctx,
    ))
}

async fn tiles(_args: TilesArgs, config: &Config, ctx: &RunContext) -> CliResult<RunStatus> {
    let tiles = validate_tiles_config(config)?.clone();
    let store = Arc::new(S3ArtifactStore::from_config(&tiles));
    let uploader = TileUploader::new(store, tiles);

    let reports = uploader
        .run(ctx)
        .await
        .context("Failed to upload artifacts")?;
    print!("{}", output::render_tiles(&reports));
    Ok(RunStatus::from_flags(
        reports.iter().all(|r| r.is_success()),
        ctx,
    ))
}

/// Poll settings shown at startup.
pub fn describe_monitor(config: &MonitorConfig) -> String {
    format!(
        "every {}s, up to {}",
        config.poll_interval_secs,
        humanize(Duration::from_secs(config.max_wait_secs))
    )
}

fn humanize(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m{s}s"),
        (h, 0, _) => format!("{h}h"),
        (h, m, _) => format!("{h}h{m}m"),
    }
}
