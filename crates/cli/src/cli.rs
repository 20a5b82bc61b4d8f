//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use tilepush_core::{Config, ExistingFilePolicy, StageSelection};

#[derive(Debug, Parser)]
#[command(
    name = "tilepush",
    version,
    about = "Upload source data to a 3D tiling service and fetch the results"
)]
pub struct Cli {
    /// Configuration file (default: ./tilepush.toml if present)
    #[arg(long, global = true, env = "TILEPUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins if set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload every source file in a directory
    Upload(UploadArgs),
    /// Show (or follow) the processing status of assets
    Status(StatusArgs),
    /// List the most recent assets
    Assets(AssetsArgs),
    /// List or download archives
    #[command(subcommand)]
    Archives(ArchivesCommand),
    /// Upload pre-tiled archives to the object store
    Tiles(TilesArgs),
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Upload(_) => "upload",
            Command::Status(_) => "status",
            Command::Assets(_) => "assets",
            Command::Archives(ArchivesCommand::List) => "archives list",
            Command::Archives(ArchivesCommand::Download(_)) => "archives download",
            Command::Tiles(_) => "tiles",
        }
    }
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Directory with source files (overrides upload.input_dir)
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Wait until the service finished tiling each asset
    #[arg(long)]
    pub wait: bool,

    /// Request an archive for every completed asset (implies --wait)
    #[arg(long)]
    pub archive: bool,

    /// Download the archives (implies --archive)
    #[arg(long)]
    pub download: bool,

    /// Where archives are written (overrides archive.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Concurrent uploads (overrides upload.workers)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Replace archives that already exist locally
    #[arg(long)]
    pub overwrite: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

impl UploadArgs {
    pub fn stages(&self) -> StageSelection {
        StageSelection::new(self.wait, self.archive, self.download)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.input_dir {
            config.upload.input_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.upload.workers = workers;
        }
        apply_archive_overrides(config, self.output_dir.as_ref(), self.overwrite);
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Asset identifiers
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<u64>,

    /// Keep polling until every asset reaches a terminal status
    #[arg(long)]
    pub monitor: bool,

    /// Poll interval in seconds (overrides monitor.poll_interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,
}

impl StatusArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval {
            config.monitor.poll_interval_secs = interval;
        }
    }
}

#[derive(Debug, Args)]
pub struct AssetsArgs {
    /// Number of assets to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Subcommand)]
pub enum ArchivesCommand {
    /// List archives known to the service
    List,
    /// Download archives by id (all COMPLETE archives when no id is given)
    Download(ArchiveDownloadArgs),
}

#[derive(Debug, Args)]
pub struct ArchiveDownloadArgs {
    /// Archive identifiers
    pub ids: Vec<u64>,

    /// Where archives are written (overrides archive.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Replace archives that already exist locally
    #[arg(long)]
    pub overwrite: bool,
}

impl ArchiveDownloadArgs {
    pub fn apply(&self, config: &mut Config) {
        apply_archive_overrides(config, self.output_dir.as_ref(), self.overwrite);
    }
}

#[derive(Debug, Args)]
pub struct TilesArgs {
    /// Directory with *.zip artifacts (overrides tiles.input_dir)
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Centroid CSV (overrides tiles.centroids)
    #[arg(long)]
    pub centroids: Option<PathBuf>,

    /// Destination bucket (overrides tiles.bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Concurrent uploads (overrides tiles.workers)
    #[arg(long)]
    pub workers: Option<usize>,
}

impl TilesArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(bucket) = &self.bucket {
            let tiles = config
                .tiles
                .get_or_insert_with(|| tilepush_core::TilesConfig::new(bucket.clone()));
            tiles.bucket = bucket.clone();
        }
        let Some(tiles) = config.tiles.as_mut() else {
            return;
        };
        if let Some(dir) = &self.input_dir {
            tiles.input_dir = dir.clone();
        }
        if let Some(path) = &self.centroids {
            tiles.centroids = Some(path.clone());
        }
        if let Some(workers) = self.workers {
            tiles.workers = workers;
        }
    }
}

fn apply_archive_overrides(config: &mut Config, output_dir: Option<&PathBuf>, overwrite: bool) {
    if let Some(dir) = output_dir {
        config.archive.output_dir = dir.clone();
    }
    if overwrite {
        config.archive.existing = ExistingFilePolicy::Overwrite;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_upload_flags() {
        let cli = parse(&[
            "tilepush",
            "upload",
            "--input-dir",
            "gml",
            "--download",
            "--workers",
            "8",
        ]);
        let Command::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        let stages = args.stages();
        assert!(stages.wait && stages.archive && stages.download);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.upload.input_dir, PathBuf::from("gml"));
        assert_eq!(config.upload.workers, 8);
        assert_eq!(config.archive.existing, ExistingFilePolicy::Skip);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["tilepush", "assets", "-vv", "--log-json", "--limit", "5"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_json);
        let Command::Assets(args) = cli.command else {
            panic!("expected assets");
        };
        assert_eq!(args.limit, 5);
    }

    #[test]
    fn test_status_requires_ids() {
        assert!(Cli::try_parse_from(["tilepush", "status"]).is_err());
        let cli = parse(&["tilepush", "status", "1", "2", "--monitor", "--interval", "10"]);
        let Command::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.ids, vec![1, 2]);
        assert!(args.monitor);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.monitor.poll_interval_secs, 10);
    }

    #[test]
    fn test_archives_download_without_ids() {
        let cli = parse(&["tilepush", "archives", "download", "--overwrite"]);
        assert_eq!(cli.command.label(), "archives download");
        let Command::Archives(ArchivesCommand::Download(args)) = cli.command else {
            panic!("expected archives download");
        };
        assert!(args.ids.is_empty());

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.archive.existing, ExistingFilePolicy::Overwrite);
    }

    #[test]
    fn test_tiles_bucket_creates_section() {
        let cli = parse(&["tilepush", "tiles", "--bucket", "city", "--workers", "2"]);
        let Command::Tiles(args) = cli.command else {
            panic!("expected tiles");
        };
        let mut config = Config::default();
        args.apply(&mut config);
        let tiles = config.tiles.unwrap();
        assert_eq!(tiles.bucket, "city");
        assert_eq!(tiles.workers, 2);
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["tilepush", "convert"]).is_err());
    }
}
