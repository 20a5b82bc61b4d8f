//! Human-readable rendering of command results.

use std::fmt::Write as _;

use tilepush_core::{
    monitor::AssetWatch, ArchiveInfo, AssetInfo, BatchResult, DownloadReport, Outcome, TileReport,
};

pub fn render_batch(result: &BatchResult) -> String {
    let mut out = String::new();
    let elapsed = result.finished_at - result.started_at;

    let _ = writeln!(out, "{:<32} {:>10} {:<12} {:<10} DETAIL", "FILE", "ASSET", "STATUS", "OUTCOME");
    for item in &result.items {
        let asset = item
            .asset_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let detail = match (&item.failure, &item.archive) {
            (Some(failure), _) => failure.to_string(),
            (None, Some(archive)) => archive
                .local_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("archive {:?}", archive.status())),
            (None, None) => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<32} {:>10} {:<12} {:<10} {}",
            truncate(&item.name, 32),
            asset,
            item.status.as_str(),
            outcome_label(item.outcome),
            detail
        );
    }

    let _ = writeln!(
        out,
        "\n{} items in {}s: {} succeeded, {} failed, {} timed out, {} skipped",
        result.total(),
        elapsed.num_seconds(),
        result.succeeded,
        result.failed,
        result.timed_out,
        result.skipped
    );
    if let Some(reason) = &result.aborted {
        let _ = writeln!(out, "run aborted: {reason}");
    }
    out
}

pub fn render_assets(assets: &[AssetInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>10} {:<32} {:<14} {:>6} ADDED", "ID", "NAME", "STATUS", "%");
    for asset in assets {
        let percent = asset
            .percent_complete
            .map(|p| format!("{p:.0}"))
            .unwrap_or_else(|| "-".to_string());
        let added = asset
            .date_added
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>10} {:<32} {:<14} {:>6} {}",
            asset.id,
            truncate(&asset.name, 32),
            asset.status.as_str(),
            percent,
            added
        );
    }
    out
}

pub fn render_watches(watches: &[AssetWatch]) -> String {
    let mut out = String::new();
    for watch in watches {
        let status = watch
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| format!("{:?}", watch.verdict));
        let _ = writeln!(out, "{:>10} {:<12} polls={}", watch.asset_id, status, watch.polls);
    }
    out
}

pub fn render_archives(archives: &[ArchiveInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>10} {:<14} {:>12} ASSETS", "ID", "STATUS", "SIZE");
    for archive in archives {
        let size = archive
            .bytes_archived
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string());
        let assets: Vec<String> = archive.asset_ids.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(
            out,
            "{:>10} {:<14} {:>12} {}",
            archive.id,
            archive.status.as_str(),
            size,
            assets.join(",")
        );
    }
    out
}

pub fn render_downloads(reports: &[DownloadReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let line = match (&report.failure, &report.path) {
            (Some(failure), _) => format!("FAILED   {failure}"),
            (None, Some(path)) if report.skipped_existing => {
                format!("EXISTS   {}", path.display())
            }
            (None, Some(path)) => format!("OK       {} ({})", path.display(), format_bytes(report.bytes)),
            (None, None) => "OK".to_string(),
        };
        let _ = writeln!(out, "{:>10} {}", report.archive_id, line);
    }
    let failed = reports.iter().filter(|r| !r.is_success()).count();
    let _ = writeln!(out, "\n{} archives, {} failed", reports.len(), failed);
    out
}

pub fn render_tiles(reports: &[TileReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let name = report
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match &report.error {
            Some(error) => {
                let _ = writeln!(out, "FAILED   {name}: {error}");
            }
            None if report.skipped => {
                let _ = writeln!(out, "SKIPPED  {name}");
            }
            None => {
                let _ = writeln!(out, "OK       {name} -> {}", report.key.as_deref().unwrap_or(""));
            }
        }
    }
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    let skipped = reports.iter().filter(|r| r.skipped).count();
    let _ = writeln!(
        out,
        "\n{} artifacts: {} uploaded, {} failed, {} skipped",
        reports.len(),
        reports.len() - failed - skipped,
        failed,
        skipped
    );
    out
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Succeeded => "succeeded",
        Outcome::Failed => "failed",
        Outcome::TimedOut => "timed out",
        Outcome::Skipped => "skipped",
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use tilepush_core::{
        AssetStatus, ErrorKind, FailureDetail, ItemOutcome, RemoteStatus, Stage,
    };

    fn item(name: &str, outcome: Outcome, failure: Option<FailureDetail>) -> ItemOutcome {
        ItemOutcome {
            path: PathBuf::from(format!("data/{name}.gml")),
            name: name.to_string(),
            asset_id: Some(7),
            status: AssetStatus::Complete,
            outcome,
            archive: None,
            failure,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a_very_long_name", 6), "a_ver~");
    }

    #[test]
    fn test_batch_summary_counts() {
        let failure = FailureDetail::new(Stage::Upload, ErrorKind::NotFoundError, "HTTP 404");
        let result = BatchResult::new(
            vec![
                item("a", Outcome::Succeeded, None),
                item("b", Outcome::Failed, Some(failure)),
            ],
            Utc::now(),
            None,
        );

        let text = render_batch(&result);
        assert!(text.contains("2 items"));
        assert!(text.contains("1 succeeded, 1 failed"));
        assert!(text.contains("NotFoundError"));
        assert!(!text.contains("aborted"));
    }

    #[test]
    fn test_render_tiles_counts_skipped_apart() {
        let reports = vec![
            TileReport {
                path: PathBuf::from("tiles/a.zip"),
                key: Some("3d-tiles/a.zip".into()),
                error: None,
                skipped: false,
            },
            TileReport {
                path: PathBuf::from("tiles/b.zip"),
                key: None,
                error: Some("no matching centroid entry".into()),
                skipped: false,
            },
            TileReport {
                path: PathBuf::from("tiles/c.zip"),
                key: None,
                error: None,
                skipped: true,
            },
        ];
        let text = render_tiles(&reports);
        assert!(text.contains("SKIPPED  c.zip"));
        assert!(text.contains("3 artifacts: 1 uploaded, 1 failed, 1 skipped"));
    }

    #[test]
    fn test_render_archives() {
        let archives = vec![ArchiveInfo {
            id: 3,
            status: RemoteStatus::Complete,
            asset_ids: vec![10, 11],
            format: Some("ZIP".into()),
            bytes_archived: Some(4096),
            download_url: None,
        }];
        let text = render_archives(&archives);
        assert!(text.contains("COMPLETE"));
        assert!(text.contains("4.0 KiB"));
        assert!(text.contains("10,11"));
    }
}
