use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors raised while scanning the input directory.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Input directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// List regular files directly inside `dir` whose extension matches
/// `extension` (case-insensitive, leading dot optional).
///
/// The result is sorted by path so runs are reproducible.
pub async fn scan_input_dir(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ScanError> {
    let wanted = extension.trim_start_matches('.').to_ascii_lowercase();

    let meta = tokio::fs::metadata(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScanError::NotFound(dir.to_path_buf())
        } else {
            ScanError::Io {
                path: dir.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !meta.is_dir() {
        return Err(ScanError::NotADirectory(dir.to_path_buf()));
    }

    let io_err = |source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let matches = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase() == wanted)
            .unwrap_or(false);
        if !matches {
            continue;
        }
        // Follows symlinks, so a link to a regular file counts.
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => files.push(path),
            _ => continue,
        }
    }

    files.sort();
    files.dedup();
    debug!(dir = %dir.display(), extension = %wanted, count = files.len(), "Scanned input directory");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.gml", "a.GML", "notes.txt", "c.gml.bak"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.gml")).unwrap();

        let files = scan_input_dir(dir.path(), "gml").await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.GML", "b.gml"]);
    }

    #[tokio::test]
    async fn test_scan_accepts_dotted_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.zip"), b"x").unwrap();
        let files = scan_input_dir(dir.path(), ".zip").await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(scan_input_dir(dir.path(), "gml").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_missing_dir() {
        let err = scan_input_dir(Path::new("/nonexistent/data"), "gml")
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_scan_file_instead_of_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.gml");
        std::fs::write(&file, b"x").unwrap();
        let err = scan_input_dir(&file, "gml").await.unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }
}
