use std::path::{Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::RunContext;
use crate::model::ErrorKind;
use crate::service::{ByteStream, ServiceError};

/// Errors raised while writing an archive to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download interrupted")]
    Interrupted,
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Service(e) => e.kind(),
            DownloadError::Io { .. } => ErrorKind::Io,
            DownloadError::Interrupted => ErrorKind::Interrupted,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::Service(e) if e.is_retryable())
    }
}

/// Temporary path bytes are streamed into before the final rename.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `body` into `dest`.
///
/// Bytes land in `<dest>.part` first, which is renamed over `dest` only after
/// the whole body was written. On any error the partial file is removed and
/// `dest` is left untouched. Returns the number of bytes written.
pub async fn write_stream(
    mut body: ByteStream,
    dest: &Path,
    ctx: &RunContext,
) -> Result<u64, DownloadError> {
    let io_err = |path: &Path, source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }

    let part = part_path(dest);
    let result = async {
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| io_err(&part, e))?;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            if ctx.is_cancelled() {
                return Err(DownloadError::Interrupted);
            }
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(|e| io_err(&part, e))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| io_err(&part, e))?;
        file.sync_all().await.map_err(|e| io_err(&part, e))?;
        Ok::<u64, DownloadError>(written)
    }
    .await;

    match result {
        Ok(written) => {
            tokio::fs::rename(&part, dest)
                .await
                .map_err(|e| io_err(dest, e))?;
            debug!(path = %dest.display(), bytes = written, "Archive written");
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn body(chunks: Vec<Result<&'static str, ServiceError>>) -> ByteStream {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        )
        .boxed()
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("converted/a_1.zip")),
            PathBuf::from("converted/a_1.zip.part")
        );
    }

    #[tokio::test]
    async fn test_write_stream_creates_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out/a_1.zip");
        let ctx = RunContext::new();

        let written = write_stream(body(vec![Ok("PK"), Ok("data")]), &dest, &ctx)
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PKdata");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_stream_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a_1.zip");
        std::fs::write(&dest, b"original").unwrap();
        let ctx = RunContext::new();

        let err = write_stream(
            body(vec![Ok("new"), Err(ServiceError::Transient("reset".into()))]),
            &dest,
            &ctx,
        )
        .await
        .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(std::fs::read(&dest).unwrap(), b"original");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_write() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a_1.zip");
        let ctx = RunContext::new();
        ctx.cancel();

        let err = write_stream(body(vec![Ok("x")]), &dest, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Interrupted));
        assert!(!dest.exists());
    }
}
