//! Cesium ion REST backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStoreExt, WriteMultipart};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::IonConfig;

use super::{
    ArchiveId, ArchiveInfo, AssetId, AssetInfo, ByteStream, CreateAssetRequest, CreatedAsset,
    OnComplete, RemoteStatus, ServiceError, TilingService, UploadLocation,
};

/// Region used for the temporary upload credentials.
const UPLOAD_REGION: &str = "us-east-1";

/// Bytes read from the source file per write.
const UPLOAD_READ_SIZE: usize = 1024 * 1024;

/// Multipart parts in flight per upload.
const UPLOAD_PARTS_IN_FLIGHT: usize = 4;

/// Cesium ion client implementation.
pub struct IonClient {
    client: Client,
    /// Separate client with a longer timeout for archive bodies.
    download_client: Client,
    config: IonConfig,
}

impl IonClient {
    /// Create a new ion client.
    pub fn new(config: IonConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InvalidInput(format!("HTTP client: {e}")))?;
        let download_client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InvalidInput(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            download_client,
            config,
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url(), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ServiceError> {
        let response = builder.send().await.map_err(map_transport)?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Server(format!("failed to decode response: {e}")))
    }

    /// Stream the source file into the temporary upload location.
    async fn put_source(&self, location: &UploadLocation, file: &Path) -> Result<(), ServiceError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ServiceError::InvalidInput(format!("{} has no file name", file.display())))?;
        let unreadable =
            |e: std::io::Error| ServiceError::InvalidInput(format!("cannot read {}: {e}", file.display()));
        let mut source = tokio::fs::File::open(file).await.map_err(unreadable)?;

        let store = AmazonS3Builder::new()
            .with_bucket_name(&location.bucket)
            .with_region(UPLOAD_REGION)
            .with_endpoint(&location.endpoint)
            .with_access_key_id(&location.access_key)
            .with_secret_access_key(&location.secret_access_key)
            .with_token(&location.session_token)
            .build()
            .map_err(|e| ServiceError::Server(format!("invalid upload location: {e}")))?;

        let key = format!("{}{}", location.prefix, file_name);
        debug!(bucket = %location.bucket, key = %key, "Uploading source file");

        let upload = store
            .put_multipart(&ObjectPath::from(key.as_str()))
            .await
            .map_err(map_object_store)?;
        let mut writer = WriteMultipart::new(upload);
        let mut buf = vec![0u8; UPLOAD_READ_SIZE];
        let mut size: u64 = 0;
        loop {
            let read = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(unreadable(e));
                }
            };
            writer
                .wait_for_capacity(UPLOAD_PARTS_IN_FLIGHT)
                .await
                .map_err(map_object_store)?;
            writer.write(&buf[..read]);
            size += read as u64;
        }
        writer.finish().await.map_err(map_object_store)?;

        debug!(key = %key, size_bytes = size, "Source file stored");
        Ok(())
    }

    async fn notify_complete(&self, on_complete: &OnComplete) -> Result<(), ServiceError> {
        let method = Method::from_bytes(on_complete.method.as_bytes())
            .map_err(|_| ServiceError::Server(format!("bad onComplete method {}", on_complete.method)))?;
        let builder = self
            .client
            .request(method, &on_complete.url)
            .bearer_auth(&self.config.token)
            .json(&on_complete.fields);
        self.send(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl TilingService for IonClient {
    fn name(&self) -> &str {
        "cesium-ion"
    }

    async fn create_asset(
        &self,
        request: &CreateAssetRequest,
    ) -> Result<CreatedAsset, ServiceError> {
        if request.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput("asset name is empty".into()));
        }

        let body = json!({
            "name": request.name,
            "description": request.description,
            "type": request.asset_type,
            "options": { "sourceType": request.source_type },
        });

        let created: IonCreateAssetResponse = self
            .send_json(self.request(Method::POST, "/v1/assets").json(&body))
            .await?;

        info!(asset_id = created.asset_metadata.id, name = %request.name, "Created asset");

        Ok(CreatedAsset {
            id: created.asset_metadata.id,
            name: created.asset_metadata.name,
            upload_location: created.upload_location,
            on_complete: created.on_complete,
        })
    }

    async fn upload_payload(&self, asset: &CreatedAsset, file: &Path) -> Result<(), ServiceError> {
        let is_file = tokio::fs::metadata(file)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ServiceError::InvalidInput(format!(
                "{} is not a readable file",
                file.display()
            )));
        }
        let location = asset.upload_location.as_ref().ok_or_else(|| {
            ServiceError::Server(format!("asset {} has no upload location", asset.id))
        })?;

        self.put_source(location, file).await?;

        match &asset.on_complete {
            Some(on_complete) => self.notify_complete(on_complete).await?,
            None => warn!(asset_id = asset.id, "No onComplete callback, processing may not start"),
        }

        info!(asset_id = asset.id, file = %file.display(), "Uploaded source file");
        Ok(())
    }

    async fn get_status(&self, asset_id: AssetId) -> Result<AssetInfo, ServiceError> {
        let asset: IonAsset = self
            .send_json(self.request(Method::GET, &format!("/v1/assets/{asset_id}")))
            .await?;
        Ok(asset.into_asset_info())
    }

    async fn list_assets(&self, limit: usize) -> Result<Vec<AssetInfo>, ServiceError> {
        let limit_param = limit.to_string();
        let page: IonPage<IonAsset> = self
            .send_json(self.request(Method::GET, "/v1/assets").query(&[
                ("limit", limit_param.as_str()),
                ("sortBy", "DATE_ADDED"),
                ("sortOrder", "DESC"),
            ]))
            .await?;

        let mut assets: Vec<AssetInfo> = page
            .items
            .into_iter()
            .map(IonAsset::into_asset_info)
            .collect();
        // The server honours sortBy, but older deployments ignore it.
        assets.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        assets.truncate(limit);
        Ok(assets)
    }

    async fn create_archive(&self, asset_id: AssetId) -> Result<ArchiveInfo, ServiceError> {
        let body = json!({
            "assetIds": [asset_id],
            "format": "ZIP",
            "type": "FULL",
        });
        let archive: IonArchive = self
            .send_json(self.request(Method::POST, "/v1/archives").json(&body))
            .await?;
        info!(asset_id, archive_id = archive.id, "Requested archive");

        let mut info = archive.into_archive_info();
        if info.asset_ids.is_empty() {
            info.asset_ids.push(asset_id);
        }
        Ok(info)
    }

    async fn get_archive(&self, archive_id: ArchiveId) -> Result<ArchiveInfo, ServiceError> {
        let archive: IonArchive = self
            .send_json(self.request(Method::GET, &format!("/v1/archives/{archive_id}")))
            .await?;
        Ok(archive.into_archive_info())
    }

    async fn list_archives(&self) -> Result<Vec<ArchiveInfo>, ServiceError> {
        let page: IonPage<IonArchive> = self
            .send_json(self.request(Method::GET, "/v1/archives"))
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(IonArchive::into_archive_info)
            .collect())
    }

    async fn download_archive(&self, archive: &ArchiveInfo) -> Result<ByteStream, ServiceError> {
        let url = match &archive.download_url {
            Some(url) => url.clone(),
            None => format!("{}/v1/archives/{}/download", self.base_url(), archive.id),
        };

        let response = self
            .download_client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(map_transport)?;
        let response = check_status(response).await?;

        debug!(
            archive_id = archive.id,
            content_length = response.content_length(),
            "Streaming archive"
        );

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_transport))
            .boxed())
    }
}

/// Map a reqwest transport error.
fn map_transport(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ServiceError::Transient(e.to_string())
    } else if e.is_decode() {
        ServiceError::Server(format!("failed to decode response: {e}"))
    } else {
        ServiceError::Server(e.to_string())
    }
}

fn map_object_store(e: object_store::Error) -> ServiceError {
    match e {
        object_store::Error::NotFound { path, .. } => ServiceError::NotFound(path),
        object_store::Error::Unauthenticated { path, source }
        | object_store::Error::PermissionDenied { path, source } => {
            ServiceError::Auth(format!("{path}: {source}"))
        }
        object_store::Error::Generic { store, source } => {
            ServiceError::Transient(format!("{store}: {source}"))
        }
        other => ServiceError::Server(other.to_string()),
    }
}

/// Map a non-success status code to the matching error.
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("HTTP {} for {}", status.as_u16(), url)
    } else {
        format!("HTTP {} for {}: {}", status.as_u16(), url, truncate(&body, 200))
    };

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth(message),
        StatusCode::NOT_FOUND => ServiceError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited { retry_after },
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ServiceError::Transient(message)
        }
        _ => ServiceError::Server(message),
    })
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// Wire types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IonPage<T> {
    #[serde(default = "Vec::new", alias = "assets", alias = "archives")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IonCreateAssetResponse {
    asset_metadata: IonAsset,
    upload_location: Option<UploadLocation>,
    on_complete: Option<OnComplete>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IonAsset {
    id: AssetId,
    #[serde(default)]
    name: String,
    status: RemoteStatus,
    percent_complete: Option<f64>,
    date_added: Option<DateTime<Utc>>,
    description: Option<String>,
    #[serde(rename = "type")]
    asset_type: Option<String>,
}

impl IonAsset {
    fn into_asset_info(self) -> AssetInfo {
        AssetInfo {
            id: self.id,
            name: self.name,
            status: self.status,
            percent_complete: self.percent_complete,
            date_added: self.date_added,
            description: self.description,
            asset_type: self.asset_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IonArchive {
    id: ArchiveId,
    #[serde(default = "unknown_status")]
    status: RemoteStatus,
    #[serde(default)]
    asset_ids: Vec<AssetId>,
    format: Option<String>,
    bytes_archived: Option<u64>,
}

fn unknown_status() -> RemoteStatus {
    RemoteStatus::Unknown
}

impl IonArchive {
    fn into_archive_info(self) -> ArchiveInfo {
        ArchiveInfo {
            id: self.id,
            status: self.status,
            asset_ids: self.asset_ids,
            format: self.format,
            bytes_archived: self.bytes_archived,
            download_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::TryStreamExt;

    fn client_for(server: &mockito::Server) -> IonClient {
        IonClient::new(IonConfig {
            url: server.url(),
            token: "test-token".to_string(),
            timeout_secs: 5,
            download_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_asset_sends_bearer_and_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/assets")
            .match_header("authorization", "Bearer test-token")
            .match_body(mockito::Matcher::PartialJson(json!({
                "name": "block_1",
                "type": "3DTILES",
                "options": { "sourceType": "CITYGML" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "assetMetadata": {"id": 42, "name": "block_1", "status": "AWAITING_FILES"},
                    "uploadLocation": {
                        "endpoint": "https://s3.amazonaws.com",
                        "bucket": "assets.cesium.com",
                        "prefix": "sources/42/",
                        "accessKey": "AK",
                        "secretAccessKey": "SK",
                        "sessionToken": "ST"
                    },
                    "onComplete": {"method": "POST", "url": "https://api.cesium.com/v1/assets/42/uploadComplete", "fields": {}}
                }"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let created = client
            .create_asset(&CreateAssetRequest::new("block_1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(created.id, 42);
        let location = created.upload_location.unwrap();
        assert_eq!(location.prefix, "sources/42/");
        assert_eq!(location.secret_access_key, "SK");
        assert_eq!(created.on_complete.unwrap().method, "POST");
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected_locally() {
        let server = mockito::Server::new_async().await;
        let client = client_for(&server);
        let err = client
            .create_asset(&CreateAssetRequest::new("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_get_status_parses_asset() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/assets/7")
            .with_status(200)
            .with_body(
                r#"{"id": 7, "name": "a", "type": "3DTILES", "status": "IN_PROGRESS",
                    "percentComplete": 55, "dateAdded": "2024-03-01T10:00:00.000Z"}"#,
            )
            .create_async()
            .await;

        let info = client_for(&server).get_status(7).await.unwrap();
        assert_eq!(info.id, 7);
        assert_eq!(info.status, RemoteStatus::InProgress);
        assert_eq!(info.percent_complete, Some(55.0));
        assert_eq!(info.asset_type.as_deref(), Some("3DTILES"));
        assert!(info.date_added.is_some());
    }

    #[tokio::test]
    async fn test_status_code_mapping() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/v1/assets/1").with_status(401).create_async().await;
        server.mock("GET", "/v1/assets/2").with_status(404).create_async().await;
        server
            .mock("GET", "/v1/assets/3")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;
        server.mock("GET", "/v1/assets/4").with_status(503).create_async().await;
        server.mock("GET", "/v1/assets/5").with_status(500).create_async().await;
        server
            .mock("GET", "/v1/assets/6")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(client.get_status(1).await, Err(ServiceError::Auth(_))));
        assert!(matches!(client.get_status(2).await, Err(ServiceError::NotFound(_))));
        assert_eq!(
            client.get_status(3).await.unwrap_err(),
            ServiceError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert!(matches!(client.get_status(4).await, Err(ServiceError::Transient(_))));
        assert!(matches!(client.get_status(5).await, Err(ServiceError::Server(_))));
        assert!(matches!(client.get_status(6).await, Err(ServiceError::Server(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = IonClient::new(IonConfig {
            url: "http://127.0.0.1:1".to_string(),
            token: "t".to_string(),
            timeout_secs: 2,
            download_timeout_secs: 2,
        })
        .unwrap();
        let err = client.get_status(1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_list_assets_sorted_newest_first() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/assets")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "2".into()))
            .with_status(200)
            .with_body(
                r#"{"items": [
                    {"id": 1, "name": "old", "status": "COMPLETE", "dateAdded": "2024-01-01T00:00:00Z"},
                    {"id": 2, "name": "new", "status": "COMPLETE", "dateAdded": "2024-02-01T00:00:00Z"}
                ]}"#,
            )
            .create_async()
            .await;

        let assets = client_for(&server).list_assets(2).await.unwrap();
        let ids: Vec<_> = assets.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_create_archive_and_download() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/archives")
            .match_body(mockito::Matcher::PartialJson(json!({
                "assetIds": [9],
                "format": "ZIP"
            })))
            .with_status(200)
            .with_body(r#"{"id": 300, "status": "IN_PROGRESS"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/archives/300/download")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body("PK-archive-bytes")
            .create_async()
            .await;

        let client = client_for(&server);
        let archive = client.create_archive(9).await.unwrap();
        assert_eq!(archive.id, 300);
        assert_eq!(archive.asset_ids, vec![9]);
        assert_eq!(archive.status, RemoteStatus::InProgress);

        let chunks: Vec<Bytes> = client
            .download_archive(&archive)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, b"PK-archive-bytes");
    }

    #[tokio::test]
    async fn test_list_archives() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/archives")
            .with_status(200)
            .with_body(
                r#"{"items": [
                    {"id": 1, "status": "COMPLETE", "assetIds": [10], "format": "ZIP", "bytesArchived": 2048},
                    {"id": 2, "status": "IN_PROGRESS", "assetIds": [11]}
                ]}"#,
            )
            .create_async()
            .await;

        let archives = client_for(&server).list_archives().await.unwrap();
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].status, RemoteStatus::Complete);
        assert_eq!(archives[0].bytes_archived, Some(2048));
        assert_eq!(archives[1].asset_ids, vec![11]);
    }

    #[tokio::test]
    async fn test_upload_payload_requires_existing_file() {
        let server = mockito::Server::new_async().await;
        let client = client_for(&server);
        let asset = CreatedAsset {
            id: 1,
            name: "x".into(),
            upload_location: None,
            on_complete: None,
        };
        let err = client
            .upload_payload(&asset, Path::new("/definitely/missing.gml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_upload_payload_rejects_directory() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::TempDir::new().unwrap();
        let asset = CreatedAsset {
            id: 1,
            name: "x".into(),
            upload_location: None,
            on_complete: None,
        };
        let err = client_for(&server)
            .upload_payload(&asset, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_object_store_credential_errors_are_auth() {
        let denied = map_object_store(object_store::Error::PermissionDenied {
            path: "uploads/a.gml".into(),
            source: "access denied".into(),
        });
        assert!(denied.is_auth());
        assert!(!denied.is_retryable());

        let expired = map_object_store(object_store::Error::Unauthenticated {
            path: "uploads/a.gml".into(),
            source: "expired token".into(),
        });
        assert!(matches!(expired, ServiceError::Auth(_)));

        let generic = map_object_store(object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        });
        assert!(generic.is_retryable());
    }
}
