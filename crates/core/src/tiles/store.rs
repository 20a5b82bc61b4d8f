use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use super::{ArtifactError, TilesConfig};

/// Object storage used for pre-tiled artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `body` under `bucket/key` with user metadata attached.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &HashMap<String, String>,
    ) -> Result<(), ArtifactError>;
}

/// S3 (or S3-compatible) artifact store.
///
/// Credentials come from the standard `AWS_*` environment variables. One
/// client is built per bucket and reused.
pub struct S3ArtifactStore {
    region: String,
    endpoint: Option<String>,
    stores: Mutex<HashMap<String, Arc<AmazonS3>>>,
}

impl S3ArtifactStore {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &TilesConfig) -> Self {
        Self::new(config.region.clone(), config.endpoint.clone())
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<AmazonS3>, ArtifactError> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| ArtifactError::Store("store cache poisoned".to_string()))?;
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.region.clone())
            .with_bucket_name(bucket);
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = Arc::new(
            builder
                .build()
                .map_err(|e| ArtifactError::Store(e.to_string()))?,
        );
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &HashMap<String, String>,
    ) -> Result<(), ArtifactError> {
        let store = self.store_for(bucket)?;
        let location = ObjectPath::from(key);
        let size = body.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, "application/zip".into());
        for (k, v) in metadata {
            attributes.insert(Attribute::Metadata(k.clone().into()), v.clone().into());
        }

        store
            .put_opts(&location, PutPayload::from(body), PutOptions::from(attributes))
            .await
            .map_err(|e| ArtifactError::Store(format!("put {bucket}/{key}: {e}")))?;

        debug!(bucket, key, bytes = size, "Artifact stored");
        Ok(())
    }
}
