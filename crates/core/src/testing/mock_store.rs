//! Mock artifact store for testing.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::tiles::{ArtifactError, ArtifactStore};

/// An object recorded by [`MockArtifactStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub metadata: HashMap<String, String>,
}

/// In-memory [`ArtifactStore`] that records every put.
#[derive(Debug, Default)]
pub struct MockArtifactStore {
    objects: Arc<RwLock<Vec<StoredObject>>>,
    failing_keys: Arc<RwLock<HashSet<String>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put to `key` fail.
    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.write().await.insert(key.to_string());
    }

    /// Stored objects in put order.
    pub async fn objects(&self) -> Vec<StoredObject> {
        self.objects.read().await.clone()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &HashMap<String, String>,
    ) -> Result<(), ArtifactError> {
        if self.failing_keys.read().await.contains(key) {
            return Err(ArtifactError::Store(format!("mock failure for {key}")));
        }
        self.objects.write().await.push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            metadata: metadata.clone(),
        });
        Ok(())
    }
}
