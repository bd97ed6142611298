//! Object storage for generated audio files.
//!
//! Two backends are provided: [`LocalObjectStore`] writes under a directory
//! (development and tests), and [`HttpObjectStore`] talks to an S3-style
//! bucket gateway that accepts authenticated `PUT`/`HEAD`/`DELETE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::ObjectStoreError;

/// Cache header attached to every uploaded object. Audio never changes once written.
pub const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Public host serving uploaded audio.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://audio.linguadojo.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Storage for immutable blobs addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;

    /// Removes `key`. Returns `false` if nothing was stored there.
    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError>;

    fn public_url(&self, key: &str) -> String;
}

/// Rejects keys that could escape the bucket or directory.
fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "..");
    if invalid {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), "Stored object");
        Ok(self.public_url(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

/// Uploads objects to an HTTP bucket endpoint.
pub struct HttpObjectStore {
    upload_base_url: String,
    public_base_url: String,
    token: Option<String>,
    http_client: Client,
}

impl std::fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("upload_base_url", &self.upload_base_url)
            .field("public_base_url", &self.public_base_url)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpObjectStore {
    pub fn new(
        upload_base_url: impl Into<String>,
        public_base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            upload_base_url: upload_base_url.into(),
            public_base_url: public_base_url.into(),
            token,
            http_client,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        let url = join_url(&self.upload_base_url, key);
        let size = bytes.len();

        let response = self
            .authorized(self.http_client.put(&url))
            .header("Content-Type", content_type)
            .header("Cache-Control", CACHE_CONTROL)
            .header("x-amz-meta-uploaded-by", "test-generation")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ObjectStoreError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::UploadFailed {
                key: key.to_string(),
                reason: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        tracing::debug!(key = %key, bytes = size, "Uploaded object");
        Ok(self.public_url(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        let url = join_url(&self.upload_base_url, key);
        let response = self
            .authorized(self.http_client.head(&url))
            .send()
            .await
            .map_err(|e| ObjectStoreError::RequestFailed(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        let url = join_url(&self.upload_base_url, key);
        let response = self
            .authorized(self.http_client.delete(&url))
            .send()
            .await
            .map_err(|e| ObjectStoreError::RequestFailed(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(ObjectStoreError::RequestFailed(format!(
                "DELETE {} returned HTTP {}",
                key,
                s.as_u16()
            ))),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("es-d4-market-day.mp3").is_ok());
        assert!(validate_key("audio/es/test.mp3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("../escape.mp3").is_err());
        assert!(validate_key("a//b").is_err());
    }

    #[test]
    fn test_public_url_joins_cleanly() {
        let store = LocalObjectStore::new("/tmp/unused", "https://cdn.example.com/");
        assert_eq!(
            store.public_url("clip.mp3"),
            "https://cdn.example.com/clip.mp3"
        );
    }

    #[tokio::test]
    async fn test_local_put_exists_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path(), DEFAULT_PUBLIC_BASE_URL);

        assert!(!store.exists("clip.mp3").await.unwrap());

        let url = store
            .put("clip.mp3", vec![1, 2, 3], "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(url, "https://audio.linguadojo.com/clip.mp3");
        assert!(store.exists("clip.mp3").await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join("clip.mp3")).unwrap(),
            vec![1, 2, 3]
        );

        assert!(store.delete("clip.mp3").await.unwrap());
        assert!(!store.delete("clip.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_put_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path(), DEFAULT_PUBLIC_BASE_URL);
        let err = store
            .put("../outside.mp3", vec![0], "audio/mpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_http_put_connection_error() {
        let store = HttpObjectStore::new("http://localhost:65535", DEFAULT_PUBLIC_BASE_URL, None);
        let err = store
            .put("clip.mp3", vec![0], "audio/mpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::RequestFailed(_)));
        assert_eq!(
            store.public_url("clip.mp3"),
            "https://audio.linguadojo.com/clip.mp3"
        );
    }
}
