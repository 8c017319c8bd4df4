//! File storage abstraction
//!
//! Two stores back the media pipeline: a local cache under the media root
//! (swept after the cache TTL) and the permanent HTTP object store keyed by
//! the tenant/conversation/message layout.

use async_trait::async_trait;
use flowchat_common::config::StorageConfig;
use flowchat_common::types::{AttachmentId, ConversationId, MessageId, TenantId};
use flowchat_common::{Error, Result};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a file and return its location
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read a file
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Object key for a permanently stored attachment
pub fn attachment_object_key(
    tenant_id: TenantId,
    conversation_id: ConversationId,
    message_id: MessageId,
    attachment_id: AttachmentId,
    ext: &str,
) -> String {
    format!(
        "tenants/{}/conversations/{}/{}/{}.{}",
        tenant_id, conversation_id, message_id, attachment_id, ext
    )
}

/// Relative cache path for a locally cached attachment
pub fn attachment_cache_path(
    tenant_id: TenantId,
    conversation_id: ConversationId,
    attachment_id: AttachmentId,
    ext: &str,
) -> String {
    format!("{}/{}/{}.{}", tenant_id, conversation_id, attachment_id, ext)
}

/// Local filesystem storage for the media cache
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.media_path)
    }

    /// Create a new local storage instance from a path
    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local media cache");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Get full path for a relative path, with path traversal protection
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full = self.full_path(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let mut file = fs::File::create(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush file: {}", e)))?;

        debug!(path = %full.display(), bytes = data.len(), "Stored file");
        Ok(full.to_string_lossy().to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path)?;
        fs::read(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read file: {}", e)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            // already gone is fine for a cache sweep
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete file: {}", e))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        Ok(fs::try_exists(&full).await.unwrap_or(false))
    }
}

impl LocalStorage {
    /// Delete a file by its absolute path, constrained to the cache root.
    /// Used by the sweep, which stores absolute paths on the attachment row.
    pub async fn delete_absolute(&self, absolute: &str) -> Result<()> {
        let path = PathBuf::from(absolute);
        if !path.starts_with(&self.base_path) {
            return Err(Error::Storage(
                "Refusing to delete outside the media cache".to_string(),
            ));
        }
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete file: {}", e))),
        }
    }
}

/// Permanent object store over HTTP. Objects are PUT/GET by key below the
/// configured base URL, authenticated with a bearer credential.
pub struct ObjectStore {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<String>,
}

impl ObjectStore {
    /// Create an object store client from config. Returns None when no
    /// object store is configured (attachments then stay cache-only).
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        let base_url = config.object_store_url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: config.object_store_credentials.clone(),
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl FileStorage for ObjectStore {
    async fn store(&self, key: &str, data: &[u8]) -> Result<String> {
        let url = self.url_for(key);
        let response = self
            .authorize(self.client.put(&url))
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Object store upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "Object store upload failed with status {}",
                response.status()
            )));
        }

        debug!(key, bytes = data.len(), "Uploaded object");
        Ok(url)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .authorize(self.client.get(self.url_for(key)))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Object store read failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "Object store read failed with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("Object store read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url_for(key)))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Object store delete failed: {}", e)))?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(Error::Storage(format!(
                "Object store delete failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self
            .authorize(self.client.head(self.url_for(key)))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Object store head failed: {}", e)))?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_object_key_layout() {
        let t = Uuid::nil();
        let key = attachment_object_key(t, t, t, t, "jpg");
        assert_eq!(
            key,
            format!("tenants/{t}/conversations/{t}/{t}/{t}.jpg")
        );
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::from_path(dir.path()).unwrap();

        let path = storage.store("t1/c1/a1.bin", b"payload").await.unwrap();
        assert!(storage.exists("t1/c1/a1.bin").await.unwrap());
        assert_eq!(storage.read("t1/c1/a1.bin").await.unwrap(), b"payload");

        storage.delete_absolute(&path).await.unwrap();
        assert!(!storage.exists("t1/c1/a1.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::from_path(dir.path()).unwrap();

        assert!(storage.store("../escape.bin", b"x").await.is_err());
        assert!(storage.read("/etc/passwd").await.is_err());
    }
}
