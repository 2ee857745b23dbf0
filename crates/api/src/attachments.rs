//! Image attachments
//!
//! Uploads are validated by sniffing their bytes, stored content-addressed under
//! `<sha256>.<ext>`, and then posted to the thread through the hub's normal write path as an
//! image message. If that write fails, a freshly stored asset is removed again. Identical
//! bytes share one asset, so store, post and cleanup run under a per-key lock: an asset is
//! only removed by the upload that created it, before anyone else can reference it.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use supportchat_shared::{ChatError, Identity, Message, NewMessage};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::websocket::ChatHub;

/// Image types accepted for upload
pub const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, Error)]
pub enum AttachmentStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

impl From<std::io::Error> for AttachmentStoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AttachmentStoreError::NotFound,
            _ => AttachmentStoreError::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Unsupported attachment type: {0}")]
    UnsupportedType(String),
    #[error("Attachment is empty")]
    Empty,
    #[error("Attachment upload timed out")]
    Timeout,
    #[error("Attachment store error: {0}")]
    Asset(AttachmentStoreError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Byte storage for attachment assets, keyed by `<sha256>.<ext>`
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), AttachmentStoreError>;
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), AttachmentStoreError>;
    async fn delete(&self, key: &str) -> Result<(), AttachmentStoreError>;
}

/// Keys are generated by us; anything else is rejected before touching storage
pub fn is_valid_key(key: &str) -> bool {
    let Some((hash, ext)) = key.split_once('.') else {
        return false;
    };
    hash.len() == 64
        && hash.bytes().all(|b| b.is_ascii_hexdigit())
        && !ext.is_empty()
        && ext.len() <= 5
        && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn mime_of(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- Filesystem implementation ----------------

pub struct LocalAttachmentStore {
    root: PathBuf,
}

impl LocalAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(0..2).unwrap_or("00");
        self.root.join(shard).join(key)
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn save(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<(), AttachmentStoreError> {
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await? {
            return Err(AttachmentStoreError::Duplicate);
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        // Write then rename so a partial upload is never served
        let tmp = dir.join(format!(".{}.{}", key, Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(key = %key, size = bytes.len(), "Stored attachment");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), AttachmentStoreError> {
        let bytes = tokio::fs::read(self.path_for(key)).await?;
        let mime = mime_of(&bytes);
        Ok((bytes, mime))
    }

    async fn delete(&self, key: &str) -> Result<(), AttachmentStoreError> {
        tokio::fs::remove_file(self.path_for(key)).await?;
        Ok(())
    }
}

// ---------------- In-memory implementation ----------------

#[derive(Default, Clone)]
pub struct MemoryAttachmentStore {
    assets: Arc<RwLock<HashMap<String, (Vec<u8>, String)>>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.assets.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), AttachmentStoreError> {
        let mut assets = self.assets.write().await;
        if assets.contains_key(key) {
            return Err(AttachmentStoreError::Duplicate);
        }
        assets.insert(key.to_string(), (bytes.to_vec(), mime.to_string()));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), AttachmentStoreError> {
        self.assets
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(AttachmentStoreError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), AttachmentStoreError> {
        self.assets
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or(AttachmentStoreError::NotFound)
    }
}

// ---------------- Upload flow ----------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    pub key: String,
    pub mime: &'static str,
}

pub struct AttachmentHandler {
    store: Arc<dyn AttachmentStore>,
    public_url: String,
    max_bytes: usize,
    save_timeout: Duration,
    asset_locks: Arc<KeyedLocks<String>>,
}

impl AttachmentHandler {
    pub fn new(
        store: Arc<dyn AttachmentStore>,
        public_url: impl Into<String>,
        max_bytes: usize,
        save_timeout: Duration,
    ) -> Self {
        Self {
            store,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            max_bytes,
            save_timeout,
            asset_locks: KeyedLocks::new(),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Size and type checks; returns the content-addressed key
    pub fn validate(&self, bytes: &[u8]) -> Result<ValidatedImage, AttachmentError> {
        if bytes.is_empty() {
            return Err(AttachmentError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(AttachmentError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let kind = infer::get(bytes)
            .ok_or_else(|| AttachmentError::UnsupportedType("application/octet-stream".into()))?;
        let mime = ALLOWED_MIME
            .iter()
            .copied()
            .find(|allowed| *allowed == kind.mime_type())
            .ok_or_else(|| AttachmentError::UnsupportedType(kind.mime_type().to_string()))?;

        let hash = hex::encode(Sha256::digest(bytes));
        Ok(ValidatedImage {
            key: format!("{}.{}", hash, kind.extension()),
            mime,
        })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/api/v1/chat/attachments/{}", self.public_url, key)
    }

    /// Store an image and post it to `thread_id` as `uploader`
    pub async fn upload(
        &self,
        hub: &ChatHub,
        uploader: Identity,
        thread_id: Uuid,
        bytes: &[u8],
    ) -> Result<Message, AttachmentError> {
        let image = self.validate(bytes)?;

        // Fail fast before writing any bytes
        hub.authorize(&uploader, thread_id).await?;

        let _asset = self.asset_locks.lock(image.key.clone()).await;

        let created = match tokio::time::timeout(
            self.save_timeout,
            self.store.save(&image.key, image.mime, bytes),
        )
        .await
        {
            Err(_) => return Err(AttachmentError::Timeout),
            Ok(Ok(())) => true,
            // Same bytes uploaded before; reuse the asset
            Ok(Err(AttachmentStoreError::Duplicate)) => false,
            Ok(Err(e)) => return Err(AttachmentError::Asset(e)),
        };

        let url = self.url_for(&image.key);
        match hub
            .deliver(uploader, NewMessage::image(thread_id, uploader, url))
            .await
        {
            Ok(message) => {
                tracing::info!(
                    thread_id = %thread_id,
                    key = %image.key,
                    mime = image.mime,
                    size = bytes.len(),
                    "Attachment posted"
                );
                Ok(message)
            }
            Err(e) => {
                if created {
                    if let Err(cleanup) = self.store.delete(&image.key).await {
                        tracing::warn!(key = %image.key, error = %cleanup, "Failed to remove orphaned attachment");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Serve a stored asset
    pub async fn fetch(&self, key: &str) -> Result<(Vec<u8>, String), AttachmentError> {
        if !is_valid_key(key) {
            return Err(ChatError::NotFound.into());
        }
        match self.store.load(key).await {
            Ok(found) => Ok(found),
            Err(AttachmentStoreError::NotFound) => Err(ChatError::NotFound.into()),
            Err(e) => Err(AttachmentError::Asset(e)),
        }
    }
}
