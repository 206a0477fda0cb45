//! Filesystem artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

use crate::asset::{Artifact, AssetRequest};

use super::{ArtifactStore, StorageError};

const BUFFER_SIZE: usize = 64 * 1024;

/// Stores artifacts under `{root}/{episode}/{asset_type}/{rank|shared}/`.
///
/// Files are named by the first 16 hex chars of their SHA-256, written to a
/// temp file first and renamed into place. A file is never overwritten.
pub struct FsArtifactStore {
    root: PathBuf,
    client: Client,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            client: Client::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lowercase extension of the location's last path segment, or "bin".
    fn extension_of(location: &str) -> String {
        let path = location
            .split(['?', '#'])
            .next()
            .unwrap_or(location);
        let segment = path.rsplit('/').next().unwrap_or(path);
        match segment.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && ext.len() <= 5
                    && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                ext.to_ascii_lowercase()
            }
            _ => "bin".to_string(),
        }
    }

    /// Stream a remote URL into `writer`, hashing as it goes.
    async fn download(
        &self,
        url: &str,
        writer: &mut BufWriter<File>,
        temp: &Path,
    ) -> Result<String, StorageError> {
        let download_err = |message: String| StorageError::Download {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let mut hasher = Sha256::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            hasher.update(&chunk);
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| StorageError::io(temp, e))?;
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Copy a local file into `writer`, hashing as it goes.
    async fn copy_local(
        source: &Path,
        writer: &mut BufWriter<File>,
        temp: &Path,
    ) -> Result<String, StorageError> {
        let file = File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                StorageError::io(source, e)
            }
        })?;

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut hasher = Sha256::new();
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| StorageError::io(source, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            writer
                .write_all(&buffer[..bytes_read])
                .await
                .map_err(|e| StorageError::io(temp, e))?;
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn write_temp(&self, location: &str, temp: &Path) -> Result<String, StorageError> {
        let file = File::create(temp)
            .await
            .map_err(|e| StorageError::io(temp, e))?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);

        let hash = if location.starts_with("http://") || location.starts_with("https://") {
            self.download(location, &mut writer, temp).await?
        } else if let Some(path) = location.strip_prefix("file://") {
            Self::copy_local(Path::new(path), &mut writer, temp).await?
        } else if location.contains("://") {
            return Err(StorageError::UnsupportedLocation(location.to_string()));
        } else {
            Self::copy_local(Path::new(location), &mut writer, temp).await?
        };

        writer.flush().await.map_err(|e| StorageError::io(temp, e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| StorageError::io(temp, e))?;
        Ok(hash)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist(
        &self,
        request: &AssetRequest,
        artifact: &Artifact,
    ) -> Result<Artifact, StorageError> {
        if let Some(expired_at) = artifact.expires_at {
            if artifact.is_expired(Utc::now()) {
                return Err(StorageError::Expired {
                    location: artifact.location.clone(),
                    expired_at,
                });
            }
        }

        let dir = self.root.join(request.storage_key());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;

        let temp = dir.join(format!(".{}.partial", uuid::Uuid::new_v4()));
        let hash = match self.write_temp(&artifact.location, &temp).await {
            Ok(hash) => hash,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        let ext = Self::extension_of(&artifact.location);
        let final_path = dir.join(format!("{}.{}", &hash[..16], ext));

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            debug!(path = %final_path.display(), "Identical artifact already stored");
            let _ = fs::remove_file(&temp).await;
        } else {
            fs::rename(&temp, &final_path)
                .await
                .map_err(|e| StorageError::io(&final_path, e))?;
            info!(
                path = %final_path.display(),
                hash = %hash,
                "Artifact persisted"
            );
        }

        let mut stored = artifact.clone();
        stored.stored_path = Some(final_path.display().to_string());
        stored.content_hash = Some(hash);
        Ok(stored)
    }
}
