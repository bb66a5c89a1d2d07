// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Permanent cache for microVM boot assets.
//!
//! The kernel and the base root filesystem are downloaded once into the cache
//! root and reused by every later run. Downloads land in a temporary sibling
//! file and are renamed into place only when complete, so an interrupted
//! download is never mistaken for a cached asset.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::MicroVmConfig;
use crate::error::AssetError;

/// Boot assets the microVM backend needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Kernel,
    BaseRootfs,
}

impl AssetKind {
    pub const ALL: [AssetKind; 2] = [AssetKind::Kernel, AssetKind::BaseRootfs];

    /// File name under the cache root.
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Kernel => "vmlinux.bin",
            Self::BaseRootfs => "base_rootfs.ext4",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => write!(f, "kernel"),
            Self::BaseRootfs => write!(f, "base rootfs"),
        }
    }
}

/// Downloads a remote asset to a local path.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), AssetError>;
}

/// Streaming HTTP(S) download with reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AssetError::Download {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), AssetError> {
        let download_err = |reason: String| AssetError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| download_err(format!("create {}: {}", dest.display(), e)))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| download_err(format!("write {}: {}", dest.display(), e)))?;
            written += chunk.len() as u64;
        }

        file.sync_all()
            .await
            .map_err(|e| download_err(format!("sync {}: {}", dest.display(), e)))?;

        tracing::debug!(url = %url, bytes = written, "Download finished");
        Ok(())
    }
}

/// Presence of one asset in the cache.
#[derive(Debug, Clone)]
pub struct AssetStatus {
    pub kind: AssetKind,
    pub path: PathBuf,
    pub cached: bool,
}

/// Cache of boot assets under a fixed root directory.
pub struct AssetCache {
    root: PathBuf,
    kernel_url: String,
    rootfs_url: String,
    fetcher: Arc<dyn AssetFetcher>,
}

impl AssetCache {
    /// Cache configured from the microVM section, downloading over HTTP.
    pub fn from_config(config: &MicroVmConfig) -> Result<Self, AssetError> {
        Ok(Self::with_fetcher(config, Arc::new(HttpFetcher::new()?)))
    }

    /// Cache configured from the microVM section with a custom fetcher.
    pub fn with_fetcher(config: &MicroVmConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self::new(
            &config.cache_dir,
            &config.kernel_url,
            &config.rootfs_url,
            fetcher,
        )
    }

    pub fn new(
        root: impl Into<PathBuf>,
        kernel_url: impl Into<String>,
        rootfs_url: impl Into<String>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Self {
        Self {
            root: root.into(),
            kernel_url: kernel_url.into(),
            rootfs_url: rootfs_url.into(),
            fetcher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of an asset, whether or not it is cached yet.
    pub fn path_of(&self, kind: AssetKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    fn url_of(&self, kind: AssetKind) -> &str {
        match kind {
            AssetKind::Kernel => &self.kernel_url,
            AssetKind::BaseRootfs => &self.rootfs_url,
        }
    }

    /// Ensure an asset exists locally and return its path.
    ///
    /// A present file is returned without network access. A missing one is
    /// downloaded to a temporary path and atomically renamed into place.
    pub async fn ensure(&self, kind: AssetKind) -> Result<PathBuf, AssetError> {
        let path = self.path_of(kind);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(asset = %kind, path = %path.display(), "Using cached asset");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AssetError::CacheRoot {
                path: self.root.clone(),
                source: e,
            })?;

        let partial = self.root.join(format!(
            "{}.partial-{}",
            kind.file_name(),
            uuid::Uuid::new_v4().simple()
        ));
        let url = self.url_of(kind);

        tracing::info!(asset = %kind, url = %url, "Downloading asset (one-time download)");

        if let Err(e) = self.fetcher.fetch(url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(AssetError::Publish { path, source: e });
        }

        tracing::info!(asset = %kind, path = %path.display(), "Asset cached");
        Ok(path)
    }

    /// Report which assets are already cached.
    pub async fn status(&self) -> Vec<AssetStatus> {
        let mut statuses = Vec::with_capacity(AssetKind::ALL.len());
        for kind in AssetKind::ALL {
            let path = self.path_of(kind);
            let cached = tokio::fs::try_exists(&path).await.unwrap_or(false);
            statuses.push(AssetStatus { kind, path, cached });
        }
        statuses
    }
}
