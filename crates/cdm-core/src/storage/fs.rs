//! Local-filesystem storage gateway on `tokio::fs`.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

use super::StorageGateway;
use crate::config::CdmConfig;

/// Storage gateway backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Gateway whose downloads root is `root` (created on first use).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Downloads root from config, else `~/.local/share/cdm/downloads`.
    pub fn from_config(cfg: &CdmConfig) -> anyhow::Result<Self> {
        let root = match &cfg.downloads_dir {
            Some(dir) => dir.clone(),
            None => xdg::BaseDirectories::with_prefix("cdm")?
                .get_data_home()
                .join("cdm")
                .join("downloads"),
        };
        Ok(Self::new(root))
    }

    /// Make sure the downloads root exists.
    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV on Linux.
    e.raw_os_error() == Some(18)
}

#[async_trait]
impl StorageGateway for FsStorage {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_directory(&self, path: &Path, create_intermediate: bool) -> io::Result<()> {
        let r = if create_intermediate {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        };
        match r {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if tokio::fs::metadata(path).await?.is_dir() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    async fn move_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        match tokio::fs::rename(from, to).await {
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(from = %from.display(), to = %to.display(), "rename crossed filesystems, copying");
                self.copy_item(from, to).await?;
                tokio::fs::remove_file(from).await
            }
            other => other,
        }
    }

    async fn copy_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::copy(from, to).await.map(|_| ())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        if tokio::fs::metadata(path).await?.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }

    fn downloads_root(&self) -> PathBuf {
        self.root.clone()
    }
}
